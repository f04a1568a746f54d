//! `opensensor run`: the station's main loop.

use std::sync::Arc;

use log::{error, info, warn};
use opensensor_core::{
    BatchWriter, Clock, CollectionLoop, HardwarePaths, LoopSettings, Settings, Shutdown,
    SystemClock,
};

/// Run the collection loop until Ctrl+C or SIGTERM, then drain and stop.
pub fn run(settings: &Settings) {
    let station_id = match settings.require_station_id() {
        Ok(id) => id.to_string(),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    let c = &settings.collector;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let assembler = super::build_assembler(c, &HardwarePaths::from(c), clock.clone());
    let writer = BatchWriter::new(&c.output_dir, &station_id).with_compression(c.compression);
    let mut collector = CollectionLoop::new(assembler, Box::new(writer), LoopSettings::from(c));
    if let Some(monitor) = super::health_monitor(c, &station_id) {
        collector = collector.with_health(monitor);
    }

    let mut sync_worker = None;
    if settings.sync.sync_enabled {
        match super::sync_trigger(settings, clock.clone()).map(|t| t.spawn()) {
            Some(Ok((tx, handle))) => {
                collector = collector.with_sync(tx);
                sync_worker = Some(handle);
            }
            Some(Err(e)) => error!("could not start sync worker: {e}"),
            None => warn!("sync enabled but no mirror_dir set, not syncing"),
        }
    }

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_shutdown.trigger()) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    println!("opensensor {}", opensensor_core::VERSION);
    println!("  Station:     {station_id}");
    println!("  Interval:    {}s", c.read_interval_secs);
    println!("  Batch:       {}s ({} warm-up readings)", c.batch_duration_secs, c.warmup_readings);
    println!(
        "  Compensation: {}",
        if c.temp_compensation_enabled {
            format!("on (factor {})", c.temp_compensation_factor)
        } else {
            "off".to_string()
        }
    );
    println!("  Output:      {} ({:?})", c.output_dir.display(), c.compression);
    println!(
        "  Health:      {}",
        if c.health_enabled {
            format!("every {}s to {}", c.health_interval_secs, c.health_output_dir.display())
        } else {
            "off".to_string()
        }
    );
    println!(
        "  Sync:        {}",
        if sync_worker.is_some() { "enabled" } else { "disabled" }
    );
    println!();

    let stats = collector.run(&shutdown);

    if let Some(handle) = sync_worker {
        info!("waiting for final sync");
        match handle.join() {
            Ok(s) => println!(
                "Sync: {} uploaded, {} already present, {} failed attempts over {} passes",
                s.uploaded, s.already_present, s.failures, s.passes
            ),
            Err(_) => eprintln!("Sync worker panicked"),
        }
    }

    println!(
        "Stopped after {} readings: {} batches ({} rows) written, {} empty windows, {} write failures ({} readings lost)",
        stats.ticks,
        stats.batches_written,
        stats.rows_written,
        stats.empty_windows,
        stats.write_failures,
        stats.readings_lost
    );
}
