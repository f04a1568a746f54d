pub mod info;
pub mod init;
pub mod inspect;
pub mod run;
pub mod scan;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use opensensor_core::{
    Clock, CollectorConfig, HardwarePaths, HealthMonitor, HealthPaths, HealthWriter,
    MirrorUploader, ReadingAssembler, Settings, SyncTrigger, detect_channels,
};

/// Install the logger. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Load and validate settings, then start logging at the configured level.
/// A bad configuration is fatal.
pub fn setup(config: Option<&Path>) -> Settings {
    let settings = match Settings::load(config).and_then(|s| s.validate().map(|()| s)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    init_logging(&settings.collector.log_level);
    settings
}

/// Detect the station's channels under `paths` and wrap them in an assembler.
pub fn build_assembler(
    config: &CollectorConfig,
    paths: &HardwarePaths,
    clock: Arc<dyn Clock>,
) -> ReadingAssembler {
    let channels = detect_channels(paths);
    ReadingAssembler::new(
        channels.measurement,
        channels.heat_source,
        config.compensation(),
        clock,
    )
}

/// Health recording for `station_id`, or `None` when disabled.
pub fn health_monitor(config: &CollectorConfig, station_id: &str) -> Option<HealthMonitor> {
    if !config.health_enabled {
        return None;
    }
    let writer = HealthWriter::new(&config.health_output_dir, station_id)
        .with_compression(config.compression);
    Some(HealthMonitor::new(
        HealthPaths::default(),
        writer,
        config.health_interval_secs,
    ))
}

/// A sync trigger for the configured mirror, or `None` if no mirror is set.
pub fn sync_trigger(settings: &Settings, clock: Arc<dyn Clock>) -> Option<SyncTrigger> {
    let mirror = settings.sync.mirror_dir.clone()?;
    let trigger = SyncTrigger::new(
        settings.collector.output_dir.clone(),
        settings.sync.sync_interval_minutes,
        Box::new(MirrorUploader::new(mirror)),
        clock,
    )
    .with_prefix(settings.sync.storage_prefix.clone());
    Some(trigger)
}
