//! `opensensor info`: configuration, file counts and current station health.

use std::fs;
use std::path::Path;

use chrono::Utc;
use opensensor_core::{HealthPaths, HealthSnapshot, Settings, collect_health};

/// Number and total size of `*.parquet` files under `dir`, skipping temp files.
fn count_parquet(dir: &Path) -> (usize, u64) {
    let Ok(entries) = fs::read_dir(dir) else {
        return (0, 0);
    };
    let mut files = 0;
    let mut bytes = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if path.is_dir() {
            let (f, b) = count_parquet(&path);
            files += f;
            bytes += b;
        } else if !hidden && path.extension().is_some_and(|e| e == "parquet") {
            files += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (files, bytes)
}

fn fmt_opt(v: Option<f64>, unit: &str) -> String {
    v.map(|v| format!("{v:.1}{unit}"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn health_lines(h: &HealthSnapshot) -> Vec<String> {
    vec![
        format!("CPU temp:    {}", fmt_opt(h.cpu_temp_c, " °C")),
        format!(
            "Load:        {} / {} / {}",
            fmt_opt(h.cpu_load_1min, ""),
            fmt_opt(h.cpu_load_5min, ""),
            fmt_opt(h.cpu_load_15min, "")
        ),
        format!(
            "Memory:      {} used of {}",
            fmt_opt(h.memory_percent_used, "%"),
            fmt_opt(h.memory_total_mb, " MB")
        ),
        format!(
            "Disk:        {} used, {} free",
            fmt_opt(h.disk_percent_used, "%"),
            fmt_opt(h.disk_free_gb, " GB")
        ),
        format!(
            "Wi-Fi:       {} ({})",
            fmt_opt(h.wifi_signal_dbm, " dBm"),
            fmt_opt(h.wifi_quality_percent, "%")
        ),
        format!("Uptime:      {}", fmt_opt(h.uptime_seconds.map(|s| s / 3600.0), " h")),
        format!(
            "Power:       {}{}",
            h.power_source.map(|p| p.as_str()).unwrap_or("unknown"),
            h.battery_percent
                .map(|b| format!(", battery {b:.0}%"))
                .unwrap_or_default()
        ),
    ]
}

pub fn run(settings: &Settings) {
    let c = &settings.collector;
    println!("opensensor {}", opensensor_core::VERSION);
    println!(
        "  Station:     {}",
        if c.station_id.is_empty() { "(not set)" } else { c.station_id.as_str() }
    );
    println!("  Interval:    {}s, batches of {}s", c.read_interval_secs, c.batch_duration_secs);
    println!(
        "  Sync:        {}",
        if settings.sync.sync_enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Health:      {}",
        if c.health_enabled { "enabled" } else { "disabled" }
    );
    println!();

    let (files, bytes) = count_parquet(&c.output_dir);
    println!(
        "Data files:   {files} in {} ({:.1} MB)",
        c.output_dir.display(),
        bytes as f64 / (1024.0 * 1024.0)
    );
    let (health_files, _) = count_parquet(&c.health_output_dir);
    println!(
        "Health files: {health_files} in {}",
        c.health_output_dir.display()
    );
    println!();

    for line in health_lines(&collect_health(&HealthPaths::default(), Utc::now())) {
        println!("  {line}");
    }
}
