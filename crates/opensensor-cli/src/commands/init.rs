//! `opensensor init`: create a config file with a new station id.

use std::path::Path;

use opensensor_core::{ConfigError, Settings, generate_station_id};

pub fn run(path: &Path, force: bool) {
    if path.exists() && !force {
        eprintln!(
            "{} already exists. Use --force to give it a new station id.",
            path.display()
        );
        std::process::exit(1);
    }

    match write_config(path) {
        Ok(settings) => {
            println!("Wrote {}", path.display());
            println!("  Station ID: {}", settings.collector.station_id);
            println!("  Output:     {}", settings.collector.output_dir.display());
            println!();
            println!("Check the sensors with: opensensor test");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Keep any settings already in `path`, assign a fresh station id, and save.
fn write_config(path: &Path) -> Result<Settings, ConfigError> {
    let mut settings = if path.is_file() {
        Settings::from_file(path)?
    } else {
        Settings::default()
    };
    settings.collector.station_id = generate_station_id();
    settings.save(path)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opensensor.json");
        let written = write_config(&path).unwrap();

        let loaded = Settings::from_file(&path).unwrap();
        assert_eq!(loaded, written);
        assert!(loaded.validate().is_ok());
        assert!(uuid::Uuid::parse_str(loaded.require_station_id().unwrap()).is_ok());
    }

    #[test]
    fn test_rewrite_keeps_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opensensor.json");
        let mut original = Settings::default();
        original.collector.station_id = generate_station_id();
        original.collector.batch_duration_secs = 300;
        original.save(&path).unwrap();

        let rewritten = write_config(&path).unwrap();
        assert_eq!(rewritten.collector.batch_duration_secs, 300);
        assert_ne!(rewritten.collector.station_id, original.collector.station_id);
    }
}
