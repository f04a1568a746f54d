//! `opensensor sync`: one-shot upload of the output directory.

use std::sync::Arc;

use opensensor_core::{Settings, SyncReport, SystemClock};

/// Upload every batch file under the output directory once.
pub fn run(settings: &Settings) {
    let Some(mut trigger) = super::sync_trigger(settings, Arc::new(SystemClock)) else {
        eprintln!("Configuration error: mirror_dir is not set (OPENSENSOR_MIRROR_DIR)");
        std::process::exit(2);
    };

    let found = trigger.scan_existing();
    println!(
        "Found {found} batch file(s) in {}",
        settings.collector.output_dir.display()
    );
    if found == 0 {
        return;
    }

    let report = trigger.sync_pending();
    println!("{}", summary(&report, trigger.pending_len()));
    if report.failed > 0 {
        std::process::exit(1);
    }
}

fn summary(report: &SyncReport, still_pending: usize) -> String {
    format!(
        "Uploaded {}, already present {}, failed {}, dropped {} ({} still pending)",
        report.uploaded, report.already_present, report.failed, report.dropped, still_pending
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensensor_core::{BatchBuffer, BatchSink, BatchWriter, Field, Reading};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    #[test]
    fn test_summary_lists_every_count() {
        let report = SyncReport {
            uploaded: 2,
            already_present: 1,
            failed: 3,
            dropped: 0,
        };
        assert_eq!(
            summary(&report, 3),
            "Uploaded 2, already present 1, failed 3, dropped 0 (3 still pending)"
        );
    }

    #[test]
    fn test_one_shot_sync_mirrors_existing_files() {
        let out = tempfile::tempdir().unwrap();
        let mirror = tempfile::tempdir().unwrap();

        let start = Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 0).unwrap();
        let mut buffer = BatchBuffer::new(start);
        buffer.append(Reading::from_values(start, &[(Field::Lux, 12.0)]));
        let batch = buffer.drain(Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap());
        let written = BatchWriter::new(out.path(), "s1").write(&batch).unwrap();

        let mut settings = Settings::default();
        settings.collector.output_dir = out.path().to_path_buf();
        settings.sync.mirror_dir = Some(mirror.path().to_path_buf());

        let mut trigger = super::super::sync_trigger(&settings, Arc::new(SystemClock)).unwrap();
        assert_eq!(trigger.scan_existing(), 1);
        let first = trigger.sync_pending();
        assert_eq!(first.uploaded, 1);

        let rel: PathBuf = written.strip_prefix(out.path()).unwrap().to_path_buf();
        assert!(mirror.path().join(rel).is_file());

        // A second pass over the same files uploads nothing new.
        trigger.scan_existing();
        let second = trigger.sync_pending();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.already_present, 1);
    }
}
