//! Hive-style partition layout for written batches.
//!
//! `station={id}/year={YYYY}/month={MM}/day={DD}/data_{HHMM}.parquet`
//!
//! The station id lives only in the path, never in the rows.

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Timelike, Utc};

/// File extension of written batches.
pub const EXTENSION: &str = "parquet";

/// Destination partition of a batch, derived from its `window_end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub station_id: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl PartitionKey {
    pub fn new(station_id: &str, window_end: DateTime<Utc>) -> Self {
        Self {
            station_id: station_id.to_string(),
            year: window_end.year(),
            month: window_end.month(),
            day: window_end.day(),
        }
    }

    /// Directory relative to the output root.
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(format!("station={}", self.station_id))
            .join(format!("year={:04}", self.year))
            .join(format!("month={:02}", self.month))
            .join(format!("day={:02}", self.day))
    }
}

/// `data_HHMM.parquet` for a window end, in UTC.
pub fn file_name(window_end: DateTime<Utc>) -> String {
    format!(
        "data_{:02}{:02}.{EXTENSION}",
        window_end.hour(),
        window_end.minute()
    )
}

/// `data_HHMM_{n}.parquet`: where a batch goes when `data_HHMM.parquet`
/// already holds rows it cannot be merged with.
pub fn sibling_file_name(window_end: DateTime<Utc>, n: u32) -> String {
    format!(
        "data_{:02}{:02}_{n}.{EXTENSION}",
        window_end.hour(),
        window_end.minute()
    )
}

/// Full path of a batch relative to the output root.
pub fn relative_path(station_id: &str, window_end: DateTime<Utc>) -> PathBuf {
    PartitionKey::new(station_id, window_end)
        .dir()
        .join(file_name(window_end))
}
