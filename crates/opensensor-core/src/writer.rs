//! Columnar batch persistence.
//!
//! One batch becomes one Parquet file under the partition layout from
//! [`crate::partition`]. Sensor values are stored as nullable `Float32`; the
//! timestamp keeps millisecond precision in UTC. The station id is encoded in
//! the path only.
//!
//! Files are written to a temp file in the destination directory and renamed
//! into place, so a reader (or the uploader) never sees a half-written file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float32Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field as ArrowField, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::{Deserialize, Serialize};

use crate::buffer::Batch;
use crate::error::WriteError;
use crate::partition;
use crate::reading::{Field, Reading};

/// Name of the timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// How many `data_HHMM_{n}` siblings are tried before giving up on a window.
const MAX_SIBLINGS: u32 = 16;

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Block compression codec for written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Snappy,
    Zstd,
    Gzip,
    None,
}

impl Compression {
    fn codec(self) -> ParquetCompression {
        match self {
            Self::Snappy => ParquetCompression::SNAPPY,
            Self::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
            Self::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
            Self::None => ParquetCompression::UNCOMPRESSED,
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            "gzip" => Ok(Self::Gzip),
            "none" | "uncompressed" => Ok(Self::None),
            other => Err(format!("unknown compression '{other}' (snappy, zstd, gzip, none)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Row schema: `timestamp` then every [`Field`] in column order.
pub fn schema() -> SchemaRef {
    let mut fields = Vec::with_capacity(Field::COUNT + 1);
    fields.push(ArrowField::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
        false,
    ));
    for f in Field::ALL {
        fields.push(ArrowField::new(f.name(), DataType::Float32, true));
    }
    Arc::new(Schema::new(fields))
}

pub(crate) fn same_columns(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a
            .fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

fn to_record_batch(readings: &[Reading]) -> Result<RecordBatch, WriteError> {
    let timestamps: Vec<i64> = readings
        .iter()
        .map(|r| r.timestamp().timestamp_millis())
        .collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(Field::COUNT + 1);
    columns.push(Arc::new(
        TimestampMillisecondArray::from(timestamps).with_timezone("UTC"),
    ));
    for f in Field::ALL {
        let values: Vec<Option<f32>> = readings
            .iter()
            .map(|r| r.get(f).map(|v| v as f32))
            .collect();
        columns.push(Arc::new(Float32Array::from(values)));
    }

    Ok(RecordBatch::try_new(schema(), columns)?)
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Destination for closed batches.
pub trait BatchSink: Send {
    /// Persist one batch and return the path of the complete file.
    fn write(&mut self, batch: &Batch) -> Result<PathBuf, WriteError>;
}

/// Writes batches as Parquet files under `output_dir`.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    output_dir: PathBuf,
    station_id: String,
    compression: Compression,
}

impl BatchWriter {
    pub fn new(output_dir: impl Into<PathBuf>, station_id: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            station_id: station_id.into(),
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where a batch closing at `window_end` will be written.
    pub fn path_for(&self, window_end: DateTime<Utc>) -> PathBuf {
        self.output_dir
            .join(partition::relative_path(&self.station_id, window_end))
    }

    /// Pick the file for a window and load the rows it already holds.
    ///
    /// The usual answer is `data_HHMM.parquet`, merged if it exists. A file
    /// there that does not share our columns (left by an older release, or
    /// by another tool) is never touched; the batch goes to the first
    /// `data_HHMM_{n}.parquet` that is free or mergeable instead.
    fn resolve_target(&self, window_end: DateTime<Utc>) -> Result<(PathBuf, Vec<Reading>), WriteError> {
        let primary = self.path_for(window_end);
        let dir = primary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.output_dir.clone());

        let mut candidate = primary.clone();
        for n in 1..=MAX_SIBLINGS + 1 {
            if !candidate.exists() {
                return Ok((candidate, Vec::new()));
            }
            match read_batch_file(&candidate) {
                Ok(existing) => {
                    debug!(
                        "merging {} existing rows into {}",
                        existing.len(),
                        candidate.display()
                    );
                    return Ok((candidate, existing));
                }
                Err(WriteError::SchemaMismatch { path }) => {
                    let next = dir.join(partition::sibling_file_name(window_end, n));
                    warn!(
                        "{} has different columns, writing to {} instead",
                        path.display(),
                        next.display()
                    );
                    candidate = next;
                }
                Err(e) => return Err(e),
            }
        }
        Err(WriteError::SchemaMismatch { path: primary })
    }
}

pub(crate) fn writer_properties(compression: Compression) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(compression.codec())
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_created_by(format!("opensensor {}", crate::VERSION))
        .build()
}

/// Write `batch` to `path` through a temp file in the same directory.
///
/// The directory is created if needed. Readers see either the old file or
/// the complete new one.
pub(crate) fn write_parquet_atomic(
    path: &Path,
    batch: &RecordBatch,
    compression: Compression,
) -> Result<(), WriteError> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir).map_err(|e| WriteError::io(&dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".data_")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| WriteError::io(&dir, e))?;
    let mut writer = ArrowWriter::try_new(
        tmp.as_file_mut(),
        batch.schema(),
        Some(writer_properties(compression)),
    )?;
    writer.write(batch)?;
    writer.close()?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| WriteError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| WriteError::io(path, e.error))?;
    Ok(())
}

impl BatchSink for BatchWriter {
    fn write(&mut self, batch: &Batch) -> Result<PathBuf, WriteError> {
        if batch.is_empty() {
            return Err(WriteError::EmptyBatch);
        }

        // A file for this window already exists when the process restarted or
        // drained inside a window that was flushed before. Keep its rows.
        let (path, mut rows) = self.resolve_target(batch.window_end())?;
        rows.reserve(batch.len());
        rows.extend_from_slice(batch.readings());
        rows.sort_by_key(Reading::timestamp);

        write_parquet_atomic(&path, &to_record_batch(&rows)?, self.compression)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Reading back
// ---------------------------------------------------------------------------

/// Read a written batch file back into readings.
pub fn read_batch_file(path: &Path) -> Result<Vec<Reading>, WriteError> {
    let file = File::open(path).map_err(|e| WriteError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    if !same_columns(builder.schema(), &schema()) {
        return Err(WriteError::SchemaMismatch {
            path: path.to_path_buf(),
        });
    }

    let mismatch = || WriteError::SchemaMismatch {
        path: path.to_path_buf(),
    };

    let mut out = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let timestamps = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .ok_or_else(mismatch)?;
        let mut columns = Vec::with_capacity(Field::COUNT);
        for i in 0..Field::COUNT {
            let col = batch
                .column(i + 1)
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(mismatch)?;
            columns.push(col);
        }

        for row in 0..batch.num_rows() {
            let ts = DateTime::from_timestamp_millis(timestamps.value(row)).ok_or_else(mismatch)?;
            let values: Vec<(Field, f64)> = Field::ALL
                .iter()
                .zip(&columns)
                .filter(|(_, col)| !col.is_null(row))
                .map(|(&f, col)| (f, f64::from(col.value(row))))
                .collect();
            out.push(Reading::from_values(ts, &values));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchBuffer;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 3).unwrap()
    }

    fn batch(n: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Batch {
        let mut buf = BatchBuffer::new(start);
        for i in 0..n {
            buf.append(Reading::from_values(
                start + Duration::seconds(i * 5),
                &[(Field::Pressure, 1000.0 + i as f64), (Field::Pm25, 2.5)],
            ));
        }
        buf.drain(end)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    #[test]
    fn test_schema_columns_in_order() {
        let s = schema();
        assert_eq!(s.fields().len(), Field::COUNT + 1);
        assert_eq!(s.field(0).name(), "timestamp");
        assert!(!s.field(0).is_nullable());
        assert_eq!(s.field(1).name(), "temperature");
        assert_eq!(s.field(1).data_type(), &DataType::Float32);
        assert!(s.field(1).is_nullable());
        assert!(s.fields().iter().all(|f| f.name() != "station_id"));
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!("ZSTD".parse::<Compression>(), Ok(Compression::Zstd));
        assert_eq!("none".parse::<Compression>(), Ok(Compression::None));
        assert!("lz4".parse::<Compression>().is_err());
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    #[test]
    fn test_write_creates_partitioned_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1");
        let end = Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap();
        let path = w.write(&batch(4, t0(), end)).unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("station=S1/year=2025/month=11/day=24/data_0915.parquet")
        );
        let rows = read_batch_file(&path).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].timestamp(), t0());
        assert_eq!(rows[3].get(Field::Pressure), Some(1003.0));
        assert_eq!(rows[0].get(Field::Pm25), Some(2.5));
        assert_eq!(rows[0].get(Field::Lux), None);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1");
        let end = t0() + Duration::minutes(15);
        assert!(matches!(
            w.write(&batch(0, t0(), end)),
            Err(WriteError::EmptyBatch)
        ));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_existing_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1").with_compression(Compression::Zstd);
        let a = w
            .write(&batch(2, t0(), t0() + Duration::minutes(15)))
            .unwrap();
        let b = w
            .write(&batch(2, t0() + Duration::minutes(15), t0() + Duration::minutes(30)))
            .unwrap();
        assert_eq!(a.parent(), b.parent());
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_window_merges_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1");
        let end = Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap();
        w.write(&batch(2, t0(), end)).unwrap();
        let path = w
            .write(&batch(3, t0() + Duration::minutes(5), end))
            .unwrap();
        let rows = read_batch_file(&path).unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|p| p[0].timestamp() <= p[1].timestamp()));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1").with_compression(Compression::Gzip);
        let path = w
            .write(&batch(1, t0(), t0() + Duration::minutes(15)))
            .unwrap();
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["data_0915.parquet".to_string()]);
    }

    #[test]
    fn test_values_stored_as_f32() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1");
        let mut buf = BatchBuffer::new(t0());
        buf.append(Reading::from_values(t0(), &[(Field::Temperature, 21.123456789)]));
        let path = w.write(&buf.drain(t0() + Duration::minutes(15))).unwrap();
        let v = read_batch_file(&path).unwrap()[0]
            .get(Field::Temperature)
            .unwrap();
        assert_eq!(v, f64::from(21.123456789_f32));
    }

    /// A file with a single `x` column, standing in for an older layout.
    fn write_foreign(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let other = Arc::new(Schema::new(vec![ArrowField::new("x", DataType::Float32, true)]));
        let rb = RecordBatch::try_new(
            other.clone(),
            vec![Arc::new(Float32Array::from(vec![Some(1.0)])) as ArrayRef],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), other, None).unwrap();
        writer.write(&rb).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_foreign_file_is_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.parquet");
        write_foreign(&path);
        assert!(matches!(
            read_batch_file(&path),
            Err(WriteError::SchemaMismatch { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Existing files with other columns
    // -----------------------------------------------------------------------

    #[test]
    fn test_foreign_file_at_target_diverts_to_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1");
        let end = Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap();
        let primary = w.path_for(end);
        write_foreign(&primary);
        let before = fs::read(&primary).unwrap();

        let path = w.write(&batch(3, t0(), end)).unwrap();
        assert_eq!(path, primary.with_file_name("data_0915_1.parquet"));
        assert_eq!(read_batch_file(&path).unwrap().len(), 3);
        // The old file is left exactly as it was.
        assert_eq!(fs::read(&primary).unwrap(), before);

        // A later batch for the same window merges into the sibling.
        let again = w
            .write(&batch(2, t0() + Duration::minutes(5), end))
            .unwrap();
        assert_eq!(again, path);
        assert_eq!(read_batch_file(&again).unwrap().len(), 5);
    }

    #[test]
    fn test_sibling_chain_skips_every_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = BatchWriter::new(dir.path(), "S1");
        let end = Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap();
        let primary = w.path_for(end);
        write_foreign(&primary);
        write_foreign(&primary.with_file_name("data_0915_1.parquet"));

        let path = w.write(&batch(1, t0(), end)).unwrap();
        assert_eq!(path, primary.with_file_name("data_0915_2.parquet"));
    }
}
