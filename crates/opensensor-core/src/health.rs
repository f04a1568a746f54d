//! Station health snapshots: CPU temperature and load, memory, disk, Wi-Fi
//! link, uptime and power supply.
//!
//! Everything is read from procfs/sysfs (plus `statvfs` for the disk), so a
//! snapshot never blocks on a subprocess. Values that cannot be observed are
//! left `None` rather than guessed.
//!
//! Snapshots are taken on their own interval, buffered, and written at the
//! same boundaries as the sensor batches into a separate output tree with
//! the same partition layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float32Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field as ArrowField, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::drivers::thermal::THERMAL_ZONE;
use crate::error::WriteError;
use crate::partition;
use crate::writer::{Compression, TIMESTAMP_COLUMN, same_columns, write_parquet_atomic};

/// Numeric health columns, in file order. `power_source` follows them.
pub const METRICS: [&str; 14] = [
    "cpu_temp_c",
    "cpu_load_1min",
    "cpu_load_5min",
    "cpu_load_15min",
    "memory_total_mb",
    "memory_available_mb",
    "memory_percent_used",
    "disk_total_gb",
    "disk_free_gb",
    "disk_percent_used",
    "wifi_signal_dbm",
    "wifi_quality_percent",
    "uptime_seconds",
    "battery_percent",
];

const POWER_SOURCE_COLUMN: &str = "power_source";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Link quality reported by most Wi-Fi drivers is out of 70.
const WIFI_QUALITY_MAX: f64 = 70.0;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    Mains,
    Battery,
}

impl PowerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mains => "mains",
            Self::Battery => "battery",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "mains" => Some(Self::Mains),
            "battery" => Some(Self::Battery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_temp_c: Option<f64>,
    pub cpu_load_1min: Option<f64>,
    pub cpu_load_5min: Option<f64>,
    pub cpu_load_15min: Option<f64>,
    pub memory_total_mb: Option<f64>,
    pub memory_available_mb: Option<f64>,
    pub memory_percent_used: Option<f64>,
    pub disk_total_gb: Option<f64>,
    pub disk_free_gb: Option<f64>,
    pub disk_percent_used: Option<f64>,
    pub wifi_signal_dbm: Option<f64>,
    pub wifi_quality_percent: Option<f64>,
    pub uptime_seconds: Option<f64>,
    pub battery_percent: Option<f64>,
    pub power_source: Option<PowerSource>,
}

impl HealthSnapshot {
    /// Numeric values in [`METRICS`] order.
    pub fn metrics(&self) -> [Option<f64>; METRICS.len()] {
        [
            self.cpu_temp_c,
            self.cpu_load_1min,
            self.cpu_load_5min,
            self.cpu_load_15min,
            self.memory_total_mb,
            self.memory_available_mb,
            self.memory_percent_used,
            self.disk_total_gb,
            self.disk_free_gb,
            self.disk_percent_used,
            self.wifi_signal_dbm,
            self.wifi_quality_percent,
            self.uptime_seconds,
            self.battery_percent,
        ]
    }

    fn from_metrics(
        timestamp: DateTime<Utc>,
        m: [Option<f64>; METRICS.len()],
        power_source: Option<PowerSource>,
    ) -> Self {
        Self {
            timestamp,
            cpu_temp_c: m[0],
            cpu_load_1min: m[1],
            cpu_load_5min: m[2],
            cpu_load_15min: m[3],
            memory_total_mb: m[4],
            memory_available_mb: m[5],
            memory_percent_used: m[6],
            disk_total_gb: m[7],
            disk_free_gb: m[8],
            disk_percent_used: m[9],
            wifi_signal_dbm: m[10],
            wifi_quality_percent: m[11],
            uptime_seconds: m[12],
            battery_percent: m[13],
            power_source,
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where health values are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPaths {
    pub proc_root: PathBuf,
    pub thermal_zone: PathBuf,
    pub power_supply: PathBuf,
    /// Filesystem whose usage is reported.
    pub disk: PathBuf,
}

impl Default for HealthPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            thermal_zone: PathBuf::from(THERMAL_ZONE),
            power_supply: PathBuf::from("/sys/class/power_supply"),
            disk: PathBuf::from("/"),
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() { None } else { Some(v.to_string()) }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// `/proc/loadavg`: first three fields.
fn parse_loadavg(text: &str) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut it = text
        .split_whitespace()
        .map(|v| v.parse::<f64>().ok().and_then(finite));
    (
        it.next().flatten(),
        it.next().flatten(),
        it.next().flatten(),
    )
}

/// `/proc/meminfo` → (total MB, available MB, percent used).
fn parse_meminfo(text: &str) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok());
        match key {
            "MemTotal" => total_kb = value,
            "MemAvailable" => available_kb = value,
            _ => {}
        }
    }
    match (total_kb, available_kb) {
        (Some(total), Some(available)) if total > 0.0 => (
            Some(total / 1024.0),
            Some(available / 1024.0),
            Some((total - available) / total * 100.0),
        ),
        _ => (None, None, None),
    }
}

/// `/proc/uptime`: first field, seconds.
fn parse_uptime(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse::<f64>().ok().and_then(finite)
}

/// `/proc/net/wireless` → (signal dBm, quality percent) of the first interface.
///
/// Some drivers report the level as an unsigned byte or a 0..100 scale
/// instead of dBm; both are mapped back to dBm.
fn parse_wireless(text: &str) -> (Option<f64>, Option<f64>) {
    for line in text.lines().skip(2) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let number = |s: &str| s.trim_end_matches('.').parse::<f64>().ok();
        let (Some(quality), Some(level)) = (number(parts[2]), number(parts[3])) else {
            continue;
        };
        let dbm = if level > 100.0 {
            level - 256.0
        } else if level > 0.0 {
            level - 100.0
        } else {
            level
        };
        let percent = (quality / WIFI_QUALITY_MAX * 100.0).min(100.0);
        return (Some(dbm.trunc()), Some(percent));
    }
    (None, None)
}

/// Scan `/sys/class/power_supply/*` → (source, battery percent).
///
/// A discharging battery means we run on battery; a charging or full one, or
/// an online mains supply, means mains.
fn read_power(dir: &Path) -> (Option<PowerSource>, Option<f64>) {
    let mut source = None;
    let mut battery = None;
    let Ok(entries) = fs::read_dir(dir) else {
        return (None, None);
    };
    let mut supplies: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    supplies.sort();
    for supply in supplies {
        let Some(kind) = read_trimmed(&supply.join("type")) else {
            continue;
        };
        match kind.to_ascii_lowercase().as_str() {
            "battery" => {
                if let Some(capacity) =
                    read_trimmed(&supply.join("capacity")).and_then(|v| v.parse::<f64>().ok())
                {
                    battery = Some(capacity);
                }
                match read_trimmed(&supply.join("status"))
                    .map(|s| s.to_ascii_lowercase())
                    .as_deref()
                {
                    Some("discharging") => source = Some(PowerSource::Battery),
                    Some("charging" | "full") => source = Some(PowerSource::Mains),
                    _ => {}
                }
            }
            "mains" => {
                if read_trimmed(&supply.join("online")).as_deref() == Some("1") {
                    source = Some(PowerSource::Mains);
                }
            }
            _ => {}
        }
    }
    (source, battery)
}

/// (total GB, free GB, percent used) of the filesystem holding `path`.
#[cfg(unix)]
fn disk_usage(path: &Path) -> (Option<f64>, Option<f64>, Option<f64>) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return (None, None, None);
    };
    // SAFETY: `c_path` is NUL-terminated and `stat` is a valid out-buffer.
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return (None, None, None);
        }
        stat
    };
    let frsize = stat.f_frsize as f64;
    let total = stat.f_blocks as f64 * frsize;
    let free = stat.f_bavail as f64 * frsize;
    if total <= 0.0 {
        return (None, None, None);
    }
    (
        Some(total / GIB),
        Some(free / GIB),
        Some((total - free) / total * 100.0),
    )
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> (Option<f64>, Option<f64>, Option<f64>) {
    (None, None, None)
}

/// Take one snapshot. Never fails; missing sources give `None`.
pub fn collect_health(paths: &HealthPaths, timestamp: DateTime<Utc>) -> HealthSnapshot {
    let proc_file = |name: &str| fs::read_to_string(paths.proc_root.join(name)).ok();

    let (cpu_load_1min, cpu_load_5min, cpu_load_15min) = proc_file("loadavg")
        .map(|t| parse_loadavg(&t))
        .unwrap_or_default();
    let (memory_total_mb, memory_available_mb, memory_percent_used) = proc_file("meminfo")
        .map(|t| parse_meminfo(&t))
        .unwrap_or_default();
    let (wifi_signal_dbm, wifi_quality_percent) = proc_file("net/wireless")
        .map(|t| parse_wireless(&t))
        .unwrap_or_default();
    let (disk_total_gb, disk_free_gb, disk_percent_used) = disk_usage(&paths.disk);
    let (power_source, battery_percent) = read_power(&paths.power_supply);

    HealthSnapshot {
        timestamp,
        cpu_temp_c: read_trimmed(&paths.thermal_zone)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|milli| milli / 1000.0),
        cpu_load_1min,
        cpu_load_5min,
        cpu_load_15min,
        memory_total_mb,
        memory_available_mb,
        memory_percent_used,
        disk_total_gb,
        disk_free_gb,
        disk_percent_used,
        wifi_signal_dbm,
        wifi_quality_percent,
        uptime_seconds: proc_file("uptime").as_deref().and_then(parse_uptime),
        battery_percent,
        power_source,
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Health file schema: `timestamp`, the [`METRICS`] as nullable `Float32`,
/// then `power_source` as nullable text.
pub fn health_schema() -> SchemaRef {
    let mut fields = Vec::with_capacity(METRICS.len() + 2);
    fields.push(ArrowField::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
        false,
    ));
    for name in METRICS {
        fields.push(ArrowField::new(name, DataType::Float32, true));
    }
    fields.push(ArrowField::new(POWER_SOURCE_COLUMN, DataType::Utf8, true));
    Arc::new(Schema::new(fields))
}

fn to_record_batch(snapshots: &[HealthSnapshot]) -> Result<RecordBatch, WriteError> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(METRICS.len() + 2);
    let timestamps: Vec<i64> = snapshots
        .iter()
        .map(|s| s.timestamp.timestamp_millis())
        .collect();
    columns.push(Arc::new(
        TimestampMillisecondArray::from(timestamps).with_timezone("UTC"),
    ));
    let rows: Vec<_> = snapshots.iter().map(HealthSnapshot::metrics).collect();
    for i in 0..METRICS.len() {
        let values: Vec<Option<f32>> = rows.iter().map(|m| m[i].map(|v| v as f32)).collect();
        columns.push(Arc::new(Float32Array::from(values)));
    }
    let sources: Vec<Option<&str>> = snapshots
        .iter()
        .map(|s| s.power_source.map(PowerSource::as_str))
        .collect();
    columns.push(Arc::new(StringArray::from(sources)));
    Ok(RecordBatch::try_new(health_schema(), columns)?)
}

/// Writes buffered snapshots under `health_dir` using the batch partition layout.
#[derive(Debug, Clone)]
pub struct HealthWriter {
    health_dir: PathBuf,
    station_id: String,
    compression: Compression,
}

impl HealthWriter {
    pub fn new(health_dir: impl Into<PathBuf>, station_id: impl Into<String>) -> Self {
        Self {
            health_dir: health_dir.into(),
            station_id: station_id.into(),
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn health_dir(&self) -> &Path {
        &self.health_dir
    }

    pub fn path_for(&self, window_end: DateTime<Utc>) -> PathBuf {
        self.health_dir
            .join(partition::relative_path(&self.station_id, window_end))
    }

    /// Write snapshots for the window ending at `window_end`, merging with
    /// any file already there. A file with other columns is replaced.
    pub fn write(
        &self,
        snapshots: &[HealthSnapshot],
        window_end: DateTime<Utc>,
    ) -> Result<PathBuf, WriteError> {
        if snapshots.is_empty() {
            return Err(WriteError::EmptyBatch);
        }
        let path = self.path_for(window_end);
        let mut rows = if path.exists() {
            read_health_file(&path).unwrap_or_else(|e| {
                debug!("not merging {}: {e}", path.display());
                Vec::new()
            })
        } else {
            Vec::new()
        };
        rows.extend_from_slice(snapshots);
        rows.sort_by_key(|s| s.timestamp);
        write_parquet_atomic(&path, &to_record_batch(&rows)?, self.compression)?;
        Ok(path)
    }
}

/// Read a health file back.
pub fn read_health_file(path: &Path) -> Result<Vec<HealthSnapshot>, WriteError> {
    let mismatch = || WriteError::SchemaMismatch {
        path: path.to_path_buf(),
    };
    let file = fs::File::open(path).map_err(|e| WriteError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    if !same_columns(builder.schema(), &health_schema()) {
        return Err(mismatch());
    }

    let mut out = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let timestamps = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .ok_or_else(mismatch)?;
        let mut metrics = Vec::with_capacity(METRICS.len());
        for i in 0..METRICS.len() {
            metrics.push(
                batch
                    .column(i + 1)
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(mismatch)?,
            );
        }
        let sources = batch
            .column(METRICS.len() + 1)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(mismatch)?;

        for row in 0..batch.num_rows() {
            let ts = DateTime::from_timestamp_millis(timestamps.value(row)).ok_or_else(mismatch)?;
            let mut values = [None; METRICS.len()];
            for (slot, col) in values.iter_mut().zip(&metrics) {
                if !col.is_null(row) {
                    *slot = Some(f64::from(col.value(row)));
                }
            }
            let source = if sources.is_null(row) {
                None
            } else {
                PowerSource::parse(sources.value(row))
            };
            out.push(HealthSnapshot::from_metrics(ts, values, source));
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Samples health on its own interval and writes at batch boundaries.
pub struct HealthMonitor {
    paths: HealthPaths,
    writer: HealthWriter,
    interval: Duration,
    next_sample: Option<DateTime<Utc>>,
    pending: Vec<HealthSnapshot>,
    files_written: u64,
}

impl HealthMonitor {
    pub fn new(paths: HealthPaths, writer: HealthWriter, interval_secs: u32) -> Self {
        Self {
            paths,
            writer,
            interval: Duration::seconds(i64::from(interval_secs.max(1))),
            next_sample: None,
            pending: Vec::new(),
            files_written: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn files_written(&self) -> u64 {
        self.files_written
    }

    /// Take a snapshot if the interval has elapsed since the last one.
    pub fn observe(&mut self, now: DateTime<Utc>) -> bool {
        if self.next_sample.is_some_and(|due| now < due) {
            return false;
        }
        self.pending.push(collect_health(&self.paths, now));
        self.next_sample = Some(now + self.interval);
        true
    }

    /// Write everything pending for the window ending at `window_end`.
    ///
    /// Failures are logged and the snapshots dropped; health never holds up
    /// sensor batching.
    pub fn flush(&mut self, window_end: DateTime<Utc>) -> Option<PathBuf> {
        if self.pending.is_empty() {
            return None;
        }
        let snapshots = std::mem::take(&mut self.pending);
        match self.writer.write(&snapshots, window_end) {
            Ok(path) => {
                info!("wrote {} health snapshots to {}", snapshots.len(), path.display());
                self.files_written += 1;
                Some(path)
            }
            Err(e) => {
                error!("failed to write health snapshots: {e}");
                None
            }
        }
    }
}
