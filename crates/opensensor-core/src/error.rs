//! Error taxonomy for the collection pipeline.
//!
//! Each boundary has its own error type so that failures stay where they
//! belong: a [`Fault`] never leaves a channel as anything but a null field,
//! a [`WriteError`] costs one batch, a [`SyncError`] never reaches the
//! collection loop, and a [`ConfigError`] is only raised at startup.

use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Typed "no value" outcome of a channel read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// The channel failed to initialise at startup; no hardware I/O is attempted.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    /// The device did not answer within its own read timeout.
    #[error("read timed out")]
    Timeout,
    /// Bus or file-system level failure.
    #[error("i/o error: {0}")]
    Io(String),
    /// The device answered with a malformed or corrupt payload.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The device answered with a value that cannot be a measurement (NaN, inf).
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The driver panicked during the read.
    #[error("driver panicked during read")]
    Panicked,
}

impl Fault {
    /// Whether this fault means the channel was never usable in this run.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<std::io::Error> for Fault {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::UnexpectedEof => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Failure to persist one batch. Fatal to that batch only.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("refusing to write a batch with no readings")]
    EmptyBatch,
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("existing file {path} has an incompatible schema")]
    SchemaMismatch { path: PathBuf },
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

impl WriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to hand a file to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("local file missing: {0}")]
    MissingFile(PathBuf),
    #[error("{path} is outside the output directory")]
    OutsideOutputDir { path: PathBuf },
    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Startup configuration problem. The only error class allowed to stop the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
