//! # opensensor-core
//!
//! Collection-and-batching engine for an edge environmental sensor station.
//!
//! Every few seconds the station reads each sensor once, corrects
//! temperature and humidity for board self-heating, and buffers the result.
//! At clock-aligned boundaries (:00, :15, :30, :45 by default) the buffer is
//! written as one Parquet file under a Hive-style partition path. A separate
//! worker hands finished files to remote storage. Station health (load,
//! memory, disk, Wi-Fi, power) can be recorded into a parallel tree.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use opensensor_core::{
//!     BatchWriter, CollectionLoop, LoopSettings, ReadingAssembler, Settings, Shutdown,
//!     SystemClock, detect_channels, HardwarePaths,
//! };
//!
//! let settings = Settings::load(None).unwrap();
//! let c = &settings.collector;
//! let channels = detect_channels(&HardwarePaths::from(c));
//! let assembler = ReadingAssembler::new(
//!     channels.measurement,
//!     channels.heat_source,
//!     c.compensation(),
//!     Arc::new(SystemClock),
//! );
//! let writer = BatchWriter::new(&c.output_dir, &c.station_id).with_compression(c.compression);
//! let mut collector = CollectionLoop::new(assembler, Box::new(writer), LoopSettings::from(c));
//! collector.run(&Shutdown::new());
//! ```
//!
//! ## Architecture
//!
//! Channels → Assembler (+ compensation) → Buffer → Boundary → Writer → Sync
//!
//! A channel that fails never takes the others down: its fields are null for
//! that reading. A batch that fails to write is lost, but sampling continues.
//! A failed upload stays pending for the next sync.

pub mod assembler;
pub mod boundary;
pub mod buffer;
pub mod channel;
pub mod clock;
pub mod collector;
pub mod compensation;
pub mod config;
pub mod drivers;
pub mod error;
pub mod health;
pub mod partition;
pub mod platform;
pub mod reading;
pub mod sync;
pub mod writer;

pub use assembler::ReadingAssembler;
pub use boundary::BoundaryScheduler;
pub use buffer::{Batch, BatchBuffer};
pub use channel::{
    Capability, ChannelInfo, ChannelStatus, FieldSample, HeatSourceChannel, MeasurementChannel,
    SensorChannel, SensorDriver,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{CollectionLoop, LoopSettings, LoopState, LoopStats, Shutdown};
pub use compensation::{CompensationModel, Compensated};
pub use config::{CollectorConfig, Settings, SyncConfig, generate_station_id};
pub use error::{ConfigError, Fault, SyncError, WriteError};
pub use health::{
    HealthMonitor, HealthPaths, HealthSnapshot, HealthWriter, PowerSource, collect_health,
    read_health_file,
};
pub use partition::PartitionKey;
pub use platform::{ChannelSet, HardwarePaths, detect_channels};
pub use reading::{Field, Reading};
pub use sync::{MirrorUploader, SyncReport, SyncStats, SyncTrigger, UploadOutcome, Uploader};
pub use writer::{BatchSink, BatchWriter, Compression, read_batch_file};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
