//! Sensor channel abstraction and per-channel runtime state.
//!
//! Every physical sensor is wrapped in a [`SensorChannel`]. Whether the
//! sensor is usable is decided once, when the channel is built: an
//! [`Capability::Available`] channel dispatches to its driver, an
//! [`Capability::Unavailable`] channel answers every read with
//! [`Fault::Unavailable`] without touching hardware.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::Fault;
use crate::reading::Field;

/// Metadata about a sensor driver.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Unique identifier (e.g. `"weather"`).
    pub name: &'static str,
    /// One-line human-readable description.
    pub description: &'static str,
    /// Fields this channel can produce. Empty for auxiliary channels.
    pub fields: &'static [Field],
}

/// Values produced by one read of a measurement channel.
pub type FieldSample = Vec<(Field, f64)>;

/// Trait that every sensor driver must implement.
///
/// `read` is called once per tick, sequentially with the other channels,
/// so a driver must bound its own latency.
pub trait SensorDriver: Send {
    type Output;

    /// Driver metadata.
    fn info(&self) -> &ChannelInfo;

    /// Perform one read.
    fn read(&mut self) -> Result<Self::Output, Fault>;
}

/// Capability of a channel, fixed at startup.
pub enum Capability<O> {
    Available(Box<dyn SensorDriver<Output = O>>),
    Unavailable { reason: String },
}

/// Diagnostics for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub name: &'static str,
    pub available: bool,
    pub reads: u64,
    pub faults: u64,
    pub last_fault: Option<Fault>,
}

impl ChannelStatus {
    /// Human-readable health label.
    pub fn label(&self) -> &'static str {
        if !self.available {
            "unavailable"
        } else if self.last_fault.is_some() {
            "faulting"
        } else {
            "ok"
        }
    }
}

/// One sensor with its capability and diagnostics.
pub struct SensorChannel<O> {
    capability: Capability<O>,
    status: ChannelStatus,
}

/// A channel producing row fields.
pub type MeasurementChannel = SensorChannel<FieldSample>;

/// A channel producing an auxiliary heat-source temperature (°C).
pub type HeatSourceChannel = SensorChannel<f64>;

impl<O> SensorChannel<O> {
    /// Wrap a working driver.
    pub fn available(driver: Box<dyn SensorDriver<Output = O>>) -> Self {
        let name = driver.info().name;
        Self {
            capability: Capability::Available(driver),
            status: ChannelStatus {
                name,
                available: true,
                reads: 0,
                faults: 0,
                last_fault: None,
            },
        }
    }

    /// A channel whose sensor failed to initialise.
    pub fn unavailable(name: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            capability: Capability::Unavailable {
                reason: reason.clone(),
            },
            status: ChannelStatus {
                name,
                available: false,
                reads: 0,
                faults: 0,
                last_fault: Some(Fault::Unavailable(reason)),
            },
        }
    }

    /// Build from the outcome of a driver initialisation.
    pub fn from_init<D>(name: &'static str, init: Result<D, Fault>) -> Self
    where
        D: SensorDriver<Output = O> + 'static,
    {
        match init {
            Ok(driver) => Self::available(Box::new(driver)),
            Err(e) => Self::unavailable(name, e.to_string()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.status.name
    }

    pub fn is_available(&self) -> bool {
        matches!(self.capability, Capability::Available(_))
    }

    pub fn status(&self) -> &ChannelStatus {
        &self.status
    }

    /// Read once. Never panics and never returns anything but a value or a [`Fault`].
    pub fn read(&mut self) -> Result<O, Fault> {
        let driver = match &mut self.capability {
            Capability::Available(driver) => driver,
            Capability::Unavailable { reason } => {
                return Err(Fault::Unavailable(reason.clone()));
            }
        };

        self.status.reads += 1;
        let result = match catch_unwind(AssertUnwindSafe(|| driver.read())) {
            Ok(r) => r,
            Err(_) => Err(Fault::Panicked),
        };

        match &result {
            Ok(_) => self.status.last_fault = None,
            Err(fault) => {
                self.status.faults += 1;
                self.status.last_fault = Some(fault.clone());
            }
        }
        result
    }
}
