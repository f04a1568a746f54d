//! Channel discovery: open every driver once and fix each channel's capability.

use std::path::PathBuf;

use log::{info, warn};

use crate::channel::{HeatSourceChannel, MeasurementChannel, SensorChannel};
use crate::config::CollectorConfig;
use crate::drivers::iio::{GasDriver, IIO_ROOT, LightDriver, WeatherDriver};
use crate::drivers::pms5003::Pms5003;
use crate::drivers::thermal::{CpuThermal, THERMAL_ZONE};

/// Where to look for hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwarePaths {
    pub iio_root: PathBuf,
    pub thermal_zone: PathBuf,
    pub pms5003_device: PathBuf,
}

impl Default for HardwarePaths {
    fn default() -> Self {
        Self {
            iio_root: PathBuf::from(IIO_ROOT),
            thermal_zone: PathBuf::from(THERMAL_ZONE),
            pms5003_device: PathBuf::from("/dev/serial0"),
        }
    }
}

impl From<&CollectorConfig> for HardwarePaths {
    fn from(c: &CollectorConfig) -> Self {
        Self {
            pms5003_device: c.pms5003_device.clone(),
            ..Self::default()
        }
    }
}

/// Every channel of the station.
pub struct ChannelSet {
    pub measurement: Vec<MeasurementChannel>,
    pub heat_source: HeatSourceChannel,
}

impl ChannelSet {
    pub fn available_count(&self) -> usize {
        self.measurement.iter().filter(|c| c.is_available()).count()
            + usize::from(self.heat_source.is_available())
    }

    pub fn total(&self) -> usize {
        self.measurement.len() + 1
    }
}

/// Open all drivers. A sensor that fails here stays unavailable for the run.
pub fn detect_channels(paths: &HardwarePaths) -> ChannelSet {
    let measurement = vec![
        SensorChannel::from_init("weather", WeatherDriver::open(&paths.iio_root)),
        SensorChannel::from_init("gas", GasDriver::open(&paths.iio_root)),
        SensorChannel::from_init("light", LightDriver::open(&paths.iio_root)),
        SensorChannel::from_init("particulates", Pms5003::open(&paths.pms5003_device)),
    ];
    let heat_source = SensorChannel::from_init("cpu_temperature", CpuThermal::open(&paths.thermal_zone));

    let set = ChannelSet {
        measurement,
        heat_source,
    };
    for status in set
        .measurement
        .iter()
        .map(SensorChannel::status)
        .chain(std::iter::once(set.heat_source.status()))
    {
        match &status.last_fault {
            Some(fault) if !status.available => warn!("{}: {fault}", status.name),
            _ => info!("{}: ready", status.name),
        }
    }
    info!("{}/{} channels available", set.available_count(), set.total());
    set
}
