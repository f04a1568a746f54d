//! IIO sysfs drivers: BME280 weather, ADS1015-backed MICS6814 gas, LTR559 light.
//!
//! Each IIO device is a directory under `/sys/bus/iio/devices` with a `name`
//! attribute. A channel is exposed either processed (`<chan>_input`) or as
//! `<chan>_raw` with optional `_offset` and `_scale`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::channel::{ChannelInfo, FieldSample, SensorDriver};
use crate::error::Fault;
use crate::reading::Field;

use super::{partial_sample, read_attr, read_number};

/// Default location of IIO devices.
pub const IIO_ROOT: &str = "/sys/bus/iio/devices";

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IioDevice {
    dir: PathBuf,
}

impl IioDevice {
    /// Find the device whose `name` attribute equals `name`.
    pub fn find(root: &Path, name: &str) -> Result<Self, Fault> {
        let entries = fs::read_dir(root)
            .map_err(|e| Fault::Unavailable(format!("{}: {e}", root.display())))?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if read_attr(&dir.join("name")).is_ok_and(|n| n == name) {
                return Ok(Self { dir });
            }
        }
        Err(Fault::Unavailable(format!(
            "no IIO device named '{name}' under {}",
            root.display()
        )))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn attr(&self, attr: &str) -> PathBuf {
        self.dir.join(attr)
    }

    /// Read a channel in its kernel-reported unit.
    ///
    /// Uses `<chan>_input` when present, otherwise `(raw + offset) * scale`.
    /// Offset and scale fall back to the type-wide attribute
    /// (`in_voltage_scale` for `in_voltage4`) and then to 0 and 1.
    pub fn read_scaled(&self, channel: &str) -> Result<f64, Fault> {
        let input = self.attr(&format!("{channel}_input"));
        if input.exists() {
            return read_number(&input);
        }
        let raw = read_number(&self.attr(&format!("{channel}_raw")))?;
        let offset = self.optional(channel, "offset")?.unwrap_or(0.0);
        let scale = self.optional(channel, "scale")?.unwrap_or(1.0);
        Ok((raw + offset) * scale)
    }

    fn optional(&self, channel: &str, suffix: &str) -> Result<Option<f64>, Fault> {
        let shared = channel.trim_end_matches(|c: char| c.is_ascii_digit());
        for name in [channel, shared] {
            let path = self.attr(&format!("{name}_{suffix}"));
            if path.exists() {
                return read_number(&path).map(Some);
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// BME280 weather
// ---------------------------------------------------------------------------

static WEATHER_INFO: ChannelInfo = ChannelInfo {
    name: "weather",
    description: "BME280 temperature, pressure and humidity",
    fields: &[Field::RawTemperature, Field::Pressure, Field::RawHumidity],
};

pub struct WeatherDriver {
    dev: IioDevice,
}

impl WeatherDriver {
    pub const DEVICE: &'static str = "bme280";

    pub fn open(iio_root: &Path) -> Result<Self, Fault> {
        let dev = IioDevice::find(iio_root, Self::DEVICE)?;
        let driver = Self { dev };
        driver.sample()?;
        Ok(driver)
    }

    fn sample(&self) -> Result<FieldSample, Fault> {
        // IIO units: milli-degrees C, kPa, milli-percent.
        partial_sample([
            (
                Field::RawTemperature,
                self.dev.read_scaled("in_temp").map(|t| t / 1000.0),
            ),
            (
                Field::Pressure,
                self.dev.read_scaled("in_pressure").map(|p| p * 10.0),
            ),
            (
                Field::RawHumidity,
                self.dev
                    .read_scaled("in_humidityrelative")
                    .map(|h| h / 1000.0),
            ),
        ])
    }
}

impl SensorDriver for WeatherDriver {
    type Output = FieldSample;

    fn info(&self) -> &ChannelInfo {
        &WEATHER_INFO
    }

    fn read(&mut self) -> Result<FieldSample, Fault> {
        self.sample()
    }
}

// ---------------------------------------------------------------------------
// MICS6814 gas through ADS1015
// ---------------------------------------------------------------------------

static GAS_INFO: ChannelInfo = ChannelInfo {
    name: "gas",
    description: "MICS6814 oxidising, reducing and NH3 resistances via ADS1015",
    fields: &[Field::Oxidised, Field::Reducing, Field::Nh3],
};

/// Supply voltage of the gas sensor divider.
const GAS_SUPPLY_VOLTS: f64 = 3.3;
/// Load resistor of the gas sensor divider (ohms).
const GAS_LOAD_OHMS: f64 = 56_000.0;

/// Sensor resistance in kΩ from the divider voltage.
pub fn gas_resistance_kohms(volts: f64) -> Result<f64, Fault> {
    if !(0.0..GAS_SUPPLY_VOLTS).contains(&volts) {
        return Err(Fault::InvalidValue(format!(
            "divider voltage {volts:.3} V outside 0..{GAS_SUPPLY_VOLTS} V"
        )));
    }
    Ok(volts * GAS_LOAD_OHMS / (GAS_SUPPLY_VOLTS - volts) / 1000.0)
}

pub struct GasDriver {
    dev: IioDevice,
}

impl GasDriver {
    pub const DEVICE: &'static str = "ads1015";

    /// Single-ended inputs AIN0..AIN2 (the driver numbers them 4..6).
    const CHANNELS: [(Field, &'static str); 3] = [
        (Field::Oxidised, "in_voltage4"),
        (Field::Reducing, "in_voltage5"),
        (Field::Nh3, "in_voltage6"),
    ];

    pub fn open(iio_root: &Path) -> Result<Self, Fault> {
        let dev = IioDevice::find(iio_root, Self::DEVICE)?;
        let driver = Self { dev };
        driver.sample()?;
        Ok(driver)
    }

    fn sample(&self) -> Result<FieldSample, Fault> {
        partial_sample(Self::CHANNELS.iter().map(|&(field, chan)| {
            // Scale is in millivolts.
            let value = self
                .dev
                .read_scaled(chan)
                .and_then(|mv| gas_resistance_kohms(mv / 1000.0));
            (field, value)
        }))
    }
}

impl SensorDriver for GasDriver {
    type Output = FieldSample;

    fn info(&self) -> &ChannelInfo {
        &GAS_INFO
    }

    fn read(&mut self) -> Result<FieldSample, Fault> {
        self.sample()
    }
}

// ---------------------------------------------------------------------------
// LTR559 light and proximity
// ---------------------------------------------------------------------------

static LIGHT_INFO: ChannelInfo = ChannelInfo {
    name: "light",
    description: "LTR559 ambient light and proximity",
    fields: &[Field::Lux, Field::Proximity],
};

pub struct LightDriver {
    dev: IioDevice,
}

impl LightDriver {
    pub const DEVICE: &'static str = "ltr559";

    pub fn open(iio_root: &Path) -> Result<Self, Fault> {
        let dev = IioDevice::find(iio_root, Self::DEVICE)?;
        let driver = Self { dev };
        driver.sample()?;
        Ok(driver)
    }

    fn sample(&self) -> Result<FieldSample, Fault> {
        partial_sample([
            (Field::Lux, self.dev.read_scaled("in_illuminance")),
            (Field::Proximity, self.dev.read_scaled("in_proximity")),
        ])
    }
}

impl SensorDriver for LightDriver {
    type Output = FieldSample;

    fn info(&self) -> &ChannelInfo {
        &LIGHT_INFO
    }

    fn read(&mut self) -> Result<FieldSample, Fault> {
        self.sample()
    }
}
