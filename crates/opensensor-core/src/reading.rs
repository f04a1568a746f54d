//! One sample instant: a timestamp plus one nullable scalar per measured quantity.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Measured quantity. The declaration order is the column order of written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Compensated temperature (°C). Equals `RawTemperature` when compensation is off.
    Temperature,
    /// Temperature as reported by the sensor (°C).
    RawTemperature,
    /// Barometric pressure (hPa).
    Pressure,
    /// Compensated relative humidity (%).
    Humidity,
    /// Relative humidity as reported by the sensor (%).
    RawHumidity,
    /// Oxidising gas sensor resistance (kΩ).
    Oxidised,
    /// Reducing gas sensor resistance (kΩ).
    Reducing,
    /// NH3 gas sensor resistance (kΩ).
    Nh3,
    /// Ambient light (lux).
    Lux,
    /// Proximity (raw counts).
    Proximity,
    /// PM1.0 (µg/m³).
    Pm1,
    /// PM2.5 (µg/m³).
    Pm25,
    /// PM10 (µg/m³).
    Pm10,
    /// Particles > 0.3 µm per 0.1 L of air.
    Particles03um,
    /// Particles > 0.5 µm per 0.1 L of air.
    Particles05um,
    /// Particles > 1.0 µm per 0.1 L of air.
    Particles10um,
    /// Particles > 2.5 µm per 0.1 L of air.
    Particles25um,
    /// Particles > 5.0 µm per 0.1 L of air.
    Particles50um,
    /// Particles > 10 µm per 0.1 L of air.
    Particles100um,
}

impl Field {
    pub const COUNT: usize = 19;

    /// Every field, in column order.
    pub const ALL: [Field; Self::COUNT] = [
        Self::Temperature,
        Self::RawTemperature,
        Self::Pressure,
        Self::Humidity,
        Self::RawHumidity,
        Self::Oxidised,
        Self::Reducing,
        Self::Nh3,
        Self::Lux,
        Self::Proximity,
        Self::Pm1,
        Self::Pm25,
        Self::Pm10,
        Self::Particles03um,
        Self::Particles05um,
        Self::Particles10um,
        Self::Particles25um,
        Self::Particles50um,
        Self::Particles100um,
    ];

    /// Column name in written files.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::RawTemperature => "raw_temperature",
            Self::Pressure => "pressure",
            Self::Humidity => "humidity",
            Self::RawHumidity => "raw_humidity",
            Self::Oxidised => "oxidised",
            Self::Reducing => "reducing",
            Self::Nh3 => "nh3",
            Self::Lux => "lux",
            Self::Proximity => "proximity",
            Self::Pm1 => "pm1",
            Self::Pm25 => "pm25",
            Self::Pm10 => "pm10",
            Self::Particles03um => "particles_03um",
            Self::Particles05um => "particles_05um",
            Self::Particles10um => "particles_10um",
            Self::Particles25um => "particles_25um",
            Self::Particles50um => "particles_50um",
            Self::Particles100um => "particles_100um",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single sample. Built by the assembler, then immutable once buffered.
///
/// A field is either a real measurement or `None`; there is no stale or
/// partially-written state.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    values: [Option<f64>; Field::COUNT],
}

impl Reading {
    /// A reading with every field faulted.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: [None; Field::COUNT],
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.values[field.index()]
    }

    /// Set a field. Non-finite values are stored as a fault.
    pub(crate) fn set(&mut self, field: Field, value: Option<f64>) {
        self.values[field.index()] = value.filter(|v| v.is_finite());
    }

    /// Build a reading from explicit values (fields not listed are null).
    pub fn from_values(timestamp: DateTime<Utc>, values: &[(Field, f64)]) -> Self {
        let mut reading = Self::empty(timestamp);
        for &(field, value) in values {
            reading.set(field, Some(value));
        }
        reading
    }

    /// The same values under a different timestamp.
    pub(crate) fn restamped(self, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, ..self }
    }

    /// Number of non-null fields.
    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_all_null(&self) -> bool {
        self.present_count() == 0
    }

    /// `(field, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, Option<f64>)> + '_ {
        Field::ALL.iter().map(move |&f| (f, self.get(f)))
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Field::COUNT + 1))?;
        map.serialize_entry("timestamp", &self.timestamp.to_rfc3339())?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.name(), &value)?;
        }
        map.end()
    }
}
