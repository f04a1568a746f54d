//! Builds one [`Reading`] per tick from every channel.
//!
//! Channels are read one after another (they share a bus). A fault on one
//! channel only nulls that channel's fields; the others are still recorded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::channel::{ChannelStatus, HeatSourceChannel, MeasurementChannel};
use crate::clock::Clock;
use crate::compensation::CompensationModel;
use crate::reading::{Field, Reading};

/// Fields the assembler derives itself; drivers cannot set them.
const DERIVED: [Field; 2] = [Field::Temperature, Field::Humidity];

pub struct ReadingAssembler {
    channels: Vec<MeasurementChannel>,
    heat_source: HeatSourceChannel,
    compensation: CompensationModel,
    clock: Arc<dyn Clock>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ReadingAssembler {
    pub fn new(
        channels: Vec<MeasurementChannel>,
        heat_source: HeatSourceChannel,
        compensation: CompensationModel,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channels,
            heat_source,
            compensation,
            clock,
            last_timestamp: None,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn compensation(&self) -> &CompensationModel {
        &self.compensation
    }

    /// Read every channel once and produce one reading.
    ///
    /// The timestamp is taken at acquisition time and never goes backwards
    /// within a run, even if the wall clock is stepped back.
    pub fn assemble(&mut self) -> Reading {
        let now = self.clock.now();
        let timestamp = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        let mut reading = Reading::empty(timestamp);

        match self.heat_source.read() {
            Ok(celsius) => self.compensation.push_aux(celsius),
            Err(fault) if !fault.is_unavailable() => {
                debug!("{}: {fault}", self.heat_source.name());
            }
            Err(_) => {}
        }

        for channel in &mut self.channels {
            match channel.read() {
                Ok(sample) => {
                    for (field, value) in sample {
                        if !DERIVED.contains(&field) {
                            reading.set(field, Some(value));
                        }
                    }
                }
                Err(fault) if !fault.is_unavailable() => {
                    debug!("{}: {fault}", channel.name());
                }
                Err(_) => {}
            }
        }

        let derived = self.compensation.apply(
            reading.get(Field::RawTemperature),
            reading.get(Field::RawHumidity),
        );
        reading.set(Field::Temperature, derived.temperature);
        reading.set(Field::Humidity, derived.humidity);

        debug!(
            "reading at {}: {}/{} fields",
            timestamp.format("%H:%M:%S"),
            reading.present_count(),
            Field::COUNT
        );
        reading
    }

    /// Diagnostics for every channel, heat source last.
    pub fn channel_report(&self) -> Vec<ChannelStatus> {
        self.channels
            .iter()
            .map(|c| c.status().clone())
            .chain(std::iter::once(self.heat_source.status().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelInfo, FieldSample, SensorChannel, SensorDriver};
    use crate::clock::ManualClock;
    use crate::error::Fault;
    use chrono::{Duration, TimeZone};

    static WEATHER: ChannelInfo = ChannelInfo {
        name: "weather",
        description: "fixed",
        fields: &[Field::RawTemperature, Field::Pressure, Field::RawHumidity],
    };

    static LIGHT: ChannelInfo = ChannelInfo {
        name: "light",
        description: "always faults",
        fields: &[Field::Lux, Field::Proximity],
    };

    static CPU: ChannelInfo = ChannelInfo {
        name: "cpu",
        description: "fixed",
        fields: &[],
    };

    struct FixedWeather;

    impl SensorDriver for FixedWeather {
        type Output = FieldSample;
        fn info(&self) -> &ChannelInfo {
            &WEATHER
        }
        fn read(&mut self) -> Result<FieldSample, Fault> {
            Ok(vec![
                (Field::RawTemperature, 25.0),
                (Field::Pressure, 1013.0),
                (Field::RawHumidity, 60.0),
                // Drivers cannot smuggle in derived fields.
                (Field::Temperature, -99.0),
            ])
        }
    }

    struct BrokenLight;

    impl SensorDriver for BrokenLight {
        type Output = FieldSample;
        fn info(&self) -> &ChannelInfo {
            &LIGHT
        }
        fn read(&mut self) -> Result<FieldSample, Fault> {
            Err(Fault::Timeout)
        }
    }

    struct FixedCpu(f64);

    impl SensorDriver for FixedCpu {
        type Output = f64;
        fn info(&self) -> &ChannelInfo {
            &CPU
        }
        fn read(&mut self) -> Result<f64, Fault> {
            Ok(self.0)
        }
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 0).unwrap()
    }

    fn assembler(enabled: bool, clock: Arc<ManualClock>) -> ReadingAssembler {
        ReadingAssembler::new(
            vec![
                SensorChannel::available(Box::new(FixedWeather)),
                SensorChannel::available(Box::new(BrokenLight)),
                SensorChannel::unavailable("particulates", "no serial port"),
            ],
            SensorChannel::available(Box::new(FixedCpu(30.0))),
            CompensationModel::new(enabled, 2.25),
            clock,
        )
    }

    #[test]
    fn test_fault_isolation_keeps_other_channels() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut a = assembler(false, clock);
        let r = a.assemble();
        assert_eq!(r.get(Field::Pressure), Some(1013.0));
        assert_eq!(r.get(Field::Lux), None);
        assert_eq!(r.get(Field::Pm25), None);
    }

    #[test]
    fn test_compensation_applied_to_raw_pair() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut a = assembler(true, clock);
        let r = a.assemble();
        assert_eq!(r.get(Field::RawTemperature), Some(25.0));
        let t = r.get(Field::Temperature).unwrap();
        assert!((t - (25.0 - 5.0 / 2.25)).abs() < 1e-9);
        assert_eq!(r.get(Field::RawHumidity), Some(60.0));
        assert!(r.get(Field::Humidity).unwrap() > 60.0);
    }

    #[test]
    fn test_missing_heat_source_falls_back_to_default_temperature() {
        static WARM: ChannelInfo = ChannelInfo {
            name: "weather",
            description: "fixed",
            fields: &[Field::RawTemperature, Field::RawHumidity],
        };
        struct Warm;
        impl SensorDriver for Warm {
            type Output = FieldSample;
            fn info(&self) -> &ChannelInfo {
                &WARM
            }
            fn read(&mut self) -> Result<FieldSample, Fault> {
                Ok(vec![(Field::RawTemperature, 25.0), (Field::RawHumidity, 50.0)])
            }
        }

        let clock = Arc::new(ManualClock::new(start()));
        let mut a = ReadingAssembler::new(
            vec![SensorChannel::available(Box::new(Warm))],
            SensorChannel::unavailable("cpu_temperature", "no thermal zone"),
            CompensationModel::new(true, 2.25),
            clock,
        );
        for _ in 0..3 {
            let r = a.assemble();
            assert_eq!(r.get(Field::RawTemperature), Some(25.0));
            assert_eq!(r.get(Field::RawHumidity), Some(50.0));
            // 25 - (40 - 25) / 2.25
            let t = r.get(Field::Temperature).expect("derived temperature");
            assert!((t - 18.333_333).abs() < 1e-5, "got {t}");
            let h = r.get(Field::Humidity).expect("derived humidity");
            assert!(h > 50.0 && h <= 100.0, "got {h}");
        }
        assert!(a.compensation().aux_window().is_empty());
    }

    #[test]
    fn test_disabled_compensation_copies_raw() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut a = assembler(false, clock);
        let r = a.assemble();
        assert_eq!(r.get(Field::Temperature), Some(25.0));
        assert!((r.get(Field::Humidity).unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_taken_from_clock_and_never_regresses() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut a = assembler(false, clock.clone());
        let first = a.assemble().timestamp();
        assert_eq!(first, start());

        clock.advance(Duration::seconds(5));
        assert_eq!(a.assemble().timestamp(), start() + Duration::seconds(5));

        // Wall clock stepped back by NTP
        clock.set(start() - Duration::seconds(30));
        assert_eq!(a.assemble().timestamp(), start() + Duration::seconds(5));
    }

    #[test]
    fn test_channel_report_marks_unavailable() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut a = assembler(false, clock);
        a.assemble();
        let report = a.channel_report();
        assert_eq!(report.len(), 4);
        let pm = report.iter().find(|s| s.name == "particulates").unwrap();
        assert_eq!(pm.label(), "unavailable");
        let light = report.iter().find(|s| s.name == "light").unwrap();
        assert_eq!(light.faults, 1);
        assert_eq!(report.last().unwrap().name, "cpu");
    }
}
