//! Integration tests for opensensor-core.
//!
//! These drive the whole pipeline with scripted drivers and a manual clock:
//! channels → assembler → buffer → boundary → Parquet file → sync.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use opensensor_core::{
    BatchWriter, ChannelInfo, Clock, CollectionLoop, CompensationModel, Fault, Field, FieldSample,
    LoopSettings, ManualClock, MirrorUploader, ReadingAssembler, SensorChannel, SensorDriver,
    SyncTrigger, read_batch_file,
};

const STATION: &str = "0193a6f0-7c1e-7d2a-9b1e-3f4c5d6e7f80";

static WEATHER: ChannelInfo = ChannelInfo {
    name: "weather",
    description: "scripted weather sensor",
    fields: &[Field::RawTemperature, Field::RawHumidity, Field::Pressure],
};

static CPU: ChannelInfo = ChannelInfo {
    name: "cpu_temperature",
    description: "scripted heat source",
    fields: &[],
};

struct Weather;

impl SensorDriver for Weather {
    type Output = FieldSample;

    fn info(&self) -> &ChannelInfo {
        &WEATHER
    }

    fn read(&mut self) -> Result<FieldSample, Fault> {
        Ok(vec![
            (Field::RawTemperature, 30.0),
            (Field::RawHumidity, 50.0),
            (Field::Pressure, 1013.25),
        ])
    }
}

struct Cpu;

impl SensorDriver for Cpu {
    type Output = f64;

    fn info(&self) -> &ChannelInfo {
        &CPU
    }

    fn read(&mut self) -> Result<f64, Fault> {
        Ok(50.0)
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 2).unwrap()
}

fn station(clock: Arc<ManualClock>, output: &Path, warmup: u32) -> CollectionLoop {
    let channels = vec![
        SensorChannel::available(Box::new(Weather)),
        SensorChannel::unavailable("particulates", "no serial port"),
    ];
    let clock: Arc<dyn Clock> = clock;
    let assembler = ReadingAssembler::new(
        channels,
        SensorChannel::available(Box::new(Cpu)),
        CompensationModel::new(true, 2.25),
        clock,
    );
    let settings = LoopSettings {
        read_interval: std::time::Duration::from_secs(5),
        batch_duration_secs: 900,
        warmup_readings: warmup,
    };
    CollectionLoop::new(assembler, Box::new(BatchWriter::new(output, STATION)), settings)
}

/// Tick every 5 s until `until` (exclusive of the tick at `until` itself).
fn run_until(collector: &mut CollectionLoop, clock: &ManualClock, until: DateTime<Utc>) {
    while clock.now() < until {
        collector.tick();
        clock.advance(Duration::seconds(5));
    }
}

#[test]
fn quarter_hour_window_lands_in_partitioned_file() {
    let out = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let mut collector = station(clock.clone(), out.path(), 2);

    // 09:00:02 .. 09:14:57 is 180 ticks; the tick at 09:15:02 closes the window.
    run_until(&mut collector, &clock, Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap());
    assert_eq!(collector.stats().batches_written, 0);
    let written = collector.tick().expect("boundary tick writes a file");

    let expected = out.path().join(format!(
        "station={STATION}/year=2025/month=11/day=24/data_0915.parquet"
    ));
    assert_eq!(written, expected);

    let rows = read_batch_file(&written).unwrap();
    assert_eq!(rows.len(), 178, "180 ticks minus 2 warm-up readings");
    let window_start = Utc.with_ymd_and_hms(2025, 11, 24, 9, 0, 0).unwrap();
    let window_end = Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap();
    assert!(rows.iter().all(|r| r.timestamp() >= window_start && r.timestamp() < window_end));
    assert!(rows.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));

    let first = &rows[0];
    // 30 - (50 - 30) / 2.25
    let temperature = first.get(Field::Temperature).unwrap();
    assert!((temperature - 21.1111).abs() < 1e-3, "got {temperature}");
    assert!((first.get(Field::RawTemperature).unwrap() - 30.0).abs() < 1e-3);
    assert!(first.get(Field::Humidity).unwrap() > 50.0);
    assert_eq!(first.get(Field::Pm25), None);
    assert_eq!(first.get(Field::Lux), None);

    // The 09:15:02 reading opened the next window.
    assert_eq!(collector.buffered(), 1);
}

#[test]
fn drain_writes_partial_window_at_shutdown_instant() {
    let out = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let mut collector = station(clock.clone(), out.path(), 0);

    run_until(&mut collector, &clock, Utc.with_ymd_and_hms(2025, 11, 24, 9, 3, 0).unwrap());
    let buffered = collector.buffered();
    assert!(buffered > 0);

    let path = collector.drain().expect("partial window is written");
    assert!(path.ends_with("day=24/data_0903.parquet"), "{}", path.display());
    assert_eq!(read_batch_file(&path).unwrap().len(), buffered);
    assert_eq!(collector.tick(), None);
}

#[test]
fn restart_in_same_window_keeps_earlier_rows() {
    let out = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));

    let mut first = station(clock.clone(), out.path(), 0);
    run_until(&mut first, &clock, Utc.with_ymd_and_hms(2025, 11, 24, 9, 1, 0).unwrap());
    let first_rows = first.buffered();
    // Simulate a crash: nothing is drained.
    drop(first);

    let mut second = station(clock.clone(), out.path(), 0);
    run_until(&mut second, &clock, Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap());
    let second_rows = second.buffered();
    let path = second.tick().unwrap();

    // The crashed run's readings never reached disk; only the second run's do.
    assert_eq!(read_batch_file(&path).unwrap().len(), second_rows);
    assert!(first_rows > 0);

    // A second drain into the same window merges rather than replaces.
    clock.set(Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap());
    let mut third = station(clock.clone(), out.path(), 0);
    third.tick();
    let merged = third.drain().unwrap();
    assert_eq!(merged, path);
    assert_eq!(read_batch_file(&merged).unwrap().len(), second_rows + 1);
}

#[test]
fn written_files_reach_the_mirror_on_shutdown() {
    let out = tempfile::tempdir().unwrap();
    let mirror = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));

    let sync_clock: Arc<dyn Clock> = clock.clone();
    let trigger = SyncTrigger::new(
        out.path(),
        15,
        Box::new(MirrorUploader::new(mirror.path())),
        sync_clock,
    )
    .with_prefix(Some("raw".into()));
    let (tx, worker) = trigger.spawn().unwrap();

    let mut collector = station(clock.clone(), out.path(), 0).with_sync(tx);
    run_until(&mut collector, &clock, Utc.with_ymd_and_hms(2025, 11, 24, 9, 15, 0).unwrap());
    let first = collector.tick().unwrap();
    clock.advance(Duration::seconds(60));
    let second = collector.drain().unwrap();
    assert_ne!(first, second);

    let stats = worker.join().unwrap();
    assert_eq!(stats.uploaded, 2);

    for local in [&first, &second] {
        let rel = local.strip_prefix(out.path()).unwrap();
        let remote = mirror.path().join("raw").join(rel);
        assert_eq!(std::fs::read(local).unwrap(), std::fs::read(remote).unwrap());
    }
}

#[test]
fn faulting_channel_nulls_only_its_fields() {
    struct Flaky(u32);
    impl SensorDriver for Flaky {
        type Output = FieldSample;
        fn info(&self) -> &ChannelInfo {
            &WEATHER
        }
        fn read(&mut self) -> Result<FieldSample, Fault> {
            self.0 += 1;
            if self.0 % 2 == 0 {
                Err(Fault::Timeout)
            } else {
                Ok(vec![(Field::RawTemperature, 20.0), (Field::RawHumidity, 40.0)])
            }
        }
    }

    let out = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let assembler = ReadingAssembler::new(
        vec![SensorChannel::available(Box::new(Flaky(0)))],
        SensorChannel::unavailable("cpu_temperature", "no thermal zone"),
        CompensationModel::new(false, 2.25),
        dyn_clock,
    );
    let settings = LoopSettings {
        warmup_readings: 0,
        ..LoopSettings::default()
    };
    let mut collector = CollectionLoop::new(assembler, Box::new(BatchWriter::new(out.path(), STATION)), settings);
    for _ in 0..4 {
        collector.tick();
        clock.advance(Duration::seconds(5));
    }
    let rows = read_batch_file(&collector.drain().unwrap()).unwrap();
    assert_eq!(rows.len(), 4);
    let present: Vec<bool> = rows.iter().map(|r| r.get(Field::RawTemperature).is_some()).collect();
    assert_eq!(present, [true, false, true, false]);
    // Compensation off: temperature mirrors the raw value.
    assert_eq!(rows[0].get(Field::Temperature), Some(20.0));
    assert!(rows[1].is_all_null());
}

#[test]
fn missing_heat_source_still_yields_compensated_fields() {
    let out = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let assembler = ReadingAssembler::new(
        vec![SensorChannel::available(Box::new(Weather))],
        SensorChannel::unavailable("cpu_temperature", "no thermal zone"),
        CompensationModel::new(true, 2.25),
        dyn_clock,
    );
    let settings = LoopSettings {
        warmup_readings: 0,
        ..LoopSettings::default()
    };
    let mut collector =
        CollectionLoop::new(assembler, Box::new(BatchWriter::new(out.path(), STATION)), settings);
    for _ in 0..3 {
        collector.tick();
        clock.advance(Duration::seconds(5));
    }
    let rows = read_batch_file(&collector.drain().unwrap()).unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        // 30 - (40 - 30) / 2.25 with the default fallback heat-source temperature
        let temperature = row.get(Field::Temperature).expect("temperature");
        assert!((temperature - 25.5556).abs() < 1e-3, "got {temperature}");
        assert!(row.get(Field::Humidity).is_some());
    }
}
