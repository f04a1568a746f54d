//! Write one batch of synthetic readings as a partitioned Parquet file.
//!
//! Builds a five-minute window of fake readings, writes it the same way the
//! collector does, and reads it back.
//!
//! Run: `cargo run --example batch_to_parquet`

use chrono::{Duration, DurationRound, Utc};
use opensensor_core::{
    BatchBuffer, BatchSink, BatchWriter, Compression, Field, Reading, generate_station_id,
    read_batch_file,
};

fn main() {
    let output_dir = std::env::temp_dir().join("opensensor-example");
    let station_id = generate_station_id();

    let window_start = Utc::now()
        .duration_trunc(Duration::minutes(5))
        .expect("valid truncation");
    let mut buffer = BatchBuffer::new(window_start);
    for i in 0..60 {
        let t = window_start + Duration::seconds(5 * i);
        let wobble = (i as f64 / 10.0).sin();
        buffer.append(Reading::from_values(
            t,
            &[
                (Field::Temperature, 21.0 + wobble),
                (Field::RawTemperature, 24.0 + wobble),
                (Field::Pressure, 1013.0 + wobble / 2.0),
                (Field::Pm25, 4.0 + wobble.abs()),
            ],
        ));
    }
    let batch = buffer.drain(window_start + Duration::minutes(5));

    let mut writer = BatchWriter::new(&output_dir, station_id).with_compression(Compression::Zstd);
    let path = writer.write(&batch).expect("failed to write batch");
    println!("Wrote {} readings to {}", batch.len(), path.display());

    let rows = read_batch_file(&path).expect("failed to read batch back");
    println!("Read back {} readings", rows.len());
    if let Some(first) = rows.first() {
        println!(
            "First: {} temperature={:?} pm25={:?}",
            first.timestamp().to_rfc3339(),
            first.get(Field::Temperature),
            first.get(Field::Pm25)
        );
    }
}
