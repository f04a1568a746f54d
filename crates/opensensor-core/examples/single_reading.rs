//! Take one reading from whatever sensors this machine has.
//!
//! Detects the station's channels, reads each once, and prints every field
//! plus the health of each channel.
//!
//! Run: `cargo run --example single_reading`

use std::sync::Arc;

use opensensor_core::{
    CompensationModel, HardwarePaths, ReadingAssembler, SystemClock, detect_channels,
};

fn main() {
    let channels = detect_channels(&HardwarePaths::default());
    println!(
        "Channels available: {}/{}",
        channels.available_count(),
        channels.total()
    );

    let mut assembler = ReadingAssembler::new(
        channels.measurement,
        channels.heat_source,
        CompensationModel::default(),
        Arc::new(SystemClock),
    );
    let reading = assembler.assemble();

    println!("\nReading at {}", reading.timestamp().to_rfc3339());
    for (field, value) in reading.iter() {
        match value {
            Some(v) => println!("  {:<16} {v:>10.2}", field.name()),
            None => println!("  {:<16} {:>10}", field.name(), "-"),
        }
    }

    println!();
    for status in assembler.channel_report() {
        println!("  {:<16} {}", status.name, status.label());
    }
}
