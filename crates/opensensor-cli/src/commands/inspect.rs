//! `opensensor inspect`: summarise a written batch file.

use std::path::Path;

use chrono::{DateTime, Utc};
use opensensor_core::{Field, Reading, read_batch_file};

/// What a batch file holds.
#[derive(Debug, PartialEq)]
struct Summary {
    rows: usize,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    /// Non-null values per field, in column order.
    coverage: Vec<(Field, usize)>,
}

fn summarize(readings: &[Reading]) -> Summary {
    let coverage = Field::ALL
        .iter()
        .map(|&f| (f, readings.iter().filter(|r| r.get(f).is_some()).count()))
        .collect();
    Summary {
        rows: readings.len(),
        first: readings.iter().map(Reading::timestamp).min(),
        last: readings.iter().map(Reading::timestamp).max(),
        coverage,
    }
}

pub fn run(path: &Path, print_rows: bool) {
    let readings = match read_batch_file(path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to read {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    let summary = summarize(&readings);

    println!("File:  {}", path.display());
    println!("Rows:  {}", summary.rows);
    if let (Some(first), Some(last)) = (summary.first, summary.last) {
        println!("First: {}", first.to_rfc3339());
        println!("Last:  {}", last.to_rfc3339());
    }
    println!();
    println!("  {:<16} {:>8}", "Field", "Present");
    println!("  {}", "-".repeat(25));
    for (field, count) in &summary.coverage {
        println!("  {:<16} {:>8}", field.name(), count);
    }

    if print_rows {
        println!();
        for r in &readings {
            match serde_json::to_string(r) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("Failed to encode row: {e}"),
            }
        }
    }
}
