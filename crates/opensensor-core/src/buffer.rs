//! Append-only reading buffer and the closed [`Batch`] it drains into.

use chrono::{DateTime, Utc};

use crate::reading::Reading;

/// A closed group of readings destined for one output file.
///
/// Readings are in non-decreasing timestamp order. There is no way to add to a
/// batch once it has been drained.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    readings: Vec<Reading>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

impl Batch {
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// The boundary (or shutdown instant) that closed this batch.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }
}

/// Accumulates readings between two boundaries.
#[derive(Debug)]
pub struct BatchBuffer {
    readings: Vec<Reading>,
    window_start: DateTime<Utc>,
}

impl BatchBuffer {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            readings: Vec::new(),
            window_start,
        }
    }

    /// Append one reading. A reading older than the last buffered one is
    /// restamped to keep the buffer ordered.
    pub fn append(&mut self, mut reading: Reading) {
        if let Some(last) = self.readings.last() {
            if reading.timestamp() < last.timestamp() {
                reading = reading.restamped(last.timestamp());
            }
        }
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Close the current window at `window_end` and start the next one there.
    ///
    /// Takes `&mut self`, so no caller can observe a half-drained buffer.
    pub fn drain(&mut self, window_end: DateTime<Utc>) -> Batch {
        let readings = std::mem::take(&mut self.readings);
        let window_start = std::mem::replace(&mut self.window_start, window_end);
        Batch {
            readings,
            window_start,
            window_end,
        }
    }
}
