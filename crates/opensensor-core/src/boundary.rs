//! Clock-aligned batch boundaries.
//!
//! Boundaries sit on multiples of the duration counted from minute 0 of the
//! current hour, and the top of every hour is always a boundary: a 900 s
//! duration yields :00, :15, :30, :45, while 420 s yields :07, :14 ... :56
//! and then a short window up to :00. Durations of an hour or more fall on
//! every full hour.

use chrono::{DateTime, Duration, Utc};

const HOUR_SECS: i64 = 3600;

/// The first boundary strictly after `now`.
pub fn next_boundary_after(now: DateTime<Utc>, duration_secs: i64) -> DateTime<Utc> {
    let d = duration_secs.max(1);
    let secs = now.timestamp();
    let into_hour = secs.rem_euclid(HOUR_SECS);
    let next = ((into_hour / d + 1) * d).min(HOUR_SECS);
    let whole_second = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()));
    whole_second + Duration::seconds(next - into_hour)
}

/// Tracks the next boundary and the samples taken since the last one.
///
/// Two states: accumulating, and a momentary boundary-reached that is
/// consumed by [`poll`](Self::poll).
#[derive(Debug, Clone)]
pub struct BoundaryScheduler {
    duration_secs: i64,
    next: DateTime<Utc>,
    samples_since_boundary: u64,
}

impl BoundaryScheduler {
    /// Start a run. The first boundary is the next aligned instant after
    /// `now`, so the first batch is usually shorter than the duration.
    pub fn new(batch_duration_secs: u32, now: DateTime<Utc>) -> Self {
        let duration_secs = i64::from(batch_duration_secs.max(1));
        Self {
            duration_secs,
            next: next_boundary_after(now, duration_secs),
            samples_since_boundary: 0,
        }
    }

    pub fn next_boundary(&self) -> DateTime<Utc> {
        self.next
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    pub fn samples_since_boundary(&self) -> u64 {
        self.samples_since_boundary
    }

    /// Count one buffered reading toward the current window.
    pub fn note_sample(&mut self) {
        self.samples_since_boundary += 1;
    }

    /// Consume a crossed boundary.
    ///
    /// Returns the boundary instant the first time `now` reaches it, then
    /// `None` until the next one. If several boundaries were skipped (clock
    /// jump, long stall) they collapse into one, and the next boundary is
    /// recomputed from `now` so the sequence stays strictly increasing.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if now < self.next {
            return None;
        }
        let reached = self.next;
        self.next = next_boundary_after(now, self.duration_secs);
        self.samples_since_boundary = 0;
        Some(reached)
    }

    /// `true` exactly once per boundary crossing.
    pub fn has_reached(&mut self, now: DateTime<Utc>) -> bool {
        self.poll(now).is_some()
    }
}
