//! The collection loop: tick, assemble, buffer, flush on boundaries.
//!
//! One [`CollectionLoop`] owns the assembler, the buffer and the boundary
//! scheduler, and drives them from a single thread. Written files are handed
//! to the sync worker over a channel; nothing else is shared.
//!
//! ```text
//!  WarmingUp ──(warm-up count reached)──▶ Running ──(shutdown)──▶ Draining ──▶ Stopped
//! ```

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::assembler::ReadingAssembler;
use crate::boundary::BoundaryScheduler;
use crate::buffer::BatchBuffer;
use crate::channel::ChannelStatus;
use crate::clock::Clock;
use crate::config::CollectorConfig;
use crate::health::HealthMonitor;
use crate::writer::BatchSink;

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Stop signal shared between the loop and whoever requests shutdown
/// (Ctrl+C handler, tests). Waking a sleeping loop is immediate.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ---------------------------------------------------------------------------
// Loop configuration and state
// ---------------------------------------------------------------------------

/// Timing parameters of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub read_interval: Duration,
    pub batch_duration_secs: u32,
    pub warmup_readings: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_secs(5),
            batch_duration_secs: 900,
            warmup_readings: 10,
        }
    }
}

impl From<&CollectorConfig> for LoopSettings {
    fn from(c: &CollectorConfig) -> Self {
        Self {
            read_interval: Duration::from_secs(u64::from(c.read_interval_secs)),
            batch_duration_secs: c.batch_duration_secs,
            warmup_readings: c.warmup_readings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    WarmingUp,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WarmingUp => "warming up",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub warmup_discarded: u64,
    pub readings_buffered: u64,
    pub batches_written: u64,
    pub rows_written: u64,
    pub empty_windows: u64,
    pub write_failures: u64,
    pub readings_lost: u64,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct CollectionLoop {
    assembler: ReadingAssembler,
    sink: Box<dyn BatchSink>,
    clock: Arc<dyn Clock>,
    settings: LoopSettings,
    buffer: BatchBuffer,
    scheduler: BoundaryScheduler,
    state: LoopState,
    stats: LoopStats,
    sync_tx: Option<Sender<PathBuf>>,
    health: Option<HealthMonitor>,
}

impl CollectionLoop {
    pub fn new(assembler: ReadingAssembler, sink: Box<dyn BatchSink>, settings: LoopSettings) -> Self {
        let clock = assembler.clock().clone();
        let now = clock.now();
        let scheduler = BoundaryScheduler::new(settings.batch_duration_secs, now);
        info!("first batch boundary at {}", scheduler.next_boundary().format("%H:%M:%S"));
        let state = if settings.warmup_readings > 0 {
            LoopState::WarmingUp
        } else {
            LoopState::Running
        };
        Self {
            assembler,
            sink,
            clock,
            settings,
            buffer: BatchBuffer::new(now),
            scheduler,
            state,
            stats: LoopStats::default(),
            sync_tx: None,
            health: None,
        }
    }

    /// Record health snapshots alongside the batches.
    pub fn with_health(mut self, monitor: HealthMonitor) -> Self {
        self.health = Some(monitor);
        self
    }

    pub fn health(&self) -> Option<&HealthMonitor> {
        self.health.as_ref()
    }

    /// Hand every successfully written path to the sync worker.
    pub fn with_sync(mut self, tx: Sender<PathBuf>) -> Self {
        self.sync_tx = Some(tx);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_boundary(&self) -> DateTime<Utc> {
        self.scheduler.next_boundary()
    }

    pub fn channel_report(&self) -> Vec<ChannelStatus> {
        self.assembler.channel_report()
    }

    /// One sampling tick. Returns the path of a file written by this tick.
    ///
    /// Warm-up readings are discarded before they reach the buffer or the
    /// scheduler's sample count. A reading stamped at or after the pending
    /// boundary closes the current window first, then opens the next one.
    pub fn tick(&mut self) -> Option<PathBuf> {
        if matches!(self.state, LoopState::Draining | LoopState::Stopped) {
            return None;
        }

        let reading = self.assembler.assemble();
        self.stats.ticks += 1;

        let written = self
            .scheduler
            .poll(reading.timestamp())
            .and_then(|boundary| self.flush(boundary));

        if let Some(health) = &mut self.health {
            health.observe(reading.timestamp());
        }

        if self.stats.ticks <= u64::from(self.settings.warmup_readings) {
            self.stats.warmup_discarded += 1;
            debug!(
                "warm-up reading {}/{} discarded",
                self.stats.ticks, self.settings.warmup_readings
            );
            if self.stats.ticks == u64::from(self.settings.warmup_readings) {
                info!("warm-up complete, recording");
                self.state = LoopState::Running;
            }
        } else {
            self.buffer.append(reading);
            self.scheduler.note_sample();
            self.stats.readings_buffered += 1;
        }

        written
    }

    /// Close the current window at `window_end` and write it.
    fn flush(&mut self, window_end: DateTime<Utc>) -> Option<PathBuf> {
        if let Some(health) = &mut self.health {
            health.flush(window_end);
        }
        let batch = self.buffer.drain(window_end);
        let written = if batch.is_empty() {
            warn!(
                "no readings in window ending {}, skipping write",
                window_end.format("%H:%M:%S")
            );
            self.stats.empty_windows += 1;
            None
        } else {
            match self.sink.write(&batch) {
                Ok(path) => {
                    info!("wrote {} readings to {}", batch.len(), path.display());
                    self.stats.batches_written += 1;
                    self.stats.rows_written += batch.len() as u64;
                    self.notify_sync(&path);
                    Some(path)
                }
                Err(e) => {
                    error!(
                        "failed to write batch ending {}: {e} ({} readings lost)",
                        window_end.format("%H:%M:%S"),
                        batch.len()
                    );
                    self.stats.write_failures += 1;
                    self.stats.readings_lost += batch.len() as u64;
                    None
                }
            }
        };
        if !matches!(self.state, LoopState::Draining) {
            info!(
                "next batch boundary at {}",
                self.scheduler.next_boundary().format("%H:%M:%S")
            );
        }
        written
    }

    fn notify_sync(&mut self, path: &std::path::Path) {
        let Some(tx) = &self.sync_tx else { return };
        if tx.send(path.to_path_buf()).is_err() {
            warn!("sync worker has stopped; new files will be found on its next start");
            self.sync_tx = None;
        }
    }

    /// Stop accepting ticks, write whatever is buffered, and stop.
    ///
    /// The partial window ends at the current instant. Dropping the sync
    /// sender afterwards tells the sync worker to do its final pass.
    pub fn drain(&mut self) -> Option<PathBuf> {
        if self.state == LoopState::Stopped {
            return None;
        }
        self.state = LoopState::Draining;
        let now = self.clock.now();
        let window_end = now.max(self.buffer.window_start());
        info!("draining {} buffered readings", self.buffer.len());
        let written = self.flush(window_end);
        self.state = LoopState::Stopped;
        self.sync_tx = None;
        written
    }

    /// Tick at the read interval until `shutdown` fires, then drain.
    ///
    /// Ticks are scheduled from a fixed start so the cadence does not drift
    /// with read latency. A tick that overruns skips the missed slots.
    pub fn run(&mut self, shutdown: &Shutdown) -> LoopStats {
        let interval = self.settings.read_interval.max(Duration::from_millis(1));
        info!(
            "collecting every {}s, {}s batches, {} warm-up readings",
            interval.as_secs_f64(),
            self.settings.batch_duration_secs,
            self.settings.warmup_readings
        );

        let mut next_tick = Instant::now();
        while !shutdown.is_triggered() {
            self.tick();

            next_tick += interval;
            let now = Instant::now();
            let mut skipped = 0u32;
            while next_tick <= now {
                next_tick += interval;
                skipped += 1;
            }
            if skipped > 0 {
                warn!("tick overran the read interval, skipped {skipped} slot(s)");
            }

            if shutdown.wait_timeout(next_tick.saturating_duration_since(Instant::now())) {
                break;
            }
        }

        info!("shutdown requested");
        self.drain();
        info!(
            "stopped: {} ticks, {} batches, {} rows written, {} write failures",
            self.stats.ticks,
            self.stats.batches_written,
            self.stats.rows_written,
            self.stats.write_failures
        );
        self.stats.clone()
    }
}
