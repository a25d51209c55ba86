//! Simulated environment.
//!
//! Two clock sources: a manual clock that only moves when told to, for the
//! synchronous scenario runner, and tokio's clock, for runtime tests under
//! `start_paused`. Either way the wall clock is a fixed base plus elapsed
//! simulated time, so diagnostic timestamps and synthetic ids reproduce.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use zcret_core::Environment;

/// Deterministic time source.
#[derive(Debug, Clone)]
pub struct SimEnv {
    anchor: Instant,
    tokio_start: Option<tokio::time::Instant>,
    offset: Arc<Mutex<Duration>>,
    wall_base: DateTime<Utc>,
}

impl SimEnv {
    /// Manual clock starting at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            tokio_start: None,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            wall_base: default_wall_base(),
        }
    }

    /// Clock that follows tokio time.
    ///
    /// Create inside a paused runtime; simulated time then advances as tokio
    /// auto-advances past idle timers.
    pub fn tokio() -> Self {
        let start = tokio::time::Instant::now();
        Self { anchor: start.into_std(), tokio_start: Some(start), ..Self::new() }
    }

    /// Replace the wall-clock base.
    pub fn with_wall_clock(mut self, base: DateTime<Utc>) -> Self {
        self.wall_base = base;
        self
    }

    /// Move the manual clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Simulated time since creation.
    pub fn elapsed(&self) -> Duration {
        let manual = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        let auto = self.tokio_start.map(|start| start.elapsed()).unwrap_or_default();
        manual + auto
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.anchor + self.elapsed()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.elapsed()).unwrap_or_default();
        self.wall_base.checked_add_signed(elapsed).unwrap_or(self.wall_base)
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

fn default_wall_base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
