//! Environment abstraction for time.
//!
//! State machines never read clocks themselves. Production passes the system
//! clocks; simulations pass a manually advanced clock so reconnection delays
//! and timeouts are reproducible.

use std::{future::Future, time::{Duration, Instant}};

use chrono::{DateTime, Utc};

/// Source of time for the session.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current monotonic instant, used for timeouts and heartbeats.
    fn now(&self) -> Instant;

    /// Current wall-clock time, used for diagnostics and synthetic ids.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Sleep for `duration`. Drives reconnection delays in the runtime.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
