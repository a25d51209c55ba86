//! Production environment backed by the tokio clock.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use zcret_core::Environment;

/// Real time: tokio's monotonic clock and the system wall clock.
///
/// Monotonic time comes from `tokio::time`, so a paused test runtime also
/// pauses the session's timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
