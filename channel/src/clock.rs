//! Timer capability used for reconnection backoff, keep-alive ticks and
//! refresh cycles. Injected everywhere so timing logic can be driven by
//! tokio's paused clock in tests.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

pub trait Scheduler: Send + Sync {
    /// A future that resolves once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Wall-clock time, used to stamp snapshots.
    fn now(&self) -> DateTime<Utc>;
}

/// Scheduler backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
