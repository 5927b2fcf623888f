//! Cancelable repeating timer
//!
//! Each timer is its own task with its own cancellation token, so
//! cancelling the gate countdown never touches the monitoring interval
//! and vice versa. [`RepeatingTimer::cancel`] stops future ticks and lets
//! a tick that is already running complete, so a tick may cancel its own
//! timer. [`RepeatingTimer::abort`] also drops the running tick at its
//! next await point, for teardown.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Whether a timer keeps ticking after the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// A periodic task, first tick one period after start.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct RepeatingTimer {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RepeatingTimer {
    /// Spawn a timer on the current runtime.
    pub fn start<F, Fut>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if on_tick().await == TickControl::Stop {
                    break;
                }
            }
            trace!(timer = name, "Timer finished");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop future ticks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop future ticks and drop the tick in progress, if any.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    /// Whether the timer may still tick.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
