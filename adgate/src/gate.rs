//! Gate and countdown
//!
//! While the gate is shown a one-second countdown runs. At zero the
//! browsing context is sent to the redirect target; this is terminal.
//! A dismissal cancels the countdown, hides the gate, waits out the
//! grace delay, then runs one fresh detection cycle:
//!
//! ```text
//! DismissRequested
//!   ├─ cancel countdown, hide gate         (synchronous)
//!   ├─ sleep(grace_delay)
//!   └─ detect_fresh()            (waits out any cycle already running)
//!        ├─ blocked     → show gate with a fresh countdown
//!        └─ not blocked → remove gate, resume monitoring
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::monitor::{ControllerState, Inner, MonitorState};
use crate::timer::{RepeatingTimer, TickControl};

/// User-facing gate events raised by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateEvent {
    /// The user asked for a recheck ("I've turned it off" or "Close")
    DismissRequested,
    /// The countdown reached zero
    TimeoutExpired,
}

/// The countdown attached to a visible gate.
#[derive(Debug)]
pub(crate) struct GateTimer {
    pub(crate) id: u64,
    pub(crate) remaining: u32,
    timer: RepeatingTimer,
}

impl GateTimer {
    pub(crate) fn cancel(&self) {
        self.timer.cancel();
    }

    pub(crate) fn abort(&self) {
        self.timer.abort();
    }
}

impl Inner {
    /// Render the gate and start a fresh countdown. Idempotent while shown.
    ///
    /// A render failure leaves the gate hidden and keeps monitoring alive.
    pub(crate) fn show_gate_locked(self: &Arc<Self>, st: &mut ControllerState) -> bool {
        if st.gate_visible {
            return true;
        }
        if st.redirected {
            return false;
        }

        let seconds = self.config.timeout_seconds;
        if let Err(e) = self.view.render(&self.config.message, seconds) {
            error!(error = %e, "Failed to render gate; monitoring continues");
            self.start_monitoring_locked(st);
            return false;
        }

        st.gate_visible = true;
        st.gate_rendered = true;
        if let Some(monitor) = st.monitor.take() {
            monitor.cancel();
        }
        self.start_countdown_locked(st, seconds);
        st.state = MonitorState::Gated;
        info!(seconds, "Gate shown");
        true
    }

    fn start_countdown_locked(self: &Arc<Self>, st: &mut ControllerState, seconds: u32) {
        if let Some(previous) = st.countdown.take() {
            previous.cancel();
        }

        let id = st.next_timer_id();
        let weak = Arc::downgrade(self);
        let timer = RepeatingTimer::start("gate_countdown", Duration::from_secs(1), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.on_countdown_tick(id),
                    None => TickControl::Stop,
                }
            }
        });

        st.countdown = Some(GateTimer {
            id,
            remaining: seconds,
            timer,
        });
    }

    fn on_countdown_tick(&self, id: u64) -> TickControl {
        let remaining = {
            let mut st = self.lock();
            let Some(countdown) = st.countdown.as_mut().filter(|c| c.id == id) else {
                return TickControl::Stop;
            };
            countdown.remaining = countdown.remaining.saturating_sub(1);
            self.view.update_countdown(countdown.remaining);
            countdown.remaining
        };

        if remaining > 0 {
            return TickControl::Continue;
        }
        self.on_timeout_expired();
        TickControl::Stop
    }

    /// Force the redirect. Runs at most once per controller lifetime.
    pub(crate) fn on_timeout_expired(&self) {
        let url = {
            let mut st = self.lock();
            if st.redirected || !st.gate_visible {
                debug!("Timeout ignored; gate not shown or already redirected");
                return;
            }
            st.redirected = true;
            if let Some(countdown) = st.countdown.take() {
                countdown.cancel();
            }
            if let Some(monitor) = st.monitor.take() {
                monitor.cancel();
            }
            self.config.redirect_url.clone()
        };

        warn!(url = %url, "Gate countdown expired; redirecting");
        if let Err(e) = self.navigator.navigate(&url) {
            error!(url = %url, error = %e, "Redirect failed");
        }
    }

    /// Cancel the countdown and hide the gate.
    ///
    /// Returns the controller epoch to finish the recheck under, or `None`
    /// when there is nothing to dismiss.
    pub(crate) fn begin_recheck(&self) -> Option<u64> {
        let mut st = self.lock();
        if !st.gate_visible || st.rechecking || st.redirected {
            debug!("Dismissal ignored; no visible gate");
            return None;
        }

        if let Some(countdown) = st.countdown.take() {
            countdown.cancel();
        }
        self.view.hide();
        st.gate_visible = false;
        st.rechecking = true;
        st.state = MonitorState::Checking;
        info!(
            grace_ms = self.config.grace_delay.as_millis() as u64,
            "Recheck requested; gate hidden"
        );
        Some(st.epoch)
    }

    /// Wait out the grace delay, run one cycle, and re-decide the gate.
    pub(crate) async fn finish_recheck(self: &Arc<Self>, epoch: u64) -> Option<bool> {
        tokio::time::sleep(self.config.grace_delay).await;
        let destroyed = self.lock().epoch != epoch;
        if destroyed {
            return None;
        }

        // Never join a cycle already running: its readings predate the grace delay
        let verdict = self.engine.detect_fresh().await;

        let mut st = self.lock();
        if st.epoch != epoch {
            return None;
        }
        st.rechecking = false;

        if verdict {
            info!("Still blocked after recheck");
            self.show_gate_locked(&mut st);
        } else {
            info!("Blocker disabled; removing gate");
            self.view.remove();
            st.gate_rendered = false;
            self.start_monitoring_locked(&mut st);
        }
        Some(verdict)
    }
}
