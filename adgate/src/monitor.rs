//! Monitoring state machine
//!
//! Owns the controller lifecycle: the initial check, periodic re-checks,
//! gate visibility, and teardown.
//!
//! ```text
//!            init()
//! Idle ──────────────▶ Checking ──blocked──▶ Gated ──(countdown 0)──▶ redirect
//!                         │                    │
//!                   not blocked          DismissRequested
//!                         ▼                    ▼
//!                    Monitoring ◀─not blocked─ Checking
//!                         │
//!                  tick (gate hidden) ──▶ Checking
//! ```
//!
//! Scheduled ticks while the gate is shown do not run detection; showing
//! the gate stops the monitoring timer and the countdown supersedes it.
//! `destroy()` is valid from every state.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::GateConfig;
use crate::engine::{DetectionEngine, DetectionReport};
use crate::fusion::FusionPolicy;
use crate::gate::{GateEvent, GateTimer};
use crate::host::{GateView, Host, Navigator};
use crate::timer::{RepeatingTimer, TickControl};

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Idle,
    /// A detection cycle is running for the controller
    Checking,
    Gated,
    /// Periodic re-checks are active
    Monitoring,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Checking => write!(f, "checking"),
            Self::Gated => write!(f, "gated"),
            Self::Monitoring => write!(f, "monitoring"),
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub state: MonitorState,
    pub gate_visible: bool,
    pub monitoring: bool,
    pub rechecking: bool,
    pub redirected: bool,
    /// Seconds left on the countdown, while one runs
    pub seconds_remaining: Option<u32>,
    pub checking: bool,
    pub last_verdict: bool,
    pub check_count: u64,
}

#[derive(Debug)]
pub(crate) struct MonitorTicker {
    id: u64,
    timer: RepeatingTimer,
}

impl MonitorTicker {
    pub(crate) fn cancel(&self) {
        self.timer.cancel();
    }

    pub(crate) fn abort(&self) {
        self.timer.abort();
    }
}

#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    pub(crate) state: MonitorState,
    pub(crate) gate_visible: bool,
    /// Gate is present in the document, visible or hidden
    pub(crate) gate_rendered: bool,
    pub(crate) monitor: Option<MonitorTicker>,
    pub(crate) countdown: Option<GateTimer>,
    pub(crate) rechecking: bool,
    pub(crate) redirected: bool,
    /// Spawned init/recheck tasks, aborted on destroy
    pub(crate) tasks: Vec<JoinHandle<()>>,
    next_timer_id: u64,
    /// Bumped on destroy so stale tasks drop their results
    pub(crate) epoch: u64,
}

impl ControllerState {
    pub(crate) fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    fn monitor_id(&self) -> Option<u64> {
        self.monitor.as_ref().map(|m| m.id)
    }
}

pub(crate) struct Inner {
    pub(crate) config: GateConfig,
    pub(crate) engine: DetectionEngine,
    pub(crate) view: Arc<dyn GateView>,
    pub(crate) navigator: Arc<dyn Navigator>,
    state: Mutex<ControllerState>,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn start_monitoring_locked(self: &Arc<Self>, st: &mut ControllerState) {
        if !st.gate_visible {
            st.state = MonitorState::Monitoring;
        }
        if st.monitor.is_some() || st.redirected {
            return;
        }

        let id = st.next_timer_id();
        let weak = Arc::downgrade(self);
        let timer = RepeatingTimer::start("monitor", self.config.check_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.on_monitor_tick(id).await,
                    None => TickControl::Stop,
                }
            }
        });
        st.monitor = Some(MonitorTicker { id, timer });
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            "Monitoring started"
        );
    }

    fn stop_monitoring_locked(&self, st: &mut ControllerState) {
        if let Some(monitor) = st.monitor.take() {
            monitor.cancel();
            if !st.gate_visible && !st.rechecking {
                st.state = MonitorState::Idle;
            }
            info!("Monitoring stopped");
        }
    }

    async fn on_monitor_tick(self: &Arc<Self>, id: u64) -> TickControl {
        let epoch = {
            let mut st = self.lock();
            if st.monitor_id() != Some(id) {
                return TickControl::Stop;
            }
            if st.gate_visible || st.rechecking || st.redirected {
                debug!("Gate active; skipping scheduled check");
                return TickControl::Continue;
            }
            st.state = MonitorState::Checking;
            st.epoch
        };

        let verdict = self.engine.detect().await;

        let mut st = self.lock();
        if st.epoch != epoch || st.monitor_id() != Some(id) {
            return TickControl::Stop;
        }
        if verdict {
            self.show_gate_locked(&mut st);
        } else if !st.gate_visible {
            st.state = MonitorState::Monitoring;
        }

        if st.monitor_id() == Some(id) {
            TickControl::Continue
        } else {
            TickControl::Stop
        }
    }

    async fn initial_check(self: &Arc<Self>, epoch: u64) {
        {
            let mut st = self.lock();
            if st.epoch != epoch {
                return;
            }
            st.state = MonitorState::Checking;
        }

        let verdict = self.engine.detect().await;

        let mut st = self.lock();
        if st.epoch != epoch || st.redirected {
            return;
        }
        if verdict {
            self.show_gate_locked(&mut st);
        } else {
            self.start_monitoring_locked(&mut st);
        }
    }
}

/// The gate controller. Cheap to clone; clones share one instance.
#[derive(Clone)]
pub struct AdGate {
    inner: Arc<Inner>,
}

impl AdGate {
    /// Create a controller in the `Idle` state.
    pub fn new(config: GateConfig, host: Host) -> Self {
        let engine = DetectionEngine::new(&config, host.document, host.transport, host.browser);
        Self::from_parts(config, engine, host.view, host.navigator)
    }

    /// Create a controller with a custom fusion policy.
    pub fn with_policy(config: GateConfig, host: Host, policy: Arc<dyn FusionPolicy>) -> Self {
        let engine = DetectionEngine::new(&config, host.document, host.transport, host.browser)
            .with_policy(policy);
        Self::from_parts(config, engine, host.view, host.navigator)
    }

    fn from_parts(
        config: GateConfig,
        engine: DetectionEngine,
        view: Arc<dyn GateView>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                engine,
                view,
                navigator,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.inner.engine
    }

    pub fn last_report(&self) -> Option<DetectionReport> {
        self.inner.engine.last_report()
    }

    /// Schedule the first check after the initial delay.
    ///
    /// Blocked shows the gate; otherwise periodic monitoring starts.
    pub fn init(&self) {
        let inner = self.inner.clone();
        let mut st = self.inner.lock();
        let epoch = st.epoch;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.config.initial_delay).await;
            inner.initial_check(epoch).await;
        });
        st.tasks.retain(|t| !t.is_finished());
        st.tasks.push(handle);
        info!(
            delay_ms = self.inner.config.initial_delay.as_millis() as u64,
            policy = self.inner.engine.policy_name(),
            "Gate controller initialized"
        );
    }

    /// Run one fused, voted detection cycle. Does not change the gate.
    pub async fn detect(&self) -> bool {
        self.inner.engine.detect().await
    }

    /// Start periodic re-checks. No-op when already running.
    pub fn start_monitoring(&self) {
        let mut st = self.inner.lock();
        self.inner.start_monitoring_locked(&mut st);
    }

    /// Stop periodic re-checks. No-op when not running.
    pub fn stop_monitoring(&self) {
        let mut st = self.inner.lock();
        self.inner.stop_monitoring_locked(&mut st);
    }

    /// Dispatch a gate event from the presentation layer.
    pub fn handle_event(&self, event: GateEvent) {
        match event {
            GateEvent::DismissRequested => {
                let Some(epoch) = self.inner.begin_recheck() else {
                    return;
                };
                let inner = self.inner.clone();
                let handle = tokio::spawn(async move {
                    inner.finish_recheck(epoch).await;
                });
                let mut st = self.inner.lock();
                st.tasks.retain(|t| !t.is_finished());
                st.tasks.push(handle);
            }
            GateEvent::TimeoutExpired => self.inner.on_timeout_expired(),
        }
    }

    /// Dismiss the gate and await the recheck.
    ///
    /// Returns the fresh verdict, or `None` if no gate was shown or the
    /// controller was destroyed meanwhile.
    pub async fn recheck(&self) -> Option<bool> {
        let epoch = self.inner.begin_recheck()?;
        self.inner.finish_recheck(epoch).await
    }

    /// Tear everything down and return to `Idle`. Safe from any state.
    pub fn destroy(&self) {
        {
            let mut st = self.inner.lock();
            // Aborting also drops a tick that is mid-cycle
            if let Some(monitor) = st.monitor.take() {
                monitor.abort();
            }
            if let Some(countdown) = st.countdown.take() {
                countdown.abort();
            }
            for task in st.tasks.drain(..) {
                task.abort();
            }
            if st.gate_rendered {
                self.inner.view.remove();
            }

            let epoch = st.epoch + 1;
            let next_timer_id = st.next_timer_id;
            *st = ControllerState {
                epoch,
                next_timer_id,
                ..ControllerState::default()
            };
        }
        self.inner.engine.reset();
        info!("Gate controller destroyed");
    }

    pub fn state(&self) -> MonitorState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let st = self.inner.lock();
        GateSnapshot {
            state: st.state,
            gate_visible: st.gate_visible,
            monitoring: st.monitor.is_some(),
            rechecking: st.rechecking,
            redirected: st.redirected,
            seconds_remaining: st.countdown.as_ref().map(|c| c.remaining),
            checking: self.inner.engine.is_checking(),
            last_verdict: self.inner.engine.last_verdict(),
            check_count: self.inner.engine.check_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::host::MockNavigator;
    use crate::memory::{MemoryHost, ViewEvent};
    use std::time::Duration;

    fn blocked_host() -> Arc<MemoryHost> {
        let host = MemoryHost::new().shared();
        host.block_class("adsbox");
        host.block_url("/ads.js");
        host
    }

    fn fast_config() -> GateConfig {
        GateConfig {
            max_retries: 1,
            retry_delay: Duration::ZERO,
            initial_delay: Duration::from_millis(100),
            check_interval: Duration::from_secs(3),
            timeout_seconds: 5,
            grace_delay: Duration::from_secs(1),
            redirect_url: "https://example.com/why-ads".into(),
            ..GateConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_clean_page_starts_monitoring() {
        let host = MemoryHost::new().shared();
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));
        assert_eq!(gate.state(), MonitorState::Idle);

        gate.init();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = gate.snapshot();
        assert_eq!(snap.state, MonitorState::Monitoring);
        assert!(snap.monitoring);
        assert!(!snap.gate_visible);
        assert_eq!(snap.check_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_blocked_page_shows_gate() {
        let host = blocked_host();
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));

        gate.init();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = gate.snapshot();
        assert_eq!(snap.state, MonitorState::Gated);
        assert!(snap.gate_visible);
        assert!(!snap.monitoring);
        assert_eq!(snap.seconds_remaining, Some(5));
        assert!(host.gate().visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_tick_shows_gate_when_blocker_appears() {
        let host = MemoryHost::new().shared();
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));
        gate.start_monitoring();

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(gate.state(), MonitorState::Monitoring);

        host.block_class("adsbox");
        host.block_url("/ads.js");
        tokio::time::sleep(Duration::from_secs(3)).await;

        let snap = gate.snapshot();
        assert_eq!(snap.state, MonitorState::Gated);
        assert!(!snap.monitoring, "countdown supersedes periodic checks");
        assert_eq!(snap.check_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_monitoring_are_idempotent() {
        let host = MemoryHost::new().shared();
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));

        gate.stop_monitoring();
        gate.start_monitoring();
        gate.start_monitoring();
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(gate.snapshot().check_count, 1, "one timer, one tick");

        gate.stop_monitoring();
        gate.stop_monitoring();
        assert_eq!(gate.state(), MonitorState::Idle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gate.snapshot().check_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_failure_keeps_monitoring() {
        let host = blocked_host();
        host.set_fail_render(true);
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));

        gate.init();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = gate.snapshot();
        assert!(!snap.gate_visible);
        assert!(snap.monitoring);
        assert_eq!(snap.state, MonitorState::Monitoring);

        host.set_fail_render(false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(gate.snapshot().gate_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_redirects_exactly_once() {
        let host = blocked_host();
        let mut navigator = MockNavigator::new();
        navigator.expect_navigate().times(1).returning(|url| {
            assert_eq!(url, "https://example.com/why-ads");
            Ok(())
        });
        let gate_host = Host::memory(host.clone()).with_navigator(Arc::new(navigator));
        let gate = AdGate::new(fast_config(), gate_host);

        gate.init();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(gate.snapshot().redirected);
        gate.handle_event(GateEvent::TimeoutExpired);
        gate.handle_event(GateEvent::DismissRequested);

        let countdown: Vec<u32> = host
            .view_events()
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::Countdown { seconds } => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, vec![4, 3, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_is_logged_not_retried() {
        let host = blocked_host();
        let mut navigator = MockNavigator::new();
        navigator.expect_navigate().times(1).returning(|url| {
            Err(GateError::Navigation {
                url: url.to_string(),
                reason: "sandboxed frame".into(),
            })
        });
        let gate = AdGate::new(
            fast_config(),
            Host::memory(host).with_navigator(Arc::new(navigator)),
        );

        gate.init();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(gate.snapshot().redirected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_from_idle_is_safe() {
        let host = MemoryHost::new().shared();
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));
        gate.destroy();
        gate.destroy();
        assert_eq!(gate.snapshot(), GateSnapshot::default());
        assert!(host.view_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_pending_init() {
        let host = blocked_host();
        let gate = AdGate::new(fast_config(), Host::memory(host.clone()));
        gate.init();
        gate.destroy();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gate.snapshot(), GateSnapshot::default());
        assert_eq!(host.inserted_total(), 0);
    }
}
