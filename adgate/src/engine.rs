//! Detection engine: probes, fusion, and majority voting
//!
//! One detection cycle runs `max_retries` attempts back to back, with
//! `retry_delay` between them. Each attempt runs the three probes
//! concurrently, waits for all of them, and fuses their signals with the
//! configured [`FusionPolicy`]. The cycle verdict is the majority of the
//! attempt verdicts.
//!
//! ```text
//! detect()
//!   ├─ cycle in flight? → join it, observe its verdict
//!   └─ lead a new cycle
//! detect_fresh()
//!   ├─ cycle in flight? → wait for it to finish, then retry
//!   └─ lead a new cycle
//!        ├─ attempt 1: join!(bait, network, browser) → fuse
//!        ├─ sleep(retry_delay)
//!        ├─ attempt n ...
//!        └─ majority vote → verdict, check_count += 1
//! ```
//!
//! Probe errors become non-blocking signals. A panic anywhere in the
//! cycle is caught at the cycle boundary and yields "not blocked". The
//! in-flight marker is released by a drop guard, so it is cleared on every
//! exit path including cancellation. The marker is cleared before waiters
//! are woken, so a woken waiter never sees the cycle it waited on.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::error::GateResult;
use crate::fusion::{FusionPolicy, ProbeResult, ProbeSignals};
use crate::host::{BrowserEnv, Document, Transport};
use crate::probes::{BaitElementProbe, BaitUrlProbe, BlockingBrowserProbe};
use crate::voting::VoteTally;

/// One attempt within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-indexed
    pub attempt: u32,
    pub signals: ProbeSignals,
    pub verdict: bool,
}

/// Record of one completed detection cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub cycle_id: Uuid,
    pub policy: String,
    pub attempts: Vec<AttemptRecord>,
    pub tally: VoteTally,
    pub verdict: bool,
    /// Value of the check counter after this cycle
    pub check_count: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct EngineState {
    last_verdict: bool,
    last_report: Option<DetectionReport>,
    /// The cycle currently running, if any
    in_flight: Option<InFlightCycle>,
    next_cycle: u64,
    /// Bumped by `reset()` so cycles started before it do not record
    epoch: u64,
}

#[derive(Debug)]
struct InFlightCycle {
    seq: u64,
    verdict: watch::Receiver<Option<bool>>,
}

enum CycleRole<'a> {
    Lead(CycleGuard<'a>),
    Join(watch::Receiver<Option<bool>>),
}

/// Held by the leader of a cycle. Clears the in-flight marker when the
/// cycle ends, however it ends, then publishes the verdict. Dropping the
/// guard without a verdict closes the channel, which releases joiners.
struct CycleGuard<'a> {
    engine: &'a DetectionEngine,
    seq: u64,
    tx: watch::Sender<Option<bool>>,
}

impl CycleGuard<'_> {
    /// Clear the marker if it still names this cycle; `reset()` may
    /// already have replaced it.
    fn release(&self) {
        let mut state = self.engine.lock_state();
        if state.in_flight.as_ref().is_some_and(|c| c.seq == self.seq) {
            state.in_flight = None;
        }
    }

    fn finish(self, verdict: bool) {
        self.release();
        let _ = self.tx.send(Some(verdict));
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs detection cycles against the host boundaries.
pub struct DetectionEngine {
    document: Arc<dyn Document>,
    transport: Arc<dyn Transport>,
    browser: Arc<dyn BrowserEnv>,
    bait_probe: BaitElementProbe,
    url_probe: BaitUrlProbe,
    browser_probe: BlockingBrowserProbe,
    policy: Arc<dyn FusionPolicy>,
    attempts: u32,
    retry_delay: Duration,
    check_count: AtomicU64,
    state: Mutex<EngineState>,
}

impl DetectionEngine {
    /// Build an engine using the configured fusion rule.
    pub fn new(
        config: &GateConfig,
        document: Arc<dyn Document>,
        transport: Arc<dyn Transport>,
        browser: Arc<dyn BrowserEnv>,
    ) -> Self {
        Self {
            document,
            transport,
            browser,
            bait_probe: BaitElementProbe::new(&config.bait_selectors),
            url_probe: BaitUrlProbe::new(&config.bait_urls, config.request_timeout)
                .with_http_error_is_blocked(config.http_error_is_blocked),
            browser_probe: BlockingBrowserProbe::new(config.weak_browser_indicators),
            policy: Arc::new(config.fusion_rule),
            attempts: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            check_count: AtomicU64::new(0),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Replace the fusion policy.
    pub fn with_policy(mut self, policy: Arc<dyn FusionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a cycle is currently running.
    pub fn is_checking(&self) -> bool {
        self.lock_state().in_flight.is_some()
    }

    /// Verdict of the most recent completed cycle.
    pub fn last_verdict(&self) -> bool {
        self.lock_state().last_verdict
    }

    pub fn last_report(&self) -> Option<DetectionReport> {
        self.lock_state().last_report.clone()
    }

    /// Completed cycles since creation or the last reset.
    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::SeqCst)
    }

    /// Run a detection cycle, or join the one already running.
    ///
    /// Concurrent callers share a single cycle and observe its verdict.
    pub async fn detect(&self) -> bool {
        match self.claim_cycle() {
            CycleRole::Join(mut rx) => {
                debug!("Detection cycle already in flight; joining");
                let joined = rx.wait_for(Option::is_some).await.map(|v| *v);
                match joined {
                    Ok(verdict) => verdict.unwrap_or(false),
                    // Leader was cancelled before finishing
                    Err(_) => self.last_verdict(),
                }
            }
            CycleRole::Lead(guard) => self.lead(guard).await,
        }
    }

    /// Run a cycle whose probe readings all start after this call.
    ///
    /// A cycle already in flight is waited out rather than joined, since
    /// its readings may predate the caller's reason for asking.
    pub async fn detect_fresh(&self) -> bool {
        loop {
            match self.claim_cycle() {
                CycleRole::Lead(guard) => return self.lead(guard).await,
                CycleRole::Join(mut rx) => {
                    debug!("Detection cycle in flight; waiting to run a fresh one");
                    let _ = rx.wait_for(Option::is_some).await;
                }
            }
        }
    }

    fn claim_cycle(&self) -> CycleRole<'_> {
        let mut state = self.lock_state();
        if let Some(cycle) = &state.in_flight {
            return CycleRole::Join(cycle.verdict.clone());
        }

        state.next_cycle += 1;
        let seq = state.next_cycle;
        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(InFlightCycle { seq, verdict: rx });
        CycleRole::Lead(CycleGuard {
            engine: self,
            seq,
            tx,
        })
    }

    async fn lead(&self, guard: CycleGuard<'_>) -> bool {
        let verdict = self.run_guarded_cycle().await;
        guard.finish(verdict);
        verdict
    }

    /// Return the last-known verdict if a cycle is in flight, else run one.
    pub async fn detect_or_last(&self) -> bool {
        if self.is_checking() {
            return self.last_verdict();
        }
        self.detect().await
    }

    /// Forget verdicts, counters, and the in-flight marker.
    ///
    /// A cycle still running will not record, and the next `detect()`
    /// leads a new cycle instead of joining it.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.epoch += 1;
        state.in_flight = None;
        state.last_verdict = false;
        state.last_report = None;
        self.check_count.store(0, Ordering::SeqCst);
    }

    async fn run_guarded_cycle(&self) -> bool {
        let epoch = self.lock_state().epoch;

        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(mut report) => {
                let mut state = self.lock_state();
                if state.epoch != epoch {
                    debug!(cycle_id = %report.cycle_id, "Discarding cycle started before reset");
                    return report.verdict;
                }
                report.check_count = self.check_count.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    cycle_id = %report.cycle_id,
                    verdict = report.verdict,
                    blocked_attempts = report.tally.blocked,
                    attempts = report.tally.attempts,
                    check_count = report.check_count,
                    "Detection complete"
                );
                state.last_verdict = report.verdict;
                let verdict = report.verdict;
                state.last_report = Some(report);
                verdict
            }
            Err(_) => {
                warn!("Detection cycle failed; assuming not blocked");
                false
            }
        }
    }

    async fn run_cycle(&self) -> DetectionReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut attempts = Vec::with_capacity(self.attempts as usize);

        for attempt in 1..=self.attempts {
            let signals = self.run_attempt().await;
            let verdict = self.policy.fuse(&signals);
            debug!(
                %cycle_id,
                attempt,
                bait = %signals.bait,
                network = %signals.network,
                browser = %signals.browser,
                verdict,
                "Attempt complete"
            );
            attempts.push(AttemptRecord {
                attempt,
                signals,
                verdict,
            });

            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let verdicts: Vec<bool> = attempts.iter().map(|a| a.verdict).collect();
        let tally = VoteTally::from_verdicts(&verdicts);

        DetectionReport {
            cycle_id,
            policy: self.policy.name().to_string(),
            attempts,
            tally,
            verdict: tally.verdict,
            check_count: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Run the three probes concurrently and wait for all of them.
    async fn run_attempt(&self) -> ProbeSignals {
        let bait = async { settle("bait_element", self.bait_probe.run(self.document.as_ref())) };
        let network = async {
            settle(
                "bait_url",
                self.url_probe.run(self.transport.as_ref()).await,
            )
        };
        let browser = async { self.browser_probe.run(self.browser.as_ref()) };

        let (bait, network, browser) = tokio::join!(bait, network, browser);
        ProbeSignals::new(bait, network, browser)
    }
}

/// Fold a probe error into its non-blocking default.
fn settle(probe: &'static str, result: GateResult<ProbeResult>) -> ProbeResult {
    match result {
        Ok(result) => result,
        Err(e) => {
            warn!(probe, error = %e, "Probe failed; treating as not blocked");
            ProbeResult::NotBlocked
        }
    }
}
