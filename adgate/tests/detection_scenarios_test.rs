//! End-to-end detection scenarios against the in-memory host
//!
//! Each test configures a simulated blocker and checks the fused, voted
//! verdict that `AdGate::detect` produces.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use adgate::{
    AdGate, CustomRule, FusionRule, GateConfig, GateOptions, Host, MemoryHost, ProbeSignals,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("adgate=debug")
        .with_test_writer()
        .try_init();
}

fn config_with(rule: FusionRule) -> GateConfig {
    GateConfig {
        fusion_rule: rule,
        retry_delay: Duration::from_millis(10),
        ..GateConfig::default()
    }
}

/// Both content probes blocked: the default corroborated rule fires.
#[tokio::test(start_paused = true)]
async fn test_bait_and_network_blocked() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.block_class("adsbygoogle");
    host.block_url("/googlesyndication");

    let gate = AdGate::new(config_with(FusionRule::Corroborated), Host::memory(host));
    assert!(gate.detect().await);

    let report = gate.last_report().unwrap();
    assert_eq!(report.tally.attempts, 3);
    assert_eq!(report.tally.blocked, 3);
    assert_eq!(report.check_count, 1);
    assert!(report.finished_at >= report.started_at);
}

/// A single content probe is not enough under the default rule.
#[tokio::test(start_paused = true)]
async fn test_single_signal_not_corroborated() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.block_url("/ads.js");

    let gate = AdGate::new(config_with(FusionRule::Corroborated), Host::memory(host));
    assert!(!gate.detect().await);
    assert_eq!(gate.snapshot().check_count, 1);
}

/// The permissive rule fires on the network probe alone.
#[tokio::test(start_paused = true)]
async fn test_any_rule_network_only() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.block_url("/ads.js");

    let gate = AdGate::new(config_with(FusionRule::Any), Host::memory(host));
    assert!(gate.detect().await);
}

/// Brave corroborates one content signal.
#[tokio::test(start_paused = true)]
async fn test_brave_corroborates_content_signal() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.set_brave(true);
    assert!(!AdGate::new(config_with(FusionRule::Corroborated), Host::memory(host.clone()))
        .detect()
        .await);

    host.block_id("ad-container");
    assert!(AdGate::new(config_with(FusionRule::Corroborated), Host::memory(host))
        .detect()
        .await);
}

/// The content-only rule ignores the browser entirely.
#[tokio::test(start_paused = true)]
async fn test_content_rule_ignores_browser() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.set_brave(true);

    let gate = AdGate::new(config_with(FusionRule::ContentOnly), Host::memory(host.clone()));
    assert!(!gate.detect().await);

    host.block_class("sponsor");
    assert!(gate.detect().await);
    assert_eq!(gate.snapshot().check_count, 2);
}

/// HTTP error statuses only count as blocked when opted in.
#[tokio::test(start_paused = true)]
async fn test_http_error_status_opt_in() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.block_class("adsbox");
    host.set_status("/ads.js", 404);

    let lenient = AdGate::new(config_with(FusionRule::Corroborated), Host::memory(host.clone()));
    assert!(!lenient.detect().await);

    let strict = GateConfig {
        http_error_is_blocked: true,
        ..config_with(FusionRule::Corroborated)
    };
    let strict = AdGate::new(strict, Host::memory(host));
    assert!(strict.detect().await);
}

/// A request that never answers counts as blocked once the timeout hits.
#[tokio::test(start_paused = true)]
async fn test_hanging_request_times_out_as_blocked() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.block_class("advertisement");
    host.set_latency(Duration::from_secs(60));

    let config = GateConfig {
        request_timeout: Duration::from_secs(2),
        max_retries: 1,
        ..config_with(FusionRule::Corroborated)
    };
    let gate = AdGate::new(config, Host::memory(host.clone()));

    let start = tokio::time::Instant::now();
    assert!(gate.detect().await);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(host.requests_in_flight(), 0);
}

/// Majority over attempts: an intermittent blocker in 2 of 3 attempts wins.
#[tokio::test(start_paused = true)]
async fn test_intermittent_signal_majority() {
    init_tracing();
    let host = MemoryHost::new().shared();
    let rule = Arc::new(CustomRule::new("every-other", {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        move |_: &ProbeSignals| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % 2 == 0
        }
    }));

    let gate = AdGate::with_policy(config_with(FusionRule::Any), Host::memory(host), rule);
    assert!(gate.detect().await);

    let report = gate.last_report().unwrap();
    assert_eq!(report.policy, "every-other");
    let verdicts: Vec<bool> = report.attempts.iter().map(|a| a.verdict).collect();
    assert_eq!(verdicts, vec![true, false, true]);
}

/// Options loaded from a file extend the default bait lists.
#[tokio::test(start_paused = true)]
async fn test_config_file_extends_defaults() {
    init_tracing();
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
baitSelectors = [".promo-slot"]
baitUrls = ["/promo/track.gif"]
maxRetries = 1
fusionRule = "content"
"#
    )
    .unwrap();

    let config = GateConfig::from_options(GateOptions::load(file.path()).unwrap());
    assert!(config.bait_selectors.iter().any(|s| s == ".promo-slot"));
    assert!(config.bait_selectors.iter().any(|s| s == "div.adsbox"));

    let host = MemoryHost::new().shared();
    host.block_url("/promo/track.gif");
    let gate = AdGate::new(config, Host::memory(host.clone()));
    assert!(gate.detect().await);
    assert!(host.request_count() >= 1);
}

/// Bait nodes never outlive a cycle, even when style reads fail.
#[tokio::test(start_paused = true)]
async fn test_bait_nodes_cleaned_up() {
    init_tracing();
    let host = MemoryHost::new().shared();
    host.set_fail_style_reads(true);

    let gate = AdGate::new(config_with(FusionRule::Any), Host::memory(host.clone()));
    assert!(!gate.detect().await);
    assert_eq!(host.node_count(), 0);
    assert!(host.inserted_total() > 0);
}
