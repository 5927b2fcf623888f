//! In-memory host
//!
//! Implements every host boundary against plain state so the full
//! controller can run without a browser. Suppression rules stand in for
//! a content blocker: blocked classes/ids hide bait elements, blocked
//! URLs fail at the network layer, and the brave flag identifies the
//! browser. Every call is recorded for inspection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{GateError, GateResult};
use crate::host::{
    BaitElement, BaitRequest, BrowserEnv, BrowserSignals, ComputedVisibility, Document, GateView,
    Navigator, NodeId,
};

/// What the gate view currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateDisplay {
    /// The modal exists in the document
    pub rendered: bool,
    pub visible: bool,
    pub message: String,
    pub seconds_remaining: Option<u32>,
}

/// A recorded gate view call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    Render { seconds: u32 },
    Countdown { seconds: u32 },
    Hide,
    Remove,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_node: NodeId,
    nodes: BTreeMap<NodeId, BaitElement>,
    inserted_total: usize,
    blocked_classes: HashSet<String>,
    blocked_ids: HashSet<String>,
    fail_style_reads: bool,
    /// Refuse insertions once this many nodes are live
    fail_insert_after: Option<usize>,

    blocked_urls: HashSet<String>,
    statuses: HashMap<String, u16>,
    latency: Duration,
    requests: Vec<String>,

    browser: BrowserSignals,

    gate: GateDisplay,
    fail_render: bool,
    view_events: Vec<ViewEvent>,
    navigations: Vec<String>,
}

/// Host with in-memory document, network, browser, view, and navigator.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
    in_flight: AtomicUsize,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Suppression rules ────────────────────────────────────────────────

    /// Hide elements carrying `class`.
    pub fn block_class(&self, class: &str) {
        self.lock().blocked_classes.insert(class.to_string());
    }

    /// Hide elements with `id`.
    pub fn block_id(&self, id: &str) {
        self.lock().blocked_ids.insert(id.to_string());
    }

    /// Fail requests to `url` at the network layer.
    pub fn block_url(&self, url: &str) {
        self.lock().blocked_urls.insert(url.to_string());
    }

    /// Respond to `url` with `status`.
    pub fn set_status(&self, url: &str, status: u16) {
        self.lock().statuses.insert(url.to_string(), status);
    }

    pub fn set_brave(&self, brave: bool) {
        self.lock().browser.brave_api = brave;
    }

    pub fn set_browser(&self, signals: BrowserSignals) {
        self.lock().browser = signals;
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Refuse bait insertion once `limit` nodes are in the document.
    pub fn set_fail_insert_after(&self, limit: Option<usize>) {
        self.lock().fail_insert_after = limit;
    }

    /// Make computed style reads fail.
    pub fn set_fail_style_reads(&self, fail: bool) {
        self.lock().fail_style_reads = fail;
    }

    /// Make gate rendering fail.
    pub fn set_fail_render(&self, fail: bool) {
        self.lock().fail_render = fail;
    }

    /// Drop every suppression rule, as if the blocker were turned off.
    pub fn unblock_all(&self) {
        let mut state = self.lock();
        state.blocked_classes.clear();
        state.blocked_ids.clear();
        state.blocked_urls.clear();
        state.browser.brave_api = false;
    }

    // ── Inspection ───────────────────────────────────────────────────────

    /// Nodes currently in the document.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Nodes ever inserted.
    pub fn inserted_total(&self) -> usize {
        self.lock().inserted_total
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn requests_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn gate(&self) -> GateDisplay {
        self.lock().gate.clone()
    }

    pub fn view_events(&self) -> Vec<ViewEvent> {
        self.lock().view_events.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }
}

impl Document for MemoryHost {
    fn insert_bait(&self, element: &BaitElement) -> GateResult<NodeId> {
        let mut state = self.lock();
        if state
            .fail_insert_after
            .is_some_and(|limit| state.nodes.len() >= limit)
        {
            return Err(GateError::dom("appendChild rejected"));
        }
        state.next_node += 1;
        let node = state.next_node;
        state.nodes.insert(node, element.clone());
        state.inserted_total += 1;
        Ok(node)
    }

    fn computed_visibility(&self, node: NodeId) -> GateResult<ComputedVisibility> {
        let state = self.lock();
        if state.fail_style_reads {
            return Err(GateError::dom("getComputedStyle unavailable"));
        }
        let Some(element) = state.nodes.get(&node) else {
            return Ok(ComputedVisibility::detached());
        };

        let by_class = element
            .classes
            .iter()
            .any(|c| state.blocked_classes.contains(c));
        let by_id = element
            .id
            .as_ref()
            .is_some_and(|id| state.blocked_ids.contains(id));
        if by_class || by_id {
            return Ok(ComputedVisibility::detached());
        }

        let height = element
            .style_value("height")
            .and_then(|h| h.trim_end_matches("px").parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(ComputedVisibility {
            display: element.style_value("display").unwrap_or("block").to_string(),
            visibility: element
                .style_value("visibility")
                .unwrap_or("visible")
                .to_string(),
            offset_height: height,
        })
    }

    fn remove(&self, node: NodeId) -> GateResult<()> {
        self.lock().nodes.remove(&node);
        Ok(())
    }
}

/// Decrements the in-flight counter even when the request future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl crate::host::Transport for MemoryHost {
    async fn request(&self, request: &BaitRequest) -> GateResult<u16> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let latency = {
            let mut state = self.lock();
            state.requests.push(request.url.clone());
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.lock();
        if state.blocked_urls.contains(&request.url) {
            return Err(GateError::transport(&request.url, "net::ERR_BLOCKED_BY_CLIENT"));
        }
        Ok(state.statuses.get(&request.url).copied().unwrap_or(200))
    }
}

impl BrowserEnv for MemoryHost {
    fn signals(&self) -> BrowserSignals {
        self.lock().browser.clone()
    }
}

impl GateView for MemoryHost {
    fn render(&self, message: &str, seconds_remaining: u32) -> GateResult<()> {
        let mut state = self.lock();
        if state.fail_render {
            return Err(GateError::Render("document body unavailable".to_string()));
        }
        state.gate = GateDisplay {
            rendered: true,
            visible: true,
            message: message.to_string(),
            seconds_remaining: Some(seconds_remaining),
        };
        state.view_events.push(ViewEvent::Render {
            seconds: seconds_remaining,
        });
        Ok(())
    }

    fn update_countdown(&self, seconds_remaining: u32) {
        let mut state = self.lock();
        state.gate.seconds_remaining = Some(seconds_remaining);
        state.view_events.push(ViewEvent::Countdown {
            seconds: seconds_remaining,
        });
    }

    fn hide(&self) {
        let mut state = self.lock();
        state.gate.visible = false;
        state.view_events.push(ViewEvent::Hide);
    }

    fn remove(&self) {
        let mut state = self.lock();
        state.gate = GateDisplay::default();
        state.view_events.push(ViewEvent::Remove);
    }
}

impl Navigator for MemoryHost {
    fn navigate(&self, url: &str) -> GateResult<()> {
        self.lock().navigations.push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Transport;

    fn bait(class: &str) -> BaitElement {
        BaitElement {
            tag: "div".into(),
            id: None,
            classes: vec![class.into()],
            style: vec![("height".into(), "1px".into())],
        }
    }

    #[test]
    fn test_blocked_class_hides_element() {
        let host = MemoryHost::new();
        host.block_class("adsbox");

        let hidden = host.insert_bait(&bait("adsbox")).unwrap();
        let shown = host.insert_bait(&bait("content")).unwrap();
        assert!(host.computed_visibility(hidden).unwrap().is_suppressed());
        assert!(!host.computed_visibility(shown).unwrap().is_suppressed());

        Document::remove(&host, hidden).unwrap();
        Document::remove(&host, hidden).unwrap();
        assert_eq!(host.node_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_rules() {
        let host = MemoryHost::new();
        host.block_url("/ads.js");
        host.set_status("/missing", 404);

        let blocked = host
            .request(&BaitRequest::head("/ads.js", Duration::from_secs(1)))
            .await;
        assert!(blocked.unwrap_err().is_network_failure());

        let missing = host
            .request(&BaitRequest::head("/missing", Duration::from_secs(1)))
            .await;
        assert_eq!(missing.unwrap(), 404);
        assert_eq!(host.requests_in_flight(), 0);
    }

    #[test]
    fn test_view_records_events() {
        let host = MemoryHost::new();
        host.render("off please", 15).unwrap();
        host.update_countdown(14);
        host.hide();
        assert!(host.gate().rendered);
        assert!(!host.gate().visible);
        GateView::remove(&host);
        assert_eq!(host.gate(), GateDisplay::default());
        assert_eq!(
            host.view_events(),
            vec![
                ViewEvent::Render { seconds: 15 },
                ViewEvent::Countdown { seconds: 14 },
                ViewEvent::Hide,
                ViewEvent::Remove,
            ]
        );
    }

    #[test]
    fn test_unblock_all() {
        let host = MemoryHost::new();
        host.block_class("adsbox");
        host.block_url("/ads.js");
        host.set_brave(true);
        host.unblock_all();

        let node = host.insert_bait(&bait("adsbox")).unwrap();
        assert!(!host.computed_visibility(node).unwrap().is_suppressed());
        assert!(!host.signals().brave_api);
    }
}
