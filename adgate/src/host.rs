//! Host boundaries
//!
//! The detector never touches a real document, network stack, or window
//! directly. Each concern is a trait so the same engine runs against a
//! browser binding, the reqwest transport, or the in-memory host.
//!
//! | Trait | Concern |
//! |---|---|
//! | [`Document`] | bait element insertion, computed style reads, removal |
//! | [`Transport`] | bait URL requests (status or network-layer failure) |
//! | [`BrowserEnv`] | host-exposed browser feature flags |
//! | [`GateView`] | modal rendering and countdown display |
//! | [`Navigator`] | forced redirect of the browsing context |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GateResult;

/// Opaque handle to an element inserted into the document.
pub type NodeId = u64;

/// Element to insert as bait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaitElement {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    /// Inline style declarations, in insertion order
    pub style: Vec<(String, String)>,
}

impl BaitElement {
    /// Inline style value for `property`, if set.
    pub fn style_value(&self, property: &str) -> Option<&str> {
        self.style
            .iter()
            .rev()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v.as_str())
    }
}

/// Computed visibility of an inserted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedVisibility {
    pub display: String,
    pub visibility: String,
    /// Rendered box height in CSS pixels
    pub offset_height: f64,
}

impl ComputedVisibility {
    pub fn visible(offset_height: f64) -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            offset_height,
        }
    }

    /// What a node removed by the host looks like.
    pub fn detached() -> Self {
        Self {
            display: "none".to_string(),
            visibility: "hidden".to_string(),
            offset_height: 0.0,
        }
    }

    /// Whether host styling suppressed the element.
    pub fn is_suppressed(&self) -> bool {
        self.display == "none" || self.visibility == "hidden" || self.offset_height <= 0.0
    }
}

/// DOM boundary used by the bait element probe.
pub trait Document: Send + Sync {
    /// Append `element` to the document body.
    fn insert_bait(&self, element: &BaitElement) -> GateResult<NodeId>;

    /// Read the computed visibility of a previously inserted node.
    fn computed_visibility(&self, node: NodeId) -> GateResult<ComputedVisibility>;

    /// Remove a node. Removing an already-detached node is not an error.
    fn remove(&self, node: NodeId) -> GateResult<()>;
}

/// A single bait URL request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaitRequest {
    pub url: String,
    pub method: reqwest::Method,
    /// Send `Cache-Control: no-cache`
    pub no_cache: bool,
    pub timeout: Duration,
}

impl BaitRequest {
    pub fn head(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::HEAD,
            no_cache: true,
            timeout,
        }
    }
}

/// Network boundary used by the bait URL probe.
///
/// Returns the HTTP status on any response, including 4xx/5xx, and
/// [`GateError::Transport`](crate::error::GateError::Transport) when the
/// request failed below the HTTP layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: &BaitRequest) -> GateResult<u16>;
}

/// Browser feature flags exposed by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSignals {
    /// `navigator.brave` is defined
    pub brave_api: bool,
    pub user_agent: String,
    /// `navigator.plugins.length`, when readable
    pub plugin_count: Option<u32>,
    /// `window.chrome.loadTimes` is defined
    pub chrome_load_times: bool,
}

/// Browser identification boundary.
pub trait BrowserEnv: Send + Sync {
    fn signals(&self) -> BrowserSignals;
}

/// Presentation boundary for the gate modal.
pub trait GateView: Send + Sync {
    /// Render (or re-show) the modal with a fresh countdown.
    fn render(&self, message: &str, seconds_remaining: u32) -> GateResult<()>;

    fn update_countdown(&self, seconds_remaining: u32);

    /// Hide without removing.
    fn hide(&self);

    /// Remove every trace of the modal from the document.
    fn remove(&self);
}

/// Navigation boundary for the forced redirect.
#[cfg_attr(test, mockall::automock)]
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str) -> GateResult<()>;
}

/// Bundle of host collaborators handed to the controller.
#[derive(Clone)]
pub struct Host {
    pub document: Arc<dyn Document>,
    pub transport: Arc<dyn Transport>,
    pub browser: Arc<dyn BrowserEnv>,
    pub view: Arc<dyn GateView>,
    pub navigator: Arc<dyn Navigator>,
}

impl Host {
    /// Use one in-memory host for every boundary.
    pub fn memory(host: Arc<crate::memory::MemoryHost>) -> Self {
        Self {
            document: host.clone(),
            transport: host.clone(),
            browser: host.clone(),
            view: host.clone(),
            navigator: host,
        }
    }

    /// Swap the transport, keeping the other collaborators.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Swap the navigator, keeping the other collaborators.
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }
}
