//! Bait element probe
//!
//! Materializes one element per configured selector, positioned off-screen
//! but otherwise visible, then reads back the computed style. Anything the
//! host's stylesheet rules hid counts as suppression. The inserted nodes
//! are removed on every exit path, including failed style reads.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::GateResult;
use crate::fusion::ProbeResult;
use crate::host::{BaitElement, Document, NodeId};

/// Inline style for bait elements. Must not hide the element itself,
/// otherwise the probe would trip on its own styling.
const BAIT_STYLE: &[(&str, &str)] = &[
    ("display", "block"),
    ("visibility", "visible"),
    ("position", "absolute"),
    ("left", "-9999px"),
    ("top", "-9999px"),
    ("width", "1px"),
    ("height", "1px"),
];

/// `tag`, optionally followed by one `.class` or `#id`.
static SELECTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9-]*)?(?:([.#])([A-Za-z_-][A-Za-z0-9_-]*))?$")
        .expect("SELECTOR_RE regex should compile")
});

/// A simple selector: `tag`, `.class`, `#id`, `tag.class`, or `tag#id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaitSelector {
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
}

impl BaitSelector {
    /// Parse a selector; compound or attribute selectors are rejected.
    pub fn parse(selector: &str) -> Option<Self> {
        let caps = SELECTOR_RE.captures(selector.trim())?;
        let tag = caps.get(1).map(|m| m.as_str().to_lowercase());
        let sigil = caps.get(2).map(|m| m.as_str());
        let name = caps.get(3).map(|m| m.as_str().to_string());

        if tag.is_none() && name.is_none() {
            return None;
        }

        Some(Self {
            tag: tag.unwrap_or_else(|| "div".to_string()),
            id: name.clone().filter(|_| sigil == Some("#")),
            class: name.filter(|_| sigil == Some(".")),
        })
    }

    pub fn to_element(&self) -> BaitElement {
        BaitElement {
            tag: self.tag.clone(),
            id: self.id.clone(),
            classes: self.class.iter().cloned().collect(),
            style: BAIT_STYLE
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Removes inserted bait nodes when dropped.
struct InsertedBaits<'a> {
    document: &'a dyn Document,
    nodes: Vec<NodeId>,
}

impl Drop for InsertedBaits<'_> {
    fn drop(&mut self) {
        for node in self.nodes.drain(..) {
            if let Err(e) = self.document.remove(node) {
                warn!(node, error = %e, "Failed to remove bait element");
            }
        }
    }
}

/// Detects CSS-rule-based suppression of ad-like elements.
#[derive(Debug, Clone)]
pub struct BaitElementProbe {
    selectors: Vec<BaitSelector>,
}

impl BaitElementProbe {
    /// Build from selector strings, skipping any that cannot be materialized.
    pub fn new(selectors: &[String]) -> Self {
        let selectors = selectors
            .iter()
            .filter_map(|raw| {
                let parsed = BaitSelector::parse(raw);
                if parsed.is_none() {
                    warn!(selector = %raw, "Skipping unsupported bait selector");
                }
                parsed
            })
            .collect();
        Self { selectors }
    }

    pub fn selectors(&self) -> &[BaitSelector] {
        &self.selectors
    }

    /// Insert every bait, then report whether any was suppressed.
    pub fn run(&self, document: &dyn Document) -> GateResult<ProbeResult> {
        if self.selectors.is_empty() {
            return Ok(ProbeResult::Indeterminate);
        }

        let mut inserted = InsertedBaits {
            document,
            nodes: Vec::with_capacity(self.selectors.len()),
        };

        for selector in &self.selectors {
            let node = document.insert_bait(&selector.to_element())?;
            inserted.nodes.push(node);
        }

        let mut suppressed = 0usize;
        for (selector, node) in self.selectors.iter().zip(&inserted.nodes) {
            if document.computed_visibility(*node)?.is_suppressed() {
                debug!(?selector, "Bait element suppressed");
                suppressed += 1;
            }
        }

        Ok(ProbeResult::from_blocked(suppressed > 0))
    }
}
