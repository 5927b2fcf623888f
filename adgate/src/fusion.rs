//! Fusion policies: combining one attempt's probe signals into a verdict
//!
//! The default [`FusionRule::Corroborated`] treats browser identification
//! as insufficient on its own:
//!
//! ```text
//! (bait AND network) OR (browser AND (bait OR network))
//! ```
//!
//! Policies are replaceable. [`FusionRule`] covers the named variants and
//! [`CustomRule`] wraps any closure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of one probe in one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    Blocked,
    NotBlocked,
    /// The probe had nothing to check (e.g. empty bait list)
    #[default]
    Indeterminate,
}

impl ProbeResult {
    pub fn from_blocked(blocked: bool) -> Self {
        if blocked {
            Self::Blocked
        } else {
            Self::NotBlocked
        }
    }

    /// Indeterminate counts as not blocked.
    pub fn is_blocked(self) -> bool {
        self == Self::Blocked
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::NotBlocked => write!(f, "not_blocked"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// The three probe outcomes of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeSignals {
    /// Bait elements suppressed by host styling
    pub bait: ProbeResult,
    /// Bait URLs failed at the network layer
    pub network: ProbeResult,
    /// Browser identifies as having built-in blocking
    pub browser: ProbeResult,
}

impl ProbeSignals {
    pub fn new(bait: ProbeResult, network: ProbeResult, browser: ProbeResult) -> Self {
        Self {
            bait,
            network,
            browser,
        }
    }

    /// Build from plain booleans (`true` = blocked).
    pub fn from_flags(bait: bool, network: bool, browser: bool) -> Self {
        Self::new(
            ProbeResult::from_blocked(bait),
            ProbeResult::from_blocked(network),
            ProbeResult::from_blocked(browser),
        )
    }
}

/// Policy turning one attempt's signals into an attempt verdict.
pub trait FusionPolicy: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// `true` when the attempt counts as blocked
    fn fuse(&self, signals: &ProbeSignals) -> bool;
}

/// Named fusion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    /// `(bait AND network) OR (browser AND (bait OR network))`
    #[default]
    Corroborated,
    /// Any single signal suffices
    Any,
    /// Content-level signals only; browser identification is ignored
    #[serde(rename = "content")]
    ContentOnly,
    /// All three signals must agree
    Unanimous,
}

impl FusionPolicy for FusionRule {
    fn name(&self) -> &str {
        match self {
            Self::Corroborated => "corroborated",
            Self::Any => "any",
            Self::ContentOnly => "content",
            Self::Unanimous => "unanimous",
        }
    }

    fn fuse(&self, signals: &ProbeSignals) -> bool {
        let bait = signals.bait.is_blocked();
        let network = signals.network.is_blocked();
        let browser = signals.browser.is_blocked();

        match self {
            Self::Corroborated => (bait && network) || (browser && (bait || network)),
            Self::Any => bait || network || browser,
            Self::ContentOnly => bait || network,
            Self::Unanimous => bait && network && browser,
        }
    }
}

impl fmt::Display for FusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FusionRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "corroborated" => Ok(Self::Corroborated),
            "any" => Ok(Self::Any),
            "content" | "content_only" => Ok(Self::ContentOnly),
            "unanimous" => Ok(Self::Unanimous),
            other => Err(format!("unknown fusion rule '{other}'")),
        }
    }
}

/// A fusion policy backed by a closure.
pub struct CustomRule<F> {
    name: String,
    rule: F,
}

impl<F> CustomRule<F>
where
    F: Fn(&ProbeSignals) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, rule: F) -> Self {
        Self {
            name: name.into(),
            rule,
        }
    }
}

impl<F> FusionPolicy for CustomRule<F>
where
    F: Fn(&ProbeSignals) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn fuse(&self, signals: &ProbeSignals) -> bool {
        (self.rule)(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bait_alone_is_insufficient() {
        let signals = ProbeSignals::from_flags(true, false, false);
        assert!(!FusionRule::Corroborated.fuse(&signals));
    }

    #[test]
    fn test_bait_and_network_suffice_without_browser() {
        let signals = ProbeSignals::from_flags(true, true, false);
        assert!(FusionRule::Corroborated.fuse(&signals));
    }

    #[test]
    fn test_browser_needs_a_content_signal() {
        assert!(!FusionRule::Corroborated.fuse(&ProbeSignals::from_flags(false, false, true)));
        assert!(FusionRule::Corroborated.fuse(&ProbeSignals::from_flags(false, true, true)));
        assert!(FusionRule::Corroborated.fuse(&ProbeSignals::from_flags(true, false, true)));
    }

    #[test]
    fn test_indeterminate_counts_as_not_blocked() {
        let signals = ProbeSignals::new(
            ProbeResult::Blocked,
            ProbeResult::Indeterminate,
            ProbeResult::Blocked,
        );
        assert!(FusionRule::Corroborated.fuse(&signals));
        assert!(!FusionRule::Unanimous.fuse(&signals));
    }

    #[test]
    fn test_looser_rules() {
        let browser_only = ProbeSignals::from_flags(false, false, true);
        assert!(FusionRule::Any.fuse(&browser_only));
        assert!(!FusionRule::ContentOnly.fuse(&browser_only));

        let bait_only = ProbeSignals::from_flags(true, false, false);
        assert!(FusionRule::ContentOnly.fuse(&bait_only));
    }

    #[test]
    fn test_custom_rule() {
        let network_only = CustomRule::new("network", |s: &ProbeSignals| s.network.is_blocked());
        assert_eq!(network_only.name(), "network");
        assert!(network_only.fuse(&ProbeSignals::from_flags(false, true, false)));
        assert!(!network_only.fuse(&ProbeSignals::from_flags(true, false, true)));
    }

    #[test]
    fn test_rule_names_round_trip_through_from_str() {
        for rule in [
            FusionRule::Corroborated,
            FusionRule::Any,
            FusionRule::ContentOnly,
            FusionRule::Unanimous,
        ] {
            assert_eq!(rule.name().parse::<FusionRule>().unwrap(), rule);
        }
        assert!("strictest".parse::<FusionRule>().is_err());
    }
}
