//! Gate configuration
//!
//! Two layers, mirroring how the host page hands options to the script:
//!
//! - [`GateOptions`]: the raw option object. Every key is optional and
//!   unknown keys are ignored, so a page can pass a superset.
//! - [`GateConfig`]: the resolved configuration with defaults applied.
//!
//! # Environment Variables
//!
//! | Variable | Option |
//! |---|---|
//! | `ADGATE_BAIT_SELECTORS` | `baitSelectors` (comma-separated) |
//! | `ADGATE_BAIT_URLS` | `baitUrls` (comma-separated) |
//! | `ADGATE_CHECK_INTERVAL_MS` | `checkInterval` |
//! | `ADGATE_MAX_RETRIES` | `maxRetries` |
//! | `ADGATE_RETRY_DELAY_MS` | `retryDelay` |
//! | `ADGATE_TIMEOUT_SECONDS` | `timeoutSeconds` |
//! | `ADGATE_REDIRECT_URL` | `redirectUrl` |
//! | `ADGATE_MESSAGE` | `message` |
//! | `ADGATE_GRACE_DELAY_MS` | `graceDelay` |
//! | `ADGATE_INITIAL_DELAY_MS` | `initialDelay` |
//! | `ADGATE_REQUEST_TIMEOUT_MS` | `requestTimeout` |
//! | `ADGATE_FUSION_RULE` | `fusionRule` |
//! | `ADGATE_HTTP_ERROR_IS_BLOCKED` | `httpErrorIsBlocked` |
//! | `ADGATE_WEAK_BROWSER_INDICATORS` | `weakBrowserIndicators` |

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::fusion::FusionRule;

/// Selectors associated with ad placements.
pub const DEFAULT_BAIT_SELECTORS: &[&str] = &[
    "div.adsbox",
    ".ad-banner",
    "#ad-container",
    ".sponsor",
    ".advertisement",
    ".google-ads",
    ".adsbygoogle",
];

/// Paths resembling ad-serving endpoints.
pub const DEFAULT_BAIT_URLS: &[&str] = &[
    "/ads.js",
    "/banner.jpg",
    "/adblock-test",
    "/googlesyndication",
    "/doubleclick",
];

pub const DEFAULT_MESSAGE: &str = "Please turn off your ad blocker to continue using this site.";
pub const DEFAULT_REDIRECT_URL: &str = "about:blank";

/// Raw initialization options as supplied by the host page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateOptions {
    pub bait_selectors: Option<Vec<String>>,
    pub bait_urls: Option<Vec<String>>,
    /// Milliseconds between monitoring ticks
    pub check_interval: Option<u64>,
    /// Attempts per detection cycle
    pub max_retries: Option<u32>,
    /// Milliseconds between attempts
    pub retry_delay: Option<u64>,
    /// Countdown length before the forced redirect
    pub timeout_seconds: Option<u32>,
    pub redirect_url: Option<String>,
    pub message: Option<String>,
    /// Milliseconds to wait after a dismissal before rechecking
    pub grace_delay: Option<u64>,
    /// Milliseconds to wait after `init()` before the first cycle
    pub initial_delay: Option<u64>,
    /// Per-request bound for bait URL probes, in milliseconds
    pub request_timeout: Option<u64>,
    pub fusion_rule: Option<FusionRule>,
    /// Count 4xx/5xx responses as blocked
    pub http_error_is_blocked: Option<bool>,
    /// Also trust the weak browser heuristics (plugin count, chrome.loadTimes)
    pub weak_browser_indicators: Option<bool>,
}

impl GateOptions {
    /// Parse options from a JSON object.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parse options from a TOML document.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read options from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&raw),
            Some("toml") => Self::from_toml(&raw),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Read `ADGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build options from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let list = |var: &str| {
            lookup(var).map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
        };

        Ok(Self {
            bait_selectors: list("ADGATE_BAIT_SELECTORS"),
            bait_urls: list("ADGATE_BAIT_URLS"),
            check_interval: parse_var(&lookup, "ADGATE_CHECK_INTERVAL_MS")?,
            max_retries: parse_var(&lookup, "ADGATE_MAX_RETRIES")?,
            retry_delay: parse_var(&lookup, "ADGATE_RETRY_DELAY_MS")?,
            timeout_seconds: parse_var(&lookup, "ADGATE_TIMEOUT_SECONDS")?,
            redirect_url: lookup("ADGATE_REDIRECT_URL"),
            message: lookup("ADGATE_MESSAGE"),
            grace_delay: parse_var(&lookup, "ADGATE_GRACE_DELAY_MS")?,
            initial_delay: parse_var(&lookup, "ADGATE_INITIAL_DELAY_MS")?,
            request_timeout: parse_var(&lookup, "ADGATE_REQUEST_TIMEOUT_MS")?,
            fusion_rule: parse_var(&lookup, "ADGATE_FUSION_RULE")?,
            http_error_is_blocked: lookup("ADGATE_HTTP_ERROR_IS_BLOCKED")
                .map(|v| parse_bool_value(&v)),
            weak_browser_indicators: lookup("ADGATE_WEAK_BROWSER_INDICATORS")
                .map(|v| parse_bool_value(&v)),
        })
    }

    /// Overlay `other` on top of `self`; keys set in `other` win.
    pub fn merge(self, other: GateOptions) -> Self {
        Self {
            bait_selectors: other.bait_selectors.or(self.bait_selectors),
            bait_urls: other.bait_urls.or(self.bait_urls),
            check_interval: other.check_interval.or(self.check_interval),
            max_retries: other.max_retries.or(self.max_retries),
            retry_delay: other.retry_delay.or(self.retry_delay),
            timeout_seconds: other.timeout_seconds.or(self.timeout_seconds),
            redirect_url: other.redirect_url.or(self.redirect_url),
            message: other.message.or(self.message),
            grace_delay: other.grace_delay.or(self.grace_delay),
            initial_delay: other.initial_delay.or(self.initial_delay),
            request_timeout: other.request_timeout.or(self.request_timeout),
            fusion_rule: other.fusion_rule.or(self.fusion_rule),
            http_error_is_blocked: other.http_error_is_blocked.or(self.http_error_is_blocked),
            weak_browser_indicators: other
                .weak_browser_indicators
                .or(self.weak_browser_indicators),
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}

/// Accepts "1", "true", or "yes" (case-insensitive).
fn parse_bool_value(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "1" || v == "true" || v == "yes"
}

/// Resolved configuration for one gate controller.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub bait_selectors: Vec<String>,
    pub bait_urls: Vec<String>,
    pub check_interval: Duration,
    /// Always at least 1
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Always at least 1
    pub timeout_seconds: u32,
    pub redirect_url: String,
    pub message: String,
    pub grace_delay: Duration,
    pub initial_delay: Duration,
    pub request_timeout: Duration,
    pub fusion_rule: FusionRule,
    pub http_error_is_blocked: bool,
    pub weak_browser_indicators: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bait_selectors: DEFAULT_BAIT_SELECTORS.iter().map(|s| s.to_string()).collect(),
            bait_urls: DEFAULT_BAIT_URLS.iter().map(|s| s.to_string()).collect(),
            check_interval: Duration::from_millis(3000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            timeout_seconds: 15,
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            grace_delay: Duration::from_millis(1000),
            initial_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(5000),
            fusion_rule: FusionRule::default(),
            http_error_is_blocked: false,
            weak_browser_indicators: false,
        }
    }
}

impl GateConfig {
    /// Resolve options against the defaults.
    ///
    /// Supplied selector and URL lists extend the default lists rather
    /// than replacing them; scalars replace. Degenerate zero values for
    /// the check interval and countdown fall back to defaults.
    pub fn from_options(options: GateOptions) -> Self {
        let mut config = Self::default();

        if let Some(selectors) = options.bait_selectors {
            extend_unique(&mut config.bait_selectors, selectors);
        }
        if let Some(urls) = options.bait_urls {
            extend_unique(&mut config.bait_urls, urls);
        }
        if let Some(ms) = options.check_interval.filter(|ms| *ms > 0) {
            config.check_interval = Duration::from_millis(ms);
        }
        if let Some(n) = options.max_retries {
            config.max_retries = n.max(1);
        }
        if let Some(ms) = options.retry_delay {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = options.timeout_seconds.filter(|s| *s > 0) {
            config.timeout_seconds = secs;
        }
        if let Some(url) = options.redirect_url {
            config.redirect_url = url;
        }
        if let Some(message) = options.message {
            config.message = message;
        }
        if let Some(ms) = options.grace_delay {
            config.grace_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = options.initial_delay {
            config.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = options.request_timeout.filter(|ms| *ms > 0) {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(rule) = options.fusion_rule {
            config.fusion_rule = rule;
        }
        if let Some(flag) = options.http_error_is_blocked {
            config.http_error_is_blocked = flag;
        }
        if let Some(flag) = options.weak_browser_indicators {
            config.weak_browser_indicators = flag;
        }

        config
    }

    /// Defaults overlaid with `ADGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::from_options(GateOptions::from_env()?))
    }

    /// Defaults overlaid with a config file, then the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = GateOptions::load(path)?;
        Ok(Self::from_options(file.merge(GateOptions::from_env()?)))
    }

    /// Majority threshold for this configuration's attempt count.
    pub fn majority_threshold(&self) -> usize {
        crate::voting::majority_threshold(self.max_retries as usize)
    }
}

fn extend_unique(base: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        if !base.contains(&item) {
            base.push(item);
        }
    }
}
