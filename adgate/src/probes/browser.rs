//! Blocking-browser self-identification

use crate::fusion::ProbeResult;
use crate::host::{BrowserEnv, BrowserSignals};

/// Fewer plugins than this is a weak hint of a privacy browser.
const LOW_PLUGIN_COUNT: u32 = 5;

/// Checks host-exposed flags for a browser with built-in blocking.
///
/// Strong indicators (`navigator.brave`, "Brave" in the user agent)
/// always count. The weak heuristics (`chrome.loadTimes`, a short plugin
/// list) also match stock Chromium and only count when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingBrowserProbe {
    weak_indicators: bool,
}

impl BlockingBrowserProbe {
    pub fn new(weak_indicators: bool) -> Self {
        Self { weak_indicators }
    }

    pub fn run(&self, env: &dyn BrowserEnv) -> ProbeResult {
        ProbeResult::from_blocked(self.identifies(&env.signals()))
    }

    fn identifies(&self, signals: &BrowserSignals) -> bool {
        if signals.brave_api || signals.user_agent.contains("Brave") {
            return true;
        }
        self.weak_indicators
            && (signals.chrome_load_times
                || signals
                    .plugin_count
                    .is_some_and(|count| count < LOW_PLUGIN_COUNT))
    }
}
