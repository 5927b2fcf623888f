//! Bait URL probe
//!
//! Requests ad-network-like paths and looks for failures below the HTTP
//! layer. A 404 or 500 means the request reached a server, so it is not
//! a blocking signal unless `http_error_is_blocked` is set.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::GateResult;
use crate::fusion::ProbeResult;
use crate::host::{BaitRequest, Transport};

/// Detects request blocking of ad-like URLs.
#[derive(Debug, Clone)]
pub struct BaitUrlProbe {
    urls: Vec<String>,
    timeout: Duration,
    http_error_is_blocked: bool,
}

impl BaitUrlProbe {
    pub fn new(urls: &[String], timeout: Duration) -> Self {
        Self {
            urls: urls.to_vec(),
            timeout,
            http_error_is_blocked: false,
        }
    }

    /// Count 4xx/5xx responses as blocked.
    pub fn with_http_error_is_blocked(mut self, enabled: bool) -> Self {
        self.http_error_is_blocked = enabled;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Request each URL in turn; the first network-layer failure decides.
    ///
    /// Each request is bounded by the probe timeout. An expired request is
    /// dropped, which cancels it, and counts as a network failure.
    pub async fn run(&self, transport: &dyn Transport) -> GateResult<ProbeResult> {
        if self.urls.is_empty() {
            return Ok(ProbeResult::Indeterminate);
        }

        for url in &self.urls {
            let request = BaitRequest::head(url.as_str(), self.timeout);
            match tokio::time::timeout(self.timeout, transport.request(&request)).await {
                Err(_) => {
                    debug!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "Bait URL timed out");
                    return Ok(ProbeResult::Blocked);
                }
                Ok(Err(e)) if e.is_network_failure() => {
                    debug!(url = %url, error = %e, "Bait URL failed at network layer");
                    return Ok(ProbeResult::Blocked);
                }
                Ok(Err(e)) => {
                    warn!(url = %url, error = %e, "Bait URL request errored; ignoring");
                }
                Ok(Ok(status)) if status >= 400 => {
                    if self.http_error_is_blocked {
                        debug!(url = %url, status, "Bait URL returned HTTP error");
                        return Ok(ProbeResult::Blocked);
                    }
                }
                Ok(Ok(_)) => {}
            }
        }

        Ok(ProbeResult::NotBlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reachable_urls_are_not_blocked() {
        let host = MemoryHost::new();
        let probe = BaitUrlProbe::new(&urls(&["/ads.js", "/banner.jpg"]), Duration::from_secs(5));
        assert_eq!(probe.run(&host).await.unwrap(), ProbeResult::NotBlocked);
        assert_eq!(host.request_count(), 2);
    }

    #[tokio::test]
    async fn test_network_failure_blocks_and_stops_early() {
        let host = MemoryHost::new();
        host.block_url("/ads.js");
        let probe = BaitUrlProbe::new(&urls(&["/ads.js", "/banner.jpg"]), Duration::from_secs(5));
        assert_eq!(probe.run(&host).await.unwrap(), ProbeResult::Blocked);
        assert_eq!(host.request_count(), 1);
    }

    #[tokio::test]
    async fn test_http_error_status_is_not_blocked_by_default() {
        let host = MemoryHost::new();
        host.set_status("/ads.js", 404);
        host.set_status("/doubleclick", 503);
        let list = urls(&["/ads.js", "/doubleclick"]);

        let probe = BaitUrlProbe::new(&list, Duration::from_secs(5));
        assert_eq!(probe.run(&host).await.unwrap(), ProbeResult::NotBlocked);

        let strict = probe.with_http_error_is_blocked(true);
        assert_eq!(strict.run(&host).await.unwrap(), ProbeResult::Blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_times_out_as_blocked() {
        let host = MemoryHost::new();
        host.set_latency(Duration::from_secs(30));
        let probe = BaitUrlProbe::new(&urls(&["/ads.js"]), Duration::from_secs(5));
        assert_eq!(probe.run(&host).await.unwrap(), ProbeResult::Blocked);
        assert_eq!(host.requests_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_empty_url_list_is_indeterminate() {
        let host = MemoryHost::new();
        let probe = BaitUrlProbe::new(&[], Duration::from_secs(5));
        assert_eq!(probe.run(&host).await.unwrap(), ProbeResult::Indeterminate);
    }
}
