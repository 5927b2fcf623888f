//! HTTP transport for bait URL probes
//!
//! Resolves bait paths against a base URL and issues the request with
//! reqwest. Any error from `send()` (connect, timeout, reset) is a
//! network-layer failure; every response, whatever its status, is a
//! success at this layer. Unparseable URLs are configuration mistakes,
//! not blocking signals.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::{GateError, GateResult};
use crate::host::{BaitRequest, Transport};

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build a transport resolving bait paths against `base_url`.
    pub fn new(base_url: &str) -> GateResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| GateError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GateError::transport(base_url.as_str(), e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a bait path.
    pub fn resolve(&self, path: &str) -> GateResult<Url> {
        self.base_url.join(path).map_err(|e| GateError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: &BaitRequest) -> GateResult<u16> {
        let url = self.resolve(&request.url)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .timeout(request.timeout);
        if request.no_cache {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url = %url, status, "Bait URL responded");
                Ok(status)
            }
            Err(e) => Err(GateError::transport(url.as_str(), e.to_string())),
        }
    }
}
