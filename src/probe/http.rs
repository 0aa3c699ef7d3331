//! HTTP health probe for services exposing a cheap metadata endpoint.
//!
//! Any answer other than throttling (429) or a server error (5xx) counts as
//! responsive. In particular 401 and 403 prove the service is up even though
//! the probe carries no usable token.

use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::debug;

use super::{duration_millis, HealthProbe, ProbeFuture, ProbeResult};
use crate::config::ProbeConfig;
use crate::{AppError, Result};

/// Probe issuing a single GET against a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
    credential: Option<(String, String)>,
}

impl HttpHealthProbe {
    /// Probe `url` with a default client and no credential.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            credential: None,
        }
    }

    /// Use a shared client (connection pool, proxy settings).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Send `value` in the `header` request header.
    #[must_use]
    pub fn with_credential(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.credential = Some((header.into(), value.into()));
        self
    }

    /// Build a probe from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an auth header is configured but no
    /// credential was loaded.
    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        let probe = Self::new(config.url.clone());
        match (&config.auth_header, &config.credential) {
            (Some(header), Some(value)) => Ok(probe.with_credential(header, value)),
            (Some(header), None) => Err(AppError::Config(format!(
                "probe auth header {header} configured but no credential loaded"
            ))),
            (None, _) => Ok(probe),
        }
    }

    /// The probed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform one GET and report whether the service answered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the request could not be sent or no
    /// response arrived.
    pub async fn check(&self) -> Result<ProbeResult> {
        let mut request = self.client.get(&self.url);
        if let Some((ref header, ref value)) = self.credential {
            request = request.header(header.as_str(), value.as_str());
        }

        let started = Instant::now();
        let response = request.send().await?;
        let latency_ms = duration_millis(started.elapsed());
        let status = response.status();
        debug!(url = %self.url, %status, latency_ms, "health probe answered");

        Ok(ProbeResult {
            responsive: is_responsive(status),
            latency_ms,
        })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(self.check())
    }
}

/// Whether `status` shows the service is answering normally.
#[must_use]
pub fn is_responsive(status: StatusCode) -> bool {
    status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error()
}
