//! Reachability probes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::ConnectivitySettings;

/// A lightweight check of whether the remote backend is reachable.
///
/// Implementations never fail: every error is reported as `false`.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probes `HEAD {base_url}{health_path}` and treats exactly `200 OK` as reachable.
///
/// Non-200 statuses, timeouts, refused connections and DNS failures are all
/// plain failures.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(base_url: &str, health_path: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: join_url(base_url, health_path),
        })
    }

    pub fn from_settings(settings: &ConnectivitySettings) -> Result<Self, reqwest::Error> {
        Self::new(
            &settings.base_url,
            &settings.health_path,
            Duration::from_secs(settings.probe_timeout_secs),
        )
    }

    /// The URL being probed
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                let status = response.status();
                if status != StatusCode::OK {
                    tracing::debug!(url = %self.url, status = %status, "Probe returned unexpected status");
                }
                status == StatusCode::OK
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Probe request failed");
                false
            }
        }
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
