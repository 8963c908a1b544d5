//! Record replayers

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ReplaySettings;
use crate::queue::QueueRecord;

use super::ReplayError;

/// Resubmits one buffered record against the real backend.
///
/// Delivery is at-least-once, so implementations must tolerate seeing the
/// same record twice.
#[async_trait]
pub trait RecordReplayer: Send + Sync {
    async fn replay(&self, record: &QueueRecord) -> Result<(), ReplayError>;
}

/// POSTs each record as a JSON body to a fixed endpoint; any 2xx is success.
pub struct HttpReplayer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpReplayer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// `None` when no replay endpoint is configured
    pub fn from_settings(settings: &ReplaySettings) -> Result<Option<Self>, reqwest::Error> {
        settings
            .endpoint
            .as_ref()
            .map(|endpoint| {
                Self::new(
                    endpoint.clone(),
                    settings.api_key.clone(),
                    Duration::from_secs(settings.timeout_secs),
                )
            })
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecordReplayer for HttpReplayer {
    async fn replay(&self, record: &QueueRecord) -> Result<(), ReplayError> {
        let mut request = self.client.post(&self.endpoint).json(record);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ReplayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
