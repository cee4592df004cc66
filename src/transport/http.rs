use super::{Transport, TransportError, TransportStats};
use crate::command::Command;
use crate::config::ControllerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sends each command as `GET <endpoint>?<query_key>=<value>`
///
/// Every send spawns its own request task on the current tokio runtime, so
/// a slow controller never delays the next command. Requests are bounded by
/// the configured timeout and are not retried.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    query_key: String,
    stats: Arc<TransportStats>,
}

impl HttpTransport {
    pub fn new(config: &ControllerConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::InitializationError(e.to_string()))?;

        info!("HTTP transport targeting {}", config.endpoint);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            query_key: config.query_key.clone(),
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        self.stats.clone()
    }

    /// URL carrying the command's wire value
    pub fn request_url(&self, command: Command) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}={}",
            self.endpoint,
            separator,
            self.query_key,
            command.wire_value()
        )
    }

    async fn deliver(
        client: reqwest::Client,
        url: String,
    ) -> Result<String, TransportError> {
        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(response.text().await?)
    }
}

impl Transport for HttpTransport {
    fn send(&self, command: Command) {
        let url = self.request_url(command);
        let client = self.client.clone();
        let stats = self.stats.clone();

        stats.record_sent();
        debug!("Sending {} via {}", command, url);

        tokio::spawn(async move {
            match Self::deliver(client, url).await {
                Ok(body) => {
                    stats.record_success();
                    debug!("Controller acknowledged {}: {}", command, body.trim());
                }
                Err(e) => {
                    stats.record_failure();
                    warn!("Transport failure for {}: {}", command, e);
                }
            }
        });
    }
}
