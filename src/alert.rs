use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::monitoring::AlertDispatcher;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts downtime notifications as JSON to a configured webhook endpoint.
/// Delivery beyond the HTTP call (retries, fan-out to email/SMS) is the
/// receiver's business.
pub struct WebhookAlerter {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookAlerter {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .context("failed to build alert HTTP client")?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl AlertDispatcher for WebhookAlerter {
    async fn notify(&self, contact: &str, monitor_name: &str, url: &str) -> Result<()> {
        let payload = json!({
            "contact": contact,
            "monitor": monitor_name,
            "url": url,
            "message": format!("Monitor '{monitor_name}' is down: {url}"),
        });

        self.client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("alert webhook request failed")?
            .error_for_status()
            .context("alert webhook rejected the notification")?;

        Ok(())
    }
}

/// Fallback dispatcher used when no webhook is configured: downtime is only
/// logged.
pub struct LogAlerter;

#[async_trait]
impl AlertDispatcher for LogAlerter {
    async fn notify(&self, contact: &str, monitor_name: &str, url: &str) -> Result<()> {
        tracing::warn!("DOWNTIME: monitor '{monitor_name}' ({url}), owner {contact}");
        Ok(())
    }
}
