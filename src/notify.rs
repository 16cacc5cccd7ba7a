// propagate-rs/src/notify.rs
// Fire-and-forget webhook emission.
//
// Failures are logged but never returned: notification delivery must not
// block or fail the remediation pipeline.

use std::time::Duration;

use serde_json::Value;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Notifier {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("propagate-rs")
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    /// POST the payload to the configured webhook. Silent on failure.
    pub async fn emit(&self, path: &str, payload: &Value) {
        let base = match &self.base_url {
            Some(base) if !base.is_empty() => base.clone(),
            _ => {
                tracing::debug!("webhook_url not configured; skipping webhook");
                return;
            }
        };

        let url = format!("{}{}", base.trim_end_matches('/'), path);
        match self.client.post(&url).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(url = %url, "webhook delivered");
            }
            Ok(resp) => {
                tracing::warn!(url = %url, status = %resp.status(), "webhook rejected (non-fatal)");
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "webhook failed (non-fatal)");
            }
        }
    }
}
