// propagate-rs/src/agent.rs
// Client for the external coding-agent API: session creation, polling, and
// follow-up messages.
//
// Session creation carries the bundle fingerprint as an idempotency key, so
// a retried or restarted dispatch can never open a second session for the
// same remediation content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::resilience::{RetryConfig, RetryExecutor};

#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest {
    pub repo_ref: String,
    pub prompt: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
}

/// Coarse agent-side session state, normalized from the provider's
/// status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSessionState {
    /// Session accepted and actively working.
    Working,
    /// Agent is blocked and waiting on a human.
    Blocked,
    /// Session ended normally.
    Stopped,
    /// Agent reported an unrecoverable error.
    Failed,
}

impl AgentSessionState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "blocked" => AgentSessionState::Blocked,
            "stopped" | "finished" | "completed" | "succeeded" => AgentSessionState::Stopped,
            "failed" | "error" | "cancelled" => AgentSessionState::Failed,
            // queued / created / running / in_progress and anything new.
            _ => AgentSessionState::Working,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: AgentSessionState,
    pub pr_url: Option<String>,
    pub detail: String,
}

#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionHandle>;
    async fn poll_session(&self, session_id: &str) -> Result<SessionStatus>;
    async fn send_message(&self, session_id: &str, message: &str) -> Result<()>;
}

/// HTTP implementation against the agent provider's REST API.
#[derive(Debug)]
pub struct HttpAgentClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryExecutor,
}

impl HttpAgentClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(EngineError::config(
                "agent API key is required; set PROPAGATE_AGENT_API_KEY",
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent("propagate-rs")
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| EngineError::config(format!("cannot build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            retry: RetryExecutor::new(RetryConfig::default()),
        })
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        self.retry
            .execute("agent-api", || async {
                let mut req = self
                    .client
                    .request(method.clone(), url)
                    .bearer_auth(&self.api_key);
                if let Some(body) = body {
                    req = req.json(body);
                }
                let resp = req.send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(EngineError::from_status(status.as_u16(), url));
                }
                resp.json::<Value>().await.map_err(EngineError::from)
            })
            .await
    }
}

/// Extract a PR URL from the known response shapes:
/// `structured_output.pull_request.url`, `pull_request.url`,
/// `pull_request_url`, `pr_url`.
fn extract_pr_url(payload: &Value) -> Option<String> {
    if let Some(url) = payload
        .get("structured_output")
        .and_then(|s| s.get("pull_request"))
        .and_then(|pr| pr.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }
    if let Some(url) = payload
        .get("pull_request")
        .and_then(|pr| pr.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }
    for key in ["pull_request_url", "pr_url"] {
        if let Some(url) = payload.get(key).and_then(Value::as_str) {
            if !url.is_empty() {
                return Some(url.to_string());
            }
        }
    }
    None
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
        let payload = serde_json::json!({
            "repo_ref": request.repo_ref,
            "prompt": request.prompt,
            "idempotency_key": request.idempotency_key,
        });
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .request_json(reqwest::Method::POST, &url, Some(&payload))
            .await?;

        let session_id = response
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::permanent("session creation response has no session_id"))?
            .to_string();

        tracing::info!(session_id = %session_id, repo = %request.repo_ref, "agent session created");
        Ok(SessionHandle { session_id })
    }

    async fn poll_session(&self, session_id: &str) -> Result<SessionStatus> {
        let url = format!("{}/sessions/{session_id}", self.base_url);
        let response = self.request_json(reqwest::Method::GET, &url, None).await?;

        let raw_status = response
            .get("status_enum")
            .or_else(|| response.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let detail = response
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or(raw_status)
            .to_string();

        Ok(SessionStatus {
            state: AgentSessionState::parse(raw_status),
            pr_url: extract_pr_url(&response),
            detail,
        })
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<()> {
        let url = format!("{}/sessions/{session_id}/messages", self.base_url);
        let payload = serde_json::json!({ "message": message });
        self.request_json(reqwest::Method::POST, &url, Some(&payload))
            .await?;
        Ok(())
    }
}
