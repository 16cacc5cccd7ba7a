// propagate-rs/src/providers.rs
// CI status and changed-file lookups against the git provider.
//
// Both lookups sit behind traits so the supervisor can be driven by mocks
// in tests; the HTTP implementation targets the GitHub REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::resilience::{RetryConfig, RetryExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
    Unknown,
}

impl CiStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "success" | "passed" => CiStatus::Success,
            "failure" | "failed" | "error" => CiStatus::Failure,
            "pending" | "in_progress" | "queued" => CiStatus::Pending,
            _ => CiStatus::Unknown,
        }
    }
}

impl std::fmt::Display for CiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CiStatus::Success => write!(f, "success"),
            CiStatus::Failure => write!(f, "failure"),
            CiStatus::Pending => write!(f, "pending"),
            CiStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiCheck {
    pub status: CiStatus,
    pub checked_at: DateTime<Utc>,
}

#[async_trait]
pub trait CiStatusApi: Send + Sync {
    async fn status(&self, pr_url: &str) -> Result<CiCheck>;
}

#[async_trait]
pub trait ChangedFilesApi: Send + Sync {
    async fn changed_files(&self, pr_url: &str) -> Result<Vec<String>>;
}

/// `https://github.com/{owner}/{repo}/pull/{number}` -> (owner, repo, number)
fn parse_pr_url(pr_url: &str) -> Result<(String, String, u64)> {
    let tail = pr_url
        .split("github.com/")
        .nth(1)
        .ok_or_else(|| EngineError::permanent(format!("unrecognized PR URL: {pr_url}")))?;
    let parts: Vec<&str> = tail.trim_end_matches('/').split('/').collect();
    match parts.as_slice() {
        [owner, repo, "pull", number, ..] => {
            let number = number.parse::<u64>().map_err(|_| {
                EngineError::permanent(format!("unrecognized PR number in URL: {pr_url}"))
            })?;
            Ok((owner.to_string(), repo.to_string(), number))
        }
        _ => Err(EngineError::permanent(format!(
            "unrecognized PR URL: {pr_url}"
        ))),
    }
}

/// GitHub REST implementation of both lookups.
pub struct GitHubProvider {
    api_base: String,
    token: String,
    client: reqwest::Client,
    retry: RetryExecutor,
}

impl GitHubProvider {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("propagate-rs")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::config(format!("cannot build http client: {e}")))?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
            retry: RetryExecutor::new(RetryConfig::default()),
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        self.retry
            .execute("git-provider", || async {
                let mut req = self.client.get(url);
                if !self.token.is_empty() {
                    req = req.bearer_auth(&self.token);
                }
                let resp = req.send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(EngineError::from_status(status.as_u16(), url));
                }
                resp.json::<serde_json::Value>()
                    .await
                    .map_err(EngineError::from)
            })
            .await
    }
}

#[async_trait]
impl CiStatusApi for GitHubProvider {
    async fn status(&self, pr_url: &str) -> Result<CiCheck> {
        let (owner, repo, number) = parse_pr_url(pr_url)?;

        let pr = self
            .get_json(&format!("{}/repos/{owner}/{repo}/pulls/{number}", self.api_base))
            .await?;
        let head_sha = pr
            .get("head")
            .and_then(|h| h.get("sha"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EngineError::permanent(format!("PR {pr_url} has no head sha")))?;

        let combined = self
            .get_json(&format!(
                "{}/repos/{owner}/{repo}/commits/{head_sha}/status",
                self.api_base
            ))
            .await?;
        let status = combined
            .get("state")
            .and_then(serde_json::Value::as_str)
            .map(CiStatus::parse)
            .unwrap_or(CiStatus::Unknown);

        Ok(CiCheck {
            status,
            checked_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ChangedFilesApi for GitHubProvider {
    async fn changed_files(&self, pr_url: &str) -> Result<Vec<String>> {
        let (owner, repo, number) = parse_pr_url(pr_url)?;
        let files = self
            .get_json(&format!(
                "{}/repos/{owner}/{repo}/pulls/{number}/files?per_page=100",
                self.api_base
            ))
            .await?;

        let paths = files
            .as_array()
            .ok_or_else(|| EngineError::permanent("unexpected changed-files payload"))?
            .iter()
            .filter_map(|f| f.get("filename").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(paths)
    }
}
