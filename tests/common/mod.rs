// Shared test doubles and fixtures for the integration tests: a scripted
// agent API, programmable CI and changed-file providers, and on-disk
// contract/service-map/telemetry fixtures.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use propagate_rs::agent::{AgentApi, AgentSessionState, SessionHandle, SessionRequest, SessionStatus};
use propagate_rs::error::{EngineError, Result};
use propagate_rs::notify::Notifier;
use propagate_rs::pipeline::PipelineContext;
use propagate_rs::providers::{ChangedFilesApi, CiCheck, CiStatus, CiStatusApi};
use propagate_rs::store::DataStore;
use propagate_rs::Settings;

/// How a scripted agent session behaves when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentScript {
    /// Opens a PR on the first poll and keeps working.
    OpensPr,
    /// Never opens a PR, never finishes.
    WorksForever,
    /// Reports blocked on the first poll.
    Blocked,
    /// Stops without ever opening a PR.
    StopsWithoutPr,
}

pub struct MockAgent {
    scripts: HashMap<String, AgentScript>,
    pub created: AtomicUsize,
    /// repo_refs in session-creation order.
    pub creation_order: Mutex<Vec<String>>,
    pub idempotency_keys: Mutex<Vec<String>>,
    /// session_id -> repo_ref
    sessions: Mutex<HashMap<String, String>>,
    /// session_id -> completed polls
    pub poll_counts: Mutex<HashMap<String, usize>>,
    /// Global countdown of injected transient poll failures.
    pub transient_poll_failures: AtomicUsize,
    /// When set, every poll fails permanently.
    pub permanent_poll_failure: std::sync::atomic::AtomicBool,
}

impl MockAgent {
    pub fn new(scripts: &[(&str, AgentScript)]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(repo, script)| (repo.to_string(), *script))
                .collect(),
            created: AtomicUsize::new(0),
            creation_order: Mutex::new(Vec::new()),
            idempotency_keys: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            poll_counts: Mutex::new(HashMap::new()),
            transient_poll_failures: AtomicUsize::new(0),
            permanent_poll_failure: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn pr_url_for(repo: &str) -> String {
        format!("https://github.com/{repo}/pull/1")
    }

    pub fn polls_for_repo(&self, repo: &str) -> usize {
        let sessions = self.sessions.lock().unwrap();
        let counts = self.poll_counts.lock().unwrap();
        sessions
            .iter()
            .filter(|(_, r)| r.as_str() == repo)
            .map(|(session_id, _)| counts.get(session_id).copied().unwrap_or(0))
            .sum()
    }
}

#[async_trait]
impl AgentApi for MockAgent {
    async fn create_session(&self, request: &SessionRequest) -> Result<SessionHandle> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("sess-{n}");
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), request.repo_ref.clone());
        self.creation_order
            .lock()
            .unwrap()
            .push(request.repo_ref.clone());
        self.idempotency_keys
            .lock()
            .unwrap()
            .push(request.idempotency_key.clone());
        Ok(SessionHandle { session_id })
    }

    async fn poll_session(&self, session_id: &str) -> Result<SessionStatus> {
        if self.permanent_poll_failure.load(Ordering::SeqCst) {
            return Err(EngineError::permanent("session lookup returned 404"));
        }
        if self
            .transient_poll_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::transient("agent API briefly unavailable"));
        }

        let repo = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::permanent(format!("unknown session {session_id}")))?;
        *self
            .poll_counts
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_insert(0) += 1;

        let script = self
            .scripts
            .get(&repo)
            .copied()
            .unwrap_or(AgentScript::OpensPr);

        Ok(match script {
            AgentScript::OpensPr => SessionStatus {
                state: AgentSessionState::Working,
                pr_url: Some(Self::pr_url_for(&repo)),
                detail: "working with PR open".to_string(),
            },
            AgentScript::WorksForever => SessionStatus {
                state: AgentSessionState::Working,
                pr_url: None,
                detail: "still working".to_string(),
            },
            AgentScript::Blocked => SessionStatus {
                state: AgentSessionState::Blocked,
                pr_url: None,
                detail: "waiting on credentials".to_string(),
            },
            AgentScript::StopsWithoutPr => SessionStatus {
                state: AgentSessionState::Stopped,
                pr_url: None,
                detail: "gave up".to_string(),
            },
        })
    }

    async fn send_message(&self, _session_id: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

pub struct MockCi {
    pub default_status: CiStatus,
    /// Per-PR status sequences consumed one per lookup before falling back
    /// to the default.
    pub sequences: Mutex<HashMap<String, VecDeque<CiStatus>>>,
    pub calls: AtomicUsize,
}

impl MockCi {
    pub fn always(status: CiStatus) -> Self {
        Self {
            default_status: status,
            sequences: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CiStatusApi for MockCi {
    async fn status(&self, pr_url: &str) -> Result<CiCheck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .sequences
            .lock()
            .unwrap()
            .get_mut(pr_url)
            .and_then(|seq| seq.pop_front())
            .unwrap_or(self.default_status);
        Ok(CiCheck {
            status,
            checked_at: Utc::now(),
        })
    }
}

pub struct MockGit {
    pub default_files: Vec<String>,
    pub fail_always: bool,
    pub calls: AtomicUsize,
}

impl MockGit {
    pub fn with_files(files: &[&str]) -> Self {
        Self {
            default_files: files.iter().map(|f| f.to_string()).collect(),
            fail_always: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            default_files: Vec::new(),
            fail_always: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChangedFilesApi for MockGit {
    async fn changed_files(&self, _pr_url: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_always {
            return Err(EngineError::permanent("file list endpoint returns 422"));
        }
        Ok(self.default_files.clone())
    }
}

// --- fixtures ---

pub const CONTRACT_V1: &str = r#"
openapi: 3.1.0
info:
  title: api-core
paths:
  /api/v1/sessions:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [prompt]
              properties:
                prompt:
                  type: string
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  session_id:
                    type: string
"#;

/// V1 plus a required request field without a default: one high-severity
/// breaking change on POST /api/v1/sessions.
pub const CONTRACT_V2_BREAKING: &str = r#"
openapi: 3.1.0
info:
  title: api-core
paths:
  /api/v1/sessions:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [prompt, max_cost_usd]
              properties:
                prompt:
                  type: string
                max_cost_usd:
                  type: number
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  session_id:
                    type: string
"#;

/// V1 plus one optional response field: additive only.
pub const CONTRACT_V2_ADDITIVE: &str = r#"
openapi: 3.1.0
info:
  title: api-core
paths:
  /api/v1/sessions:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [prompt]
              properties:
                prompt:
                  type: string
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  session_id:
                    type: string
                  notes:
                    type: string
"#;

/// invoice-service declares a dependency on billing-service, so when both
/// are impacted billing must complete first.
pub const SERVICE_MAP: &str = r#"
services:
  billing-service:
    repo: org/billing-service
    depends_on: [api-core]
    client_paths: [src/api_client.py]
    test_paths: [tests/test_api.py]
  invoice-service:
    repo: org/invoice-service
    depends_on: [billing-service, api-core]
    client_paths: [src/core_client.py]
"#;

/// A single declared consumer, for scenarios that want exactly one bundle.
pub const SERVICE_MAP_BILLING_ONLY: &str = r#"
services:
  billing-service:
    repo: org/billing-service
    depends_on: [api-core]
    client_paths: [src/api_client.py]
    test_paths: [tests/test_api.py]
"#;

/// Mutually-dependent consumers; both observed in telemetry.
pub const SERVICE_MAP_CYCLE: &str = r#"
services:
  alpha-service:
    repo: org/alpha-service
    depends_on: [api-core, beta-service]
  beta-service:
    repo: org/beta-service
    depends_on: [api-core, alpha-service]
"#;

pub fn telemetry_line(consumer: &str, method: &str, route: &str, calls: u64) -> String {
    serde_json::json!({
        "consumer": consumer,
        "producer": "api-core",
        "method": method,
        "route_template": route,
        "calls_7d": calls,
        "confidence": "high",
    })
    .to_string()
}

pub async fn write_fixtures(dir: &Path, contract: &str, service_map: &str, telemetry: &[String]) {
    tokio::fs::write(dir.join("openapi.yaml"), contract).await.unwrap();
    tokio::fs::write(dir.join("service_map.yaml"), service_map).await.unwrap();
    tokio::fs::write(dir.join("telemetry.ndjson"), telemetry.join("\n")).await.unwrap();
}

pub fn settings_for(dir: &Path) -> Settings {
    Settings {
        database_url: dir.join("data").to_string_lossy().into_owned(),
        contract_path: dir.join("openapi.yaml"),
        service_map_path: dir.join("service_map.yaml"),
        telemetry_path: dir.join("telemetry.ndjson"),
        producer_service: "api-core".to_string(),
        poll_interval_seconds: 1,
        ..Settings::default()
    }
}

pub async fn context(
    settings: Settings,
    agent: Option<std::sync::Arc<dyn AgentApi>>,
    ci: Option<std::sync::Arc<dyn CiStatusApi>>,
    git: Option<std::sync::Arc<dyn ChangedFilesApi>>,
) -> PipelineContext {
    let store = std::sync::Arc::new(DataStore::open(settings.data_dir().unwrap()).await.unwrap());
    let (shutdown, _) = broadcast::channel(1);
    PipelineContext {
        settings,
        store,
        agent,
        ci,
        git,
        notifier: Notifier::new(None),
        shutdown,
    }
}
