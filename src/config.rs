// propagate-rs/src/config.rs
// Environment-driven configuration for the propagation engine.
//
// All options live under the PROPAGATE_ prefix. Unknown PROPAGATE_* keys are
// rejected at startup so a typo in a deployment manifest fails loudly instead
// of silently running with a default.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{EngineError, Result};

pub const ENV_PREFIX: &str = "PROPAGATE_";

/// Every option the engine understands, without the prefix.
const KNOWN_KEYS: &[&str] = &[
    "DATABASE_URL",
    "AGENT_API_KEY",
    "AGENT_API_BASE",
    "GIT_TOKEN",
    "GIT_API_BASE",
    "SYNC_ENABLED",
    "MAX_CONCURRENT_SESSIONS",
    "POLL_INTERVAL_SECONDS",
    "SESSION_TIMEOUT_MINUTES",
    "TELEMETRY_WINDOW_DAYS",
    "PROTECTED_PATH_GLOBS",
    "CONTRACT_PATH",
    "SERVICE_MAP_PATH",
    "TELEMETRY_PATH",
    "PRODUCER_SERVICE",
    "WEBHOOK_URL",
];

#[derive(Debug, Clone)]
pub struct Settings {
    /// Filesystem path (or `file:` URL) to the data directory holding the
    /// journal-backed tables and the audit log.
    pub database_url: String,
    pub agent_api_key: String,
    pub agent_api_base: String,
    pub git_token: String,
    pub git_api_base: String,
    pub sync_enabled: bool,
    pub max_concurrent_sessions: usize,
    pub poll_interval_seconds: u64,
    pub session_timeout_minutes: u64,
    pub telemetry_window_days: i64,
    pub protected_path_globs: Vec<String>,
    pub contract_path: PathBuf,
    pub service_map_path: PathBuf,
    pub telemetry_path: PathBuf,
    pub producer_service: String,
    pub webhook_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "./data".to_string(),
            agent_api_key: String::new(),
            agent_api_base: "https://api.agent.example/v1".to_string(),
            git_token: String::new(),
            git_api_base: "https://api.github.com".to_string(),
            sync_enabled: false,
            max_concurrent_sessions: 4,
            poll_interval_seconds: 30,
            session_timeout_minutes: 90,
            telemetry_window_days: 7,
            protected_path_globs: vec![
                "infra/**".to_string(),
                ".github/workflows/**".to_string(),
                "terraform/**".to_string(),
                "k8s/**".to_string(),
            ],
            contract_path: PathBuf::from("openapi.yaml"),
            service_map_path: PathBuf::from("service_map.yaml"),
            telemetry_path: PathBuf::from("telemetry.ndjson"),
            producer_service: "api-core".to_string(),
            webhook_url: None,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Fails on any PROPAGATE_* variable that is not a known option, and on
    /// values that do not parse or validate.
    pub fn from_env() -> Result<Self> {
        let vars: BTreeMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::from_vars(&vars)
    }

    /// Same as [`Settings::from_env`] but over an explicit map, for tests.
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self> {
        for key in vars.keys() {
            let bare = &key[ENV_PREFIX.len()..];
            if !KNOWN_KEYS.contains(&bare) {
                return Err(EngineError::config(format!(
                    "unknown configuration option {key}; known options are {}",
                    KNOWN_KEYS
                        .iter()
                        .map(|k| format!("{ENV_PREFIX}{k}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }

        let get = |bare: &str| vars.get(&format!("{ENV_PREFIX}{bare}")).cloned();
        let defaults = Settings::default();

        let settings = Settings {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            agent_api_key: get("AGENT_API_KEY").unwrap_or_default(),
            agent_api_base: get("AGENT_API_BASE").unwrap_or(defaults.agent_api_base),
            git_token: get("GIT_TOKEN").unwrap_or_default(),
            git_api_base: get("GIT_API_BASE").unwrap_or(defaults.git_api_base),
            sync_enabled: parse_bool("SYNC_ENABLED", get("SYNC_ENABLED"))?
                .unwrap_or(defaults.sync_enabled),
            max_concurrent_sessions: parse_num("MAX_CONCURRENT_SESSIONS", get("MAX_CONCURRENT_SESSIONS"))?
                .unwrap_or(defaults.max_concurrent_sessions),
            poll_interval_seconds: parse_num("POLL_INTERVAL_SECONDS", get("POLL_INTERVAL_SECONDS"))?
                .unwrap_or(defaults.poll_interval_seconds),
            session_timeout_minutes: parse_num("SESSION_TIMEOUT_MINUTES", get("SESSION_TIMEOUT_MINUTES"))?
                .unwrap_or(defaults.session_timeout_minutes),
            telemetry_window_days: parse_num("TELEMETRY_WINDOW_DAYS", get("TELEMETRY_WINDOW_DAYS"))?
                .unwrap_or(defaults.telemetry_window_days),
            protected_path_globs: get("PROTECTED_PATH_GLOBS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.protected_path_globs),
            contract_path: get("CONTRACT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.contract_path),
            service_map_path: get("SERVICE_MAP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.service_map_path),
            telemetry_path: get("TELEMETRY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.telemetry_path),
            producer_service: get("PRODUCER_SERVICE").unwrap_or(defaults.producer_service),
            webhook_url: get("WEBHOOK_URL").filter(|v| !v.is_empty()),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 || self.max_concurrent_sessions > 64 {
            return Err(EngineError::config(
                "max_concurrent_sessions must be between 1 and 64",
            ));
        }
        if self.poll_interval_seconds == 0 || self.poll_interval_seconds > 3600 {
            return Err(EngineError::config(
                "poll_interval_seconds must be between 1 and 3600",
            ));
        }
        if self.session_timeout_minutes == 0 {
            return Err(EngineError::config("session_timeout_minutes must be positive"));
        }
        if self.telemetry_window_days <= 0 || self.telemetry_window_days > 90 {
            return Err(EngineError::config(
                "telemetry_window_days must be between 1 and 90",
            ));
        }
        if self.producer_service.is_empty() {
            return Err(EngineError::config("producer_service must not be empty"));
        }
        self.data_dir().map(|_| ())
    }

    /// Resolve `database_url` into the data directory path. Only plain paths
    /// and `file:` URLs are accepted.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let url = self.database_url.trim();
        if url.is_empty() {
            return Err(EngineError::config("database_url must not be empty"));
        }
        if let Some(rest) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(rest));
        }
        if let Some(rest) = url.strip_prefix("file:") {
            return Ok(PathBuf::from(rest));
        }
        if url.contains("://") {
            return Err(EngineError::config(format!(
                "unsupported database_url scheme in {url}; expected a path or file: URL"
            )));
        }
        Ok(PathBuf::from(url))
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<Option<bool>> {
    match value {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(EngineError::config(format!(
                "invalid boolean for {ENV_PREFIX}{key}: {other}"
            ))),
        },
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EngineError::config(format!("invalid value for {ENV_PREFIX}{key}: {e}"))),
    }
}
