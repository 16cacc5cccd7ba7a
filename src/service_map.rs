// propagate-rs/src/service_map.rs
// Declared producer -> consumer dependencies and per-consumer repo
// conventions, loaded from a YAML file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One directed dependency edge. Edges from the service map are declared;
/// edges synthesized from telemetry are not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEdge {
    pub producer: String,
    pub consumer: String,
    pub declared: bool,
}

/// Repo conventions for a single consumer service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub repo: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub client_paths: Vec<String>,
    #[serde(default)]
    pub test_paths: Vec<String>,
    #[serde(default)]
    pub protected_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMap {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceInfo>,
}

impl ServiceMap {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            EngineError::input(format!("cannot read service map {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let map: ServiceMap = serde_yaml::from_str(raw)
            .map_err(|e| EngineError::input(format!("malformed service map: {e}")))?;
        if map.services.is_empty() {
            return Err(EngineError::input("service map declares no services"));
        }
        Ok(map)
    }

    pub fn get(&self, consumer: &str) -> Option<&ServiceInfo> {
        self.services.get(consumer)
    }

    /// Consumers that declare a dependency on the producer, sorted.
    pub fn declared_consumers_of(&self, producer: &str) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, info)| info.depends_on.iter().any(|d| d == producer))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// All declared edges in the map.
    pub fn edges(&self) -> Vec<ServiceEdge> {
        self.services
            .iter()
            .flat_map(|(consumer, info)| {
                info.depends_on.iter().map(move |producer| ServiceEdge {
                    producer: producer.clone(),
                    consumer: consumer.clone(),
                    declared: true,
                })
            })
            .collect()
    }

    /// Whether `consumer` declares a dependency on `dependency`.
    pub fn declares(&self, consumer: &str, dependency: &str) -> bool {
        self.services
            .get(consumer)
            .map(|info| info.depends_on.iter().any(|d| d == dependency))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MAP: &str = r#"
services:
  billing-service:
    repo: org/billing-service
    depends_on: [api-core]
    client_paths: [src/api_client.rs]
    test_paths: [tests/api.rs]
  dashboard-service:
    repo: org/dashboard-service
    depends_on: [api-core, billing-service]
    client_paths: [src/core_client.ts]
  invoice-service:
    repo: org/invoice-service
    depends_on: [billing-service]
"#;

    #[test]
    fn parses_and_indexes() {
        let map = ServiceMap::parse(MAP).unwrap();
        assert_eq!(map.services.len(), 3);
        assert_eq!(
            map.declared_consumers_of("api-core"),
            vec!["billing-service".to_string(), "dashboard-service".to_string()]
        );
        assert!(map.declares("dashboard-service", "billing-service"));
        assert!(!map.declares("billing-service", "dashboard-service"));
    }

    #[test]
    fn edges_are_declared() {
        let map = ServiceMap::parse(MAP).unwrap();
        let edges = map.edges();
        assert_eq!(edges.len(), 4);
        assert!(edges.iter().all(|e| e.declared));
    }

    #[test]
    fn empty_map_is_an_input_error() {
        assert!(ServiceMap::parse("services: {}").is_err());
    }
}
