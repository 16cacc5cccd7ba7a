// propagate-rs/src/contract.rs
// Parsed OpenAPI contract documents and immutable snapshots.
//
// Documents are held as a JSON value tree regardless of whether the source
// file was YAML or JSON; YAML 1.2 is a superset of JSON so a single parse
// path covers both. `$ref` pointers are resolved within the document.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

/// Depth limit when expanding `$ref` chains, guarding against reference
/// cycles inside a malformed document.
const MAX_REF_DEPTH: usize = 16;

/// HTTP methods recognized inside a path item.
pub const HTTP_METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "options", "head"];

/// A parsed OpenAPI 3.x document.
#[derive(Debug, Clone)]
pub struct ContractDocument {
    root: Value,
}

impl ContractDocument {
    /// Parse an OpenAPI document from YAML or JSON text.
    pub fn parse(raw: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(raw)
            .map_err(|e| EngineError::input(format!("malformed OpenAPI document: {e}")))?;
        if !root.is_object() {
            return Err(EngineError::input(
                "malformed OpenAPI document: top level is not an object",
            ));
        }
        Ok(Self { root })
    }

    /// An empty baseline document, used when diffing against no prior snapshot.
    pub fn empty() -> Self {
        Self {
            root: serde_json::json!({ "openapi": "3.1.0", "info": {}, "paths": {} }),
        }
    }

    /// Route templates and their path items, in sorted order.
    pub fn paths(&self) -> BTreeMap<&str, &Value> {
        self.root
            .get("paths")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default()
    }

    /// Resolve a `$ref` pointer of the form `#/components/schemas/Name`.
    pub fn resolve_ref(&self, pointer: &str) -> Option<&Value> {
        let mut node = &self.root;
        for part in pointer.trim_start_matches("#/").split('/') {
            node = node.get(part)?;
        }
        Some(node)
    }

    /// Follow a node through at most one `$ref` hop.
    pub fn resolve<'a>(&'a self, node: &'a Value) -> &'a Value {
        match node.get("$ref").and_then(Value::as_str) {
            Some(pointer) => self.resolve_ref(pointer).unwrap_or(node),
            None => node,
        }
    }

    /// Deep-copy a schema with every `$ref` expanded, so structural
    /// comparison sees the referenced shape instead of the pointer.
    pub fn resolve_deep(&self, node: &Value) -> Value {
        self.resolve_deep_inner(node, 0)
    }

    fn resolve_deep_inner(&self, node: &Value, depth: usize) -> Value {
        if depth >= MAX_REF_DEPTH {
            return node.clone();
        }
        let node = self.resolve(node);
        match node {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(k, _)| k.as_str() != "$ref")
                    .map(|(k, v)| (k.clone(), self.resolve_deep_inner(v, depth + 1)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_deep_inner(v, depth + 1))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Properties of a schema node, `$ref`-resolved, keyed by name.
    pub fn schema_properties(&self, schema: &Value) -> BTreeMap<String, Value> {
        self.resolve(schema)
            .get("properties")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_deep(v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `required` list of a schema node as a set.
    pub fn required_fields(&self, schema: &Value) -> BTreeSet<String> {
        self.resolve(schema)
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// SHA-256 of the raw contract text, hex encoded.
pub fn content_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

/// The persisted last-known contract of a producer service. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractVersion {
    pub service_id: String,
    pub version_id: String,
    pub hash: String,
    pub captured_at: DateTime<Utc>,
    /// Raw document text; re-parsed on load.
    pub content: String,
}

impl ContractVersion {
    pub fn capture(service_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        Self {
            service_id: service_id.into(),
            version_id: hash[..16].to_string(),
            hash,
            captured_at: Utc::now(),
            content,
        }
    }

    pub fn document(&self) -> Result<ContractDocument> {
        ContractDocument::parse(&self.content)
    }
}
