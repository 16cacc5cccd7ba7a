// propagate-rs/src/classifier.rs
// Severity classification over contract diff entries.
//
// The decision table is first-match-wins. A breaking entry always carries
// severity medium or higher; classification is a pure function so identical
// entries always classify identically.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::differ::{ChangeEntry, ChangeKind, ChangeLocation};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// A diff entry with its severity verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedChange {
    pub entry: ChangeEntry,
    pub severity: Severity,
    pub is_breaking: bool,
    /// Which rule fired, in human-readable form.
    pub rationale: String,
}

/// The classified output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub producer_service: String,
    pub from_version: String,
    pub to_version: String,
    pub changes: Vec<ClassifiedChange>,
    pub severity: Severity,
    pub is_breaking: bool,
}

impl ChangeSet {
    /// Distinct `METHOD path` routes touched by any change, sorted.
    pub fn touched_routes(&self) -> Vec<String> {
        let mut routes: Vec<String> =
            self.changes.iter().map(|c| c.entry.route()).collect();
        routes.sort();
        routes.dedup();
        routes
    }

    pub fn breaking_changes(&self) -> impl Iterator<Item = &ClassifiedChange> {
        self.changes.iter().filter(|c| c.is_breaking)
    }
}

fn has_default(schema: Option<&Value>) -> bool {
    schema
        .and_then(|s| s.get("default"))
        .map(|d| !d.is_null())
        .unwrap_or(false)
}

/// Classify a single diff entry. First matching rule wins.
pub fn classify(entry: ChangeEntry) -> ClassifiedChange {
    let (severity, is_breaking, rationale) = match (&entry.kind, &entry.location) {
        // Removed route or operation.
        (ChangeKind::Removed, _) if entry.field == "operation" => (
            Severity::High,
            true,
            "operation removed".to_string(),
        ),
        // Removed field on a previously-documented response.
        (ChangeKind::Removed, ChangeLocation::Response) => (
            Severity::High,
            true,
            format!("response field {} removed", entry.field),
        ),
        // Added required request field without a default.
        (ChangeKind::RequiredAdded, ChangeLocation::Request)
        | (ChangeKind::RequiredAdded, ChangeLocation::Param)
        | (ChangeKind::RequiredAdded, ChangeLocation::Header)
            if !has_default(entry.after.as_ref()) =>
        {
            (
                Severity::High,
                true,
                format!("required field {} added without default", entry.field),
            )
        }
        // Renamed field, request or response.
        (ChangeKind::Renamed, _) => (
            Severity::High,
            true,
            format!("field {} renamed", entry.field),
        ),
        // Type change tightening (wider -> narrower).
        (ChangeKind::TypeChanged, _) if is_tightening(&entry) => (
            Severity::High,
            true,
            format!("type of {} tightened", entry.field),
        ),
        // Enum narrowing on a response.
        (ChangeKind::EnumNarrowed, ChangeLocation::Response) => (
            Severity::High,
            true,
            format!("response enum {} narrowed", entry.field),
        ),
        // Added required request field with a default, or existing field
        // newly required.
        (ChangeKind::RequiredAdded, _) => (
            Severity::Medium,
            true,
            format!("field {} now required (default present)", entry.field),
        ),
        // Widening type change still forces consumer-side review.
        (ChangeKind::TypeChanged, _) => (
            Severity::Medium,
            true,
            format!("type of {} widened", entry.field),
        ),
        // Request-side enum narrowing breaks callers sending removed values.
        (ChangeKind::EnumNarrowed, _) => (
            Severity::Medium,
            true,
            format!("request enum {} narrowed", entry.field),
        ),
        // A response field no longer guaranteed to be present.
        (ChangeKind::RequiredRemoved, ChangeLocation::Response) => (
            Severity::Medium,
            true,
            format!("response field {} no longer guaranteed", entry.field),
        ),
        // Ambiguous rename halves: the removal side is breaking.
        (ChangeKind::Other, _) if entry.after.is_none() => (
            Severity::High,
            true,
            format!("field {} removed (ambiguous rename)", entry.field),
        ),
        // Marked deprecated.
        (ChangeKind::Deprecated, _) => (
            Severity::Medium,
            false,
            "operation marked deprecated".to_string(),
        ),
        // Removed request field: consumers sending it will be rejected or
        // silently ignored depending on the server; treat as breaking.
        (ChangeKind::Removed, _) => (
            Severity::High,
            true,
            format!("request field {} removed", entry.field),
        ),
        // Additive and informational changes.
        (ChangeKind::Added, _) => (
            Severity::Low,
            false,
            format!("{} added (non-breaking)", entry.field),
        ),
        (ChangeKind::RequiredRemoved, _) => (
            Severity::Low,
            false,
            format!("field {} no longer required", entry.field),
        ),
        (ChangeKind::DefaultChanged, _) => (
            Severity::Low,
            false,
            format!("default of {} changed", entry.field),
        ),
        (ChangeKind::Other, _) => (
            Severity::Low,
            false,
            format!("unclassified change to {}", entry.field),
        ),
    };

    debug_assert!(!is_breaking || severity >= Severity::Medium);

    ClassifiedChange {
        entry,
        severity,
        is_breaking,
        rationale,
    }
}

/// A type change is tightening when the new type accepts strictly fewer
/// values than the old one. `integer -> number` is the one widening pair;
/// everything else that changed is treated as tightening.
fn is_tightening(entry: &ChangeEntry) -> bool {
    let as_type = |v: &Option<Value>| {
        v.as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match (as_type(&entry.before), as_type(&entry.after)) {
        (Some(before), Some(after)) => !(before == "integer" && after == "number"),
        _ => true,
    }
}

/// Classify every entry and roll the set up: breaking is any, severity is max.
pub fn classify_all(
    producer_service: impl Into<String>,
    from_version: impl Into<String>,
    to_version: impl Into<String>,
    entries: Vec<ChangeEntry>,
) -> ChangeSet {
    let changes: Vec<ClassifiedChange> = entries.into_iter().map(classify).collect();
    let is_breaking = changes.iter().any(|c| c.is_breaking);
    let severity = changes
        .iter()
        .map(|c| c.severity)
        .max()
        .unwrap_or(Severity::Low);

    ChangeSet {
        producer_service: producer_service.into(),
        from_version: from_version.into(),
        to_version: to_version.into(),
        changes,
        severity,
        is_breaking,
    }
}
