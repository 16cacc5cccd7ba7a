// propagate-rs/src/differ.rs
// Structural differ over two OpenAPI documents.
//
// Comparison is order-independent: parameters are keyed by (name, in),
// schema properties by name, and required lists are treated as sets.
// Documentation-only changes (description, example, summary) never produce
// an entry. A removal and an addition inside the same object are paired as
// a rename when their schemas share a structural hash and the match is
// unique; ambiguous matches fall back to two entries with kind `other`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::contract::{ContractDocument, HTTP_METHODS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
}

impl HttpMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "patch" => Some(HttpMethod::Patch),
            "delete" => Some(HttpMethod::Delete),
            "options" => Some(HttpMethod::Options),
            "head" => Some(HttpMethod::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Added,
    Removed,
    Renamed,
    TypeChanged,
    RequiredAdded,
    RequiredRemoved,
    Deprecated,
    EnumNarrowed,
    DefaultChanged,
    Other,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Renamed => "renamed",
            ChangeKind::TypeChanged => "type-changed",
            ChangeKind::RequiredAdded => "required-added",
            ChangeKind::RequiredRemoved => "required-removed",
            ChangeKind::Deprecated => "deprecated",
            ChangeKind::EnumNarrowed => "enum-narrowed",
            ChangeKind::DefaultChanged => "default-changed",
            ChangeKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeLocation {
    Request,
    Response,
    Header,
    Param,
}

/// One observable semantic delta between two contract versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub path: String,
    pub method: HttpMethod,
    pub kind: ChangeKind,
    pub location: ChangeLocation,
    /// Dotted field descriptor, e.g. `request.body.priority`.
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl ChangeEntry {
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Compare two OpenAPI documents and return the set of semantic deltas.
pub fn diff_contracts(prev: &ContractDocument, next: &ContractDocument) -> Vec<ChangeEntry> {
    let mut out = Vec::new();

    let old_paths = prev.paths();
    let new_paths = next.paths();

    let all_paths: BTreeSet<&str> = old_paths.keys().chain(new_paths.keys()).copied().collect();

    for path in all_paths {
        let old_item = old_paths.get(path).copied();
        let new_item = new_paths.get(path).copied();

        for method_name in HTTP_METHODS {
            let method = match HttpMethod::from_str(method_name) {
                Some(m) => m,
                None => continue,
            };
            let old_op = old_item.and_then(|item| item.get(*method_name));
            let new_op = new_item.and_then(|item| item.get(*method_name));

            match (old_op, new_op) {
                (None, None) => {}
                (None, Some(_)) => out.push(ChangeEntry {
                    path: path.to_string(),
                    method,
                    kind: ChangeKind::Added,
                    location: ChangeLocation::Request,
                    field: "operation".to_string(),
                    before: None,
                    after: Some(Value::String("added".to_string())),
                }),
                (Some(_), None) => out.push(ChangeEntry {
                    path: path.to_string(),
                    method,
                    kind: ChangeKind::Removed,
                    location: ChangeLocation::Request,
                    field: "operation".to_string(),
                    before: Some(Value::String("exists".to_string())),
                    after: None,
                }),
                (Some(old_op), Some(new_op)) => {
                    diff_operation(prev, next, path, method, old_op, new_op, &mut out);
                }
            }
        }
    }

    out
}

fn diff_operation(
    prev: &ContractDocument,
    next: &ContractDocument,
    path: &str,
    method: HttpMethod,
    old_op: &Value,
    new_op: &Value,
    out: &mut Vec<ChangeEntry>,
) {
    let was_deprecated = old_op.get("deprecated").and_then(Value::as_bool).unwrap_or(false);
    let is_deprecated = new_op.get("deprecated").and_then(Value::as_bool).unwrap_or(false);
    if is_deprecated && !was_deprecated {
        out.push(ChangeEntry {
            path: path.to_string(),
            method,
            kind: ChangeKind::Deprecated,
            location: ChangeLocation::Request,
            field: "operation".to_string(),
            before: None,
            after: Some(Value::Bool(true)),
        });
    }

    diff_parameters(prev, next, path, method, old_op, new_op, out);
    diff_request_body(prev, next, path, method, old_op, new_op, out);
    diff_responses(prev, next, path, method, old_op, new_op, out);
}

/// Parameters keyed by `(name, in)`; comparison is order-independent.
fn diff_parameters(
    prev: &ContractDocument,
    next: &ContractDocument,
    path: &str,
    method: HttpMethod,
    old_op: &Value,
    new_op: &Value,
    out: &mut Vec<ChangeEntry>,
) {
    let collect = |doc: &ContractDocument, op: &Value| -> BTreeMap<(String, String), Value> {
        op.get("parameters")
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .map(|p| doc.resolve_deep(p))
                    .filter_map(|p| {
                        let name = p.get("name")?.as_str()?.to_string();
                        let location = p.get("in")?.as_str()?.to_string();
                        Some(((name, location), p.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let old_params = collect(prev, old_op);
    let new_params = collect(next, new_op);

    let location_of = |in_: &str| {
        if in_ == "header" {
            ChangeLocation::Header
        } else {
            ChangeLocation::Param
        }
    };
    let is_required =
        |p: &Value| p.get("required").and_then(Value::as_bool).unwrap_or(false);

    for ((name, in_), old) in &old_params {
        if !new_params.contains_key(&(name.clone(), in_.clone())) {
            out.push(ChangeEntry {
                path: path.to_string(),
                method,
                kind: ChangeKind::Removed,
                location: location_of(in_),
                field: format!("param.{name}"),
                before: Some(old.clone()),
                after: None,
            });
        }
    }

    for ((name, in_), new) in &new_params {
        match old_params.get(&(name.clone(), in_.clone())) {
            None => out.push(ChangeEntry {
                path: path.to_string(),
                method,
                kind: if is_required(new) {
                    ChangeKind::RequiredAdded
                } else {
                    ChangeKind::Added
                },
                location: location_of(in_),
                field: format!("param.{name}"),
                before: None,
                after: Some(new.clone()),
            }),
            Some(old) => {
                let field = format!("param.{name}");
                let location = location_of(in_);
                match (is_required(old), is_required(new)) {
                    (false, true) => out.push(ChangeEntry {
                        path: path.to_string(),
                        method,
                        kind: ChangeKind::RequiredAdded,
                        location,
                        field: field.clone(),
                        before: Some(old.clone()),
                        after: Some(new.clone()),
                    }),
                    (true, false) => out.push(ChangeEntry {
                        path: path.to_string(),
                        method,
                        kind: ChangeKind::RequiredRemoved,
                        location,
                        field: field.clone(),
                        before: Some(old.clone()),
                        after: Some(new.clone()),
                    }),
                    _ => {}
                }
                let old_schema = old.get("schema").cloned().unwrap_or(Value::Null);
                let new_schema = new.get("schema").cloned().unwrap_or(Value::Null);
                diff_scalar_schema(
                    path, method, location, &field, &old_schema, &new_schema, out,
                );
            }
        }
    }
}

fn diff_request_body(
    prev: &ContractDocument,
    next: &ContractDocument,
    path: &str,
    method: HttpMethod,
    old_op: &Value,
    new_op: &Value,
    out: &mut Vec<ChangeEntry>,
) {
    let old_schema = json_body_schema(old_op.get("requestBody"));
    let new_schema = json_body_schema(new_op.get("requestBody"));
    if old_schema.is_none() && new_schema.is_none() {
        return;
    }

    let null = Value::Null;
    let old_schema = old_schema.unwrap_or(&null);
    let new_schema = new_schema.unwrap_or(&null);

    diff_properties(
        &prev.schema_properties(old_schema),
        &next.schema_properties(new_schema),
        &prev.required_fields(old_schema),
        &next.required_fields(new_schema),
        path,
        method,
        ChangeLocation::Request,
        "request.body",
        out,
    );
}

fn diff_responses(
    prev: &ContractDocument,
    next: &ContractDocument,
    path: &str,
    method: HttpMethod,
    old_op: &Value,
    new_op: &Value,
    out: &mut Vec<ChangeEntry>,
) {
    let codes = |op: &Value| -> BTreeSet<String> {
        op.get("responses")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    };

    let old_codes = codes(old_op);
    let new_codes = codes(new_op);

    for code in old_codes.union(&new_codes) {
        let old_resp = old_op.get("responses").and_then(|r| r.get(code));
        let new_resp = new_op.get("responses").and_then(|r| r.get(code));

        match (old_resp, new_resp) {
            (Some(_), None) => {
                // A previously-documented response disappeared.
                out.push(ChangeEntry {
                    path: path.to_string(),
                    method,
                    kind: ChangeKind::Removed,
                    location: ChangeLocation::Response,
                    field: format!("response.{code}"),
                    before: Some(Value::String("documented".to_string())),
                    after: None,
                });
            }
            (old_resp, new_resp) => {
                let null = Value::Null;
                let old_schema = json_body_schema(old_resp).unwrap_or(&null);
                let new_schema = json_body_schema(new_resp).unwrap_or(&null);
                diff_properties(
                    &prev.schema_properties(old_schema),
                    &next.schema_properties(new_schema),
                    &prev.required_fields(old_schema),
                    &next.required_fields(new_schema),
                    path,
                    method,
                    ChangeLocation::Response,
                    &format!("response.{code}"),
                    out,
                );
            }
        }
    }
}

/// The `application/json` schema under a requestBody or response node.
fn json_body_schema(node: Option<&Value>) -> Option<&Value> {
    node?.get("content")?.get("application/json")?.get("schema")
}

/// Property-level comparison shared by request bodies and responses.
#[allow(clippy::too_many_arguments)]
fn diff_properties(
    old_props: &BTreeMap<String, Value>,
    new_props: &BTreeMap<String, Value>,
    old_required: &BTreeSet<String>,
    new_required: &BTreeSet<String>,
    path: &str,
    method: HttpMethod,
    location: ChangeLocation,
    prefix: &str,
    out: &mut Vec<ChangeEntry>,
) {
    let removed: Vec<&String> = old_props.keys().filter(|k| !new_props.contains_key(*k)).collect();
    let added: Vec<&String> = new_props.keys().filter(|k| !old_props.contains_key(*k)).collect();

    let (renames, ambiguous) = pair_renames(&removed, &added, old_props, new_props);

    for (old_name, new_name) in &renames {
        out.push(ChangeEntry {
            path: path.to_string(),
            method,
            kind: ChangeKind::Renamed,
            location,
            field: format!("{prefix}.{old_name}"),
            before: Some(Value::String((*old_name).clone())),
            after: Some(Value::String((*new_name).clone())),
        });
    }

    let renamed_old: BTreeSet<&String> = renames.iter().map(|(o, _)| *o).collect();
    let renamed_new: BTreeSet<&String> = renames.iter().map(|(_, n)| *n).collect();

    for name in removed {
        if renamed_old.contains(name) {
            continue;
        }
        let kind = if ambiguous.contains(name) {
            ChangeKind::Other
        } else {
            ChangeKind::Removed
        };
        out.push(ChangeEntry {
            path: path.to_string(),
            method,
            kind,
            location,
            field: format!("{prefix}.{name}"),
            before: Some(old_props[name].clone()),
            after: None,
        });
    }

    for name in added {
        if renamed_new.contains(name) {
            continue;
        }
        let kind = if ambiguous.contains(name) {
            ChangeKind::Other
        } else if new_required.contains(name) {
            ChangeKind::RequiredAdded
        } else {
            ChangeKind::Added
        };
        out.push(ChangeEntry {
            path: path.to_string(),
            method,
            kind,
            location,
            field: format!("{prefix}.{name}"),
            before: None,
            after: Some(new_props[name].clone()),
        });
    }

    for (name, old) in old_props {
        let new = match new_props.get(name) {
            Some(v) => v,
            None => continue,
        };
        let field = format!("{prefix}.{name}");

        diff_scalar_schema(path, method, location, &field, old, new, out);

        match (old_required.contains(name), new_required.contains(name)) {
            (false, true) => out.push(ChangeEntry {
                path: path.to_string(),
                method,
                kind: ChangeKind::RequiredAdded,
                location,
                field: field.clone(),
                before: Some(old.clone()),
                after: Some(new.clone()),
            }),
            (true, false) => out.push(ChangeEntry {
                path: path.to_string(),
                method,
                kind: ChangeKind::RequiredRemoved,
                location,
                field: field.clone(),
                before: Some(old.clone()),
                after: Some(new.clone()),
            }),
            _ => {}
        }
    }
}

/// Type, enum, and default comparison for one field schema.
fn diff_scalar_schema(
    path: &str,
    method: HttpMethod,
    location: ChangeLocation,
    field: &str,
    old: &Value,
    new: &Value,
    out: &mut Vec<ChangeEntry>,
) {
    let old_type = old.get("type").and_then(Value::as_str);
    let new_type = new.get("type").and_then(Value::as_str);
    if let (Some(old_type), Some(new_type)) = (old_type, new_type) {
        if old_type != new_type {
            out.push(ChangeEntry {
                path: path.to_string(),
                method,
                kind: ChangeKind::TypeChanged,
                location,
                field: field.to_string(),
                before: Some(Value::String(old_type.to_string())),
                after: Some(Value::String(new_type.to_string())),
            });
        }
    }

    let enum_set = |v: &Value| -> Option<BTreeSet<String>> {
        v.get("enum").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .map(|i| i.to_string())
                .collect()
        })
    };
    if let (Some(old_enum), Some(new_enum)) = (enum_set(old), enum_set(new)) {
        if new_enum.len() < old_enum.len() && new_enum.is_subset(&old_enum) {
            out.push(ChangeEntry {
                path: path.to_string(),
                method,
                kind: ChangeKind::EnumNarrowed,
                location,
                field: field.to_string(),
                before: old.get("enum").cloned(),
                after: new.get("enum").cloned(),
            });
        }
    }

    let old_default = old.get("default");
    let new_default = new.get("default");
    if old_default != new_default && (old_default.is_some() || new_default.is_some()) {
        out.push(ChangeEntry {
            path: path.to_string(),
            method,
            kind: ChangeKind::DefaultChanged,
            location,
            field: field.to_string(),
            before: old_default.cloned(),
            after: new_default.cloned(),
        });
    }
}

/// Pair removed and added properties by structural hash. Only one-to-one
/// matches become renames; names whose hash appears more than once on either
/// side are reported as ambiguous.
fn pair_renames<'a>(
    removed: &[&'a String],
    added: &[&'a String],
    old_props: &BTreeMap<String, Value>,
    new_props: &BTreeMap<String, Value>,
) -> (Vec<(&'a String, &'a String)>, BTreeSet<&'a String>) {
    let mut removed_by_hash: BTreeMap<String, Vec<&'a String>> = BTreeMap::new();
    for name in removed.iter().copied() {
        removed_by_hash
            .entry(structural_hash(&old_props[name]))
            .or_default()
            .push(name);
    }
    let mut added_by_hash: BTreeMap<String, Vec<&'a String>> = BTreeMap::new();
    for name in added.iter().copied() {
        added_by_hash
            .entry(structural_hash(&new_props[name]))
            .or_default()
            .push(name);
    }

    let mut renames = Vec::new();
    let mut ambiguous = BTreeSet::new();

    for (hash, old_names) in &removed_by_hash {
        if let Some(new_names) = added_by_hash.get(hash) {
            if old_names.len() == 1 && new_names.len() == 1 {
                renames.push((old_names[0], new_names[0]));
            } else {
                ambiguous.extend(old_names.iter().copied());
                ambiguous.extend(new_names.iter().copied());
            }
        }
    }

    (renames, ambiguous)
}

/// Hash of a schema's shape: type, format, enum set, items, nested property
/// names and shapes, and the required set. Descriptions and examples are
/// excluded so documentation edits never influence rename pairing.
pub fn structural_hash(schema: &Value) -> String {
    let mut hasher = Sha256::new();
    hash_into(schema, &mut hasher);
    hex::encode(hasher.finalize())
}

fn hash_into(schema: &Value, hasher: &mut Sha256) {
    match schema {
        Value::Object(map) => {
            for key in ["type", "format"] {
                if let Some(v) = map.get(key).and_then(Value::as_str) {
                    hasher.update(key);
                    hasher.update(v);
                }
            }
            if let Some(values) = map.get("enum").and_then(Value::as_array) {
                let mut sorted: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                sorted.sort();
                hasher.update("enum");
                for v in sorted {
                    hasher.update(v);
                }
            }
            if let Some(items) = map.get("items") {
                hasher.update("items");
                hash_into(items, hasher);
            }
            if let Some(props) = map.get("properties").and_then(Value::as_object) {
                hasher.update("properties");
                for (name, sub) in props {
                    hasher.update(name);
                    hash_into(sub, hasher);
                }
            }
            if let Some(required) = map.get("required").and_then(Value::as_array) {
                let mut sorted: Vec<&str> =
                    required.iter().filter_map(Value::as_str).collect();
                sorted.sort_unstable();
                hasher.update("required");
                for v in sorted {
                    hasher.update(v);
                }
            }
        }
        other => hasher.update(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractDocument;

    fn doc(paths_yaml: &str) -> ContractDocument {
        ContractDocument::parse(&format!("openapi: 3.1.0\ninfo: {{}}\npaths:\n{paths_yaml}"))
            .unwrap()
    }

    const SESSIONS_BASE: &str = r#"
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

    #[test]
    fn added_required_field_without_default() {
        let prev = doc(SESSIONS_BASE);
        let next = doc(r#"
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
"#);
        let diffs = diff_contracts(&prev, &next);
        assert_eq!(diffs.len(), 1);
        let d = &diffs[0];
        assert_eq!(d.kind, ChangeKind::RequiredAdded);
        assert_eq!(d.location, ChangeLocation::Request);
        assert_eq!(d.field, "request.body.max_cost_usd");
        assert_eq!(d.route(), "POST /api/v1/sessions");
    }

    #[test]
    fn field_rename_detected_by_structural_hash() {
        let prev = doc(r#"
  /api/v1/usage:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  cached_tokens:
                    type: integer
                  total_tokens:
                    type: string
"#);
        let next = doc(r#"
  /api/v1/usage:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  cache_read_tokens:
                    type: integer
                  total_tokens:
                    type: string
"#);
        let diffs = diff_contracts(&prev, &next);
        assert_eq!(diffs.len(), 1);
        let d = &diffs[0];
        assert_eq!(d.kind, ChangeKind::Renamed);
        assert_eq!(d.location, ChangeLocation::Response);
        assert_eq!(d.before, Some(serde_json::json!("cached_tokens")));
        assert_eq!(d.after, Some(serde_json::json!("cache_read_tokens")));
    }

    #[test]
    fn ambiguous_rename_emits_other_entries() {
        let prev = doc(r#"
  /api/v1/usage:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  a:
                    type: integer
                  b:
                    type: integer
"#);
        let next = doc(r#"
  /api/v1/usage:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  c:
                    type: integer
                  d:
                    type: integer
"#);
        let diffs = diff_contracts(&prev, &next);
        assert_eq!(diffs.len(), 4);
        assert!(diffs.iter().all(|d| d.kind == ChangeKind::Other));
    }

    #[test]
    fn documentation_changes_are_ignored() {
        let prev = doc(SESSIONS_BASE);
        let next = doc(r#"
  /api/v1/sessions:
    post:
      summary: Create a session
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [prompt]
              properties:
                prompt:
                  type: string
                  description: the task prompt
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  session_id:
                    type: string
                    example: sess-123
"#);
        assert!(diff_contracts(&prev, &next).is_empty());
    }

    #[test]
    fn removed_operation_and_enum_narrowing() {
        let prev = doc(r#"
  /api/v1/sessions:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  state:
                    type: string
                    enum: [queued, running, done, failed]
    delete:
      responses:
        "204": {}
"#);
        let next = doc(r#"
  /api/v1/sessions:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: object
                properties:
                  state:
                    type: string
                    enum: [queued, running, done]
"#);
        let diffs = diff_contracts(&prev, &next);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().any(|d| d.kind == ChangeKind::Removed
            && d.method == HttpMethod::Delete
            && d.field == "operation"));
        assert!(diffs
            .iter()
            .any(|d| d.kind == ChangeKind::EnumNarrowed && d.field == "response.200.state"));
    }

    #[test]
    fn type_change_and_required_removed() {
        let prev = doc(r#"
  /api/v1/teams:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [name, quota]
              properties:
                name:
                  type: string
                quota:
                  type: number
"#);
        let next = doc(r#"
  /api/v1/teams:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties:
                name:
                  type: string
                quota:
                  type: integer
"#);
        let diffs = diff_contracts(&prev, &next);
        assert!(diffs
            .iter()
            .any(|d| d.kind == ChangeKind::TypeChanged && d.field == "request.body.quota"));
        assert!(diffs
            .iter()
            .any(|d| d.kind == ChangeKind::RequiredRemoved && d.field == "request.body.quota"));
    }

    #[test]
    fn diff_is_order_independent_for_required_lists() {
        let a = doc(r#"
  /api/v1/x:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [a, b]
              properties:
                a: { type: string }
                b: { type: string }
"#);
        let b = doc(r#"
  /api/v1/x:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [b, a]
              properties:
                b: { type: string }
                a: { type: string }
"#);
        assert!(diff_contracts(&a, &b).is_empty());
    }
}
