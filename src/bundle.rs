// propagate-rs/src/bundle.rs
// Per-consumer remediation bundles.
//
// The fingerprint is a content hash over the canonicalized tuple
// (consumer, sorted breaking items, sorted routes, producer version):
// keys sorted, whitespace collapsed, no timestamps. Two runs deriving the
// same bundle content always produce the same fingerprint, which is what
// makes dispatch idempotent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::classifier::{ChangeSet, ClassifiedChange};
use crate::impact::Impact;
use crate::service_map::ServiceMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub consumer: String,
    pub repo_ref: String,
    pub prompt: String,
    /// Canonicalized one-line descriptions of each breaking change.
    pub breaking_items: Vec<String>,
    pub client_paths: Vec<String>,
    pub test_paths: Vec<String>,
    pub fingerprint: String,
    pub wave_index: usize,
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn value_summary(v: &Option<Value>) -> String {
    match v {
        None => "none".to_string(),
        Some(value) => collapse_whitespace(&value.to_string()),
    }
}

/// One canonical line per breaking change, used both in the prompt and in
/// the fingerprint input.
fn breaking_item_line(change: &ClassifiedChange) -> String {
    collapse_whitespace(&format!(
        "{} {} {} {}: {} -> {}",
        change.entry.kind,
        change.entry.method,
        change.entry.path,
        change.entry.field,
        value_summary(&change.entry.before),
        value_summary(&change.entry.after),
    ))
}

/// Stable hash over the canonical bundle content, hex-truncated to 16 chars.
pub fn fingerprint(
    consumer: &str,
    breaking_items: &[String],
    routes: &[String],
    producer_version: &str,
) -> String {
    let mut items = breaking_items.to_vec();
    items.sort();
    let mut routes = routes.to_vec();
    routes.sort();

    let mut hasher = Sha256::new();
    hasher.update(consumer.as_bytes());
    hasher.update(b"\n");
    for item in &items {
        hasher.update(item.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"--\n");
    for route in &routes {
        hasher.update(route.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(producer_version.as_bytes());

    hex::encode(hasher.finalize())[..16].to_string()
}

fn build_prompt(
    change_set: &ChangeSet,
    impact: &Impact,
    breaking: &[&ClassifiedChange],
    client_paths: &[String],
    test_paths: &[String],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "The {} API contract changed (version {} -> {}) and `{}` consumes affected routes. \
         Update the consumer so it compiles and its tests pass against the new contract.\n\n",
        change_set.producer_service, change_set.from_version, change_set.to_version, impact.consumer,
    ));

    prompt.push_str("BREAKING CHANGES:\n");
    for change in breaking {
        prompt.push_str(&format!(
            "- [{}] {} {} {}: before={} after={} ({})\n",
            change.severity,
            change.entry.method,
            change.entry.path,
            change.entry.field,
            value_summary(&change.entry.before),
            value_summary(&change.entry.after),
            change.rationale,
        ));
    }

    prompt.push_str("\nAFFECTED ROUTES (calls in the last 7 days, highest first):\n");
    for route in &impact.routes {
        prompt.push_str(&format!(
            "- {} {} ({} calls/7d, {} confidence)\n",
            route.method, route.route, route.calls_7d, route.confidence,
        ));
    }

    if !client_paths.is_empty() {
        prompt.push_str("\nClient code to update:\n");
        for path in client_paths {
            prompt.push_str(&format!("- {path}\n"));
        }
    }
    if !test_paths.is_empty() {
        prompt.push_str("\nTests to update:\n");
        for path in test_paths {
            prompt.push_str(&format!("- {path}\n"));
        }
    }

    prompt.push_str(
        "\nOpen a pull request with the fix. Do not modify infrastructure, \
         CI workflows, or deployment configuration.\n",
    );
    prompt
}

/// Build one bundle per impacted consumer. Consumers without a service-map
/// entry cannot be dispatched (no repo to target) and are skipped with a
/// warning.
pub fn build_bundles(
    change_set: &ChangeSet,
    impacts: &[Impact],
    map: &ServiceMap,
    producer_version: &str,
) -> Vec<Bundle> {
    let mut bundles = Vec::new();

    for impact in impacts {
        let info = match map.get(&impact.consumer) {
            Some(info) => info,
            None => {
                tracing::warn!(
                    consumer = %impact.consumer,
                    "impacted consumer has no service-map entry; skipping bundle"
                );
                continue;
            }
        };

        let breaking: Vec<&ClassifiedChange> =
            impact.changes.iter().filter(|c| c.is_breaking).collect();
        if breaking.is_empty() {
            continue;
        }

        let mut breaking_items: Vec<String> =
            breaking.iter().map(|c| breaking_item_line(c)).collect();
        breaking_items.sort();

        let routes: Vec<String> = impact
            .routes
            .iter()
            .map(|r| format!("{} {}", r.method, r.route))
            .collect();

        let fingerprint = fingerprint(&impact.consumer, &breaking_items, &routes, producer_version);
        let prompt = build_prompt(change_set, impact, &breaking, &info.client_paths, &info.test_paths);

        bundles.push(Bundle {
            consumer: impact.consumer.clone(),
            repo_ref: info.repo.clone(),
            prompt,
            breaking_items,
            client_paths: info.client_paths.clone(),
            test_paths: info.test_paths.clone(),
            fingerprint,
            wave_index: 0,
        });
    }

    bundles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_all;
    use crate::differ::{ChangeEntry, ChangeKind, ChangeLocation, HttpMethod};
    use crate::impact::map_impacts;
    use crate::telemetry::{Confidence, TelemetrySample};

    const MAP: &str = r#"
services:
  billing-service:
    repo: org/billing-service
    depends_on: [api-core]
    client_paths: [src/api_client.py]
    test_paths: [tests/test_api.py]
"#;

    fn change_set() -> ChangeSet {
        classify_all(
            "api-core",
            "aaaa",
            "bbbb",
            vec![
                ChangeEntry {
                    path: "/api/v1/sessions".to_string(),
                    method: HttpMethod::Post,
                    kind: ChangeKind::RequiredAdded,
                    location: ChangeLocation::Request,
                    field: "request.body.max_cost_usd".to_string(),
                    before: None,
                    after: Some(serde_json::json!({"type": "number"})),
                },
                ChangeEntry {
                    path: "/api/v1/usage".to_string(),
                    method: HttpMethod::Get,
                    kind: ChangeKind::Renamed,
                    location: ChangeLocation::Response,
                    field: "response.200.cached_tokens".to_string(),
                    before: Some(serde_json::json!("cached_tokens")),
                    after: Some(serde_json::json!("cache_read_tokens")),
                },
            ],
        )
    }

    fn sample(method: HttpMethod, route: &str, calls: u64) -> TelemetrySample {
        TelemetrySample {
            consumer: "billing-service".to_string(),
            producer: "api-core".to_string(),
            method,
            route_template: route.to_string(),
            calls_7d: calls,
            confidence: Confidence::High,
            recorded_at: None,
        }
    }

    fn bundles_for(samples: &[TelemetrySample]) -> Vec<Bundle> {
        let map = ServiceMap::parse(MAP).unwrap();
        let refs: Vec<&TelemetrySample> = samples.iter().collect();
        let set = change_set();
        let impacts = map_impacts(&set, &map, &refs);
        build_bundles(&set, &impacts, &map, "bbbb")
    }

    #[test]
    fn builds_bundle_with_repo_and_paths() {
        let bundles = bundles_for(&[sample(HttpMethod::Post, "/api/v1/sessions", 42)]);
        assert_eq!(bundles.len(), 1);
        let b = &bundles[0];
        assert_eq!(b.repo_ref, "org/billing-service");
        assert_eq!(b.client_paths, vec!["src/api_client.py".to_string()]);
        assert_eq!(b.test_paths, vec!["tests/test_api.py".to_string()]);
        assert_eq!(b.fingerprint.len(), 16);
    }

    #[test]
    fn prompt_contains_key_information() {
        let bundles = bundles_for(&[sample(HttpMethod::Post, "/api/v1/sessions", 42)]);
        let prompt = &bundles[0].prompt;
        assert!(prompt.contains("billing-service"));
        assert!(prompt.contains("max_cost_usd"));
        assert!(prompt.contains("BREAKING"));
        assert!(prompt.contains("42 calls/7d"));
        assert!(prompt.contains("src/api_client.py"));
    }

    #[test]
    fn fingerprint_is_stable_under_permutation() {
        let items = vec!["b item".to_string(), "a item".to_string()];
        let items_rev = vec!["a item".to_string(), "b item".to_string()];
        let routes = vec!["POST /a".to_string(), "GET /b".to_string()];
        let routes_rev = vec!["GET /b".to_string(), "POST /a".to_string()];

        assert_eq!(
            fingerprint("billing-service", &items, &routes, "v2"),
            fingerprint("billing-service", &items_rev, &routes_rev, "v2"),
        );
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let items = vec!["removed POST /a field: x -> none".to_string()];
        let routes = vec!["POST /a".to_string()];
        let base = fingerprint("billing-service", &items, &routes, "v2");

        assert_ne!(base, fingerprint("other-service", &items, &routes, "v2"));
        assert_ne!(base, fingerprint("billing-service", &items, &routes, "v3"));
        assert_ne!(
            base,
            fingerprint(
                "billing-service",
                &["removed POST /a field: y -> none".to_string()],
                &routes,
                "v2",
            )
        );
    }

    #[test]
    fn fingerprint_collapses_whitespace() {
        let set = change_set();
        let line = breaking_item_line(&set.changes[0]);
        assert!(!line.contains('\n'));
        assert!(!line.contains("  "));
    }

    #[test]
    fn same_inputs_produce_same_bundle_hash() {
        let a = bundles_for(&[sample(HttpMethod::Post, "/api/v1/sessions", 42)]);
        let b = bundles_for(&[sample(HttpMethod::Post, "/api/v1/sessions", 42)]);
        assert_eq!(a[0].fingerprint, b[0].fingerprint);
    }

    #[test]
    fn unknown_consumer_is_skipped() {
        let map = ServiceMap::parse(MAP).unwrap();
        let set = change_set();
        let s = TelemetrySample {
            consumer: "unknown-service".to_string(),
            ..sample(HttpMethod::Post, "/api/v1/sessions", 9)
        };
        let impacts = map_impacts(&set, &map, &[&s]);
        // unknown-service is impacted (observed) but has no repo to target.
        let bundles = build_bundles(&set, &impacts, &map, "bbbb");
        assert!(bundles.iter().all(|b| b.consumer != "unknown-service"));
    }
}
