// propagate-rs/src/impact.rs
// Impact mapping: fuse the classified change set with declared dependencies
// and usage telemetry into a prioritized blast radius.
//
// Candidate consumers come from declared edges or from observed calls within
// the telemetry window. A candidate survives only if its observed routes
// intersect the touched routes; declared-only candidates take every route
// touched by a breaking change. Confidence: high when declared and observed,
// medium when observed only, low when declared only.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::classifier::{ChangeSet, ClassifiedChange};
use crate::differ::HttpMethod;
use crate::service_map::ServiceMap;
use crate::telemetry::{Confidence, TelemetrySample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteUsage {
    pub method: HttpMethod,
    pub route: String,
    pub calls_7d: u64,
    pub confidence: Confidence,
}

/// One consumer's slice of the blast radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Impact {
    pub consumer: String,
    pub routes: Vec<RouteUsage>,
    /// The classified changes touching this consumer's routes.
    pub changes: Vec<ClassifiedChange>,
    pub total_calls_7d: u64,
    pub confidence: Confidence,
}

impl Impact {
    pub fn is_breaking(&self) -> bool {
        self.changes.iter().any(|c| c.is_breaking)
    }
}

/// Join the change set, service map, and telemetry window into an ordered
/// impact list. `samples` must already be filtered to the producer and the
/// telemetry window.
pub fn map_impacts(
    change_set: &ChangeSet,
    map: &ServiceMap,
    samples: &[&TelemetrySample],
) -> Vec<Impact> {
    let touched: BTreeSet<(HttpMethod, &str)> = change_set
        .changes
        .iter()
        .map(|c| (c.entry.method, c.entry.path.as_str()))
        .collect();
    let breaking_touched: BTreeSet<(HttpMethod, &str)> = change_set
        .breaking_changes()
        .map(|c| (c.entry.method, c.entry.path.as_str()))
        .collect();

    let producer = change_set.producer_service.as_str();

    let mut candidates: BTreeSet<String> = map
        .declared_consumers_of(producer)
        .into_iter()
        .collect();
    candidates.extend(samples.iter().map(|s| s.consumer.clone()));

    let mut impacts = Vec::new();

    for consumer in candidates {
        let declared = map.declares(&consumer, producer);

        let mut routes: Vec<RouteUsage> = samples
            .iter()
            .filter(|s| s.consumer == consumer)
            .filter(|s| touched.contains(&(s.method, s.route_template.as_str())))
            .map(|s| RouteUsage {
                method: s.method,
                route: s.route_template.clone(),
                calls_7d: s.calls_7d,
                confidence: s.confidence,
            })
            .collect();

        let observed = !routes.is_empty();

        if !observed {
            if !declared {
                continue;
            }
            // Declared but silent in telemetry: assume exposure to every
            // route touched by a breaking change.
            routes = breaking_touched
                .iter()
                .map(|(method, route)| RouteUsage {
                    method: *method,
                    route: (*route).to_string(),
                    calls_7d: 0,
                    confidence: Confidence::Low,
                })
                .collect();
        }

        if routes.is_empty() {
            continue;
        }

        routes.sort_by(|a, b| {
            b.calls_7d
                .cmp(&a.calls_7d)
                .then_with(|| a.route.cmp(&b.route))
                .then_with(|| a.method.cmp(&b.method))
        });

        let route_keys: BTreeSet<(HttpMethod, &str)> = routes
            .iter()
            .map(|r| (r.method, r.route.as_str()))
            .collect();
        let changes: Vec<ClassifiedChange> = change_set
            .changes
            .iter()
            .filter(|c| route_keys.contains(&(c.entry.method, c.entry.path.as_str())))
            .cloned()
            .collect();

        let total_calls_7d = routes.iter().map(|r| r.calls_7d).sum();
        let confidence = match (declared, observed) {
            (true, true) => Confidence::High,
            (false, true) => Confidence::Medium,
            (true, false) => Confidence::Low,
            (false, false) => unreachable!("candidate is neither declared nor observed"),
        };

        impacts.push(Impact {
            consumer,
            routes,
            changes,
            total_calls_7d,
            confidence,
        });
    }

    impacts.sort_by(|a, b| {
        b.is_breaking()
            .cmp(&a.is_breaking())
            .then_with(|| b.total_calls_7d.cmp(&a.total_calls_7d))
            .then_with(|| a.consumer.cmp(&b.consumer))
    });

    impacts
}
