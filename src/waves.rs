// propagate-rs/src/waves.rs
// Wave planning: partition impacted consumers so that a consumer is never
// dispatched before an impacted upstream it declares a dependency on.
//
// The induced subgraph over impacted consumers is condensed (cycles collapse
// into a single component) and each component takes its longest-path level
// from the roots. The planner must not assume a DAG: mutually-dependent
// consumers are legal and share a wave.

use std::collections::HashMap;

use petgraph::algo::{condensation, toposort};
use petgraph::graph::DiGraph;
use petgraph::Direction;

use crate::bundle::Bundle;
use crate::service_map::ServiceMap;

#[derive(Debug, Clone, Default)]
pub struct WavePlan {
    /// Consumer names per wave, wave 0 first; names within a wave sorted.
    pub waves: Vec<Vec<String>>,
}

impl WavePlan {
    pub fn wave_of(&self, consumer: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|c| c == consumer))
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

/// Partition the impacted consumers into dependency-ordered waves.
pub fn plan_waves(impacted: &[String], map: &ServiceMap) -> WavePlan {
    if impacted.is_empty() {
        return WavePlan::default();
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index = HashMap::new();
    for consumer in impacted {
        let idx = graph.add_node(consumer.clone());
        index.insert(consumer.as_str(), idx);
    }

    // Edge upstream -> downstream: downstream declares a dependency on
    // upstream and both are impacted in this run.
    for downstream in impacted {
        for upstream in impacted {
            if downstream != upstream && map.declares(downstream, upstream) {
                graph.add_edge(index[upstream.as_str()], index[downstream.as_str()], ());
            }
        }
    }

    let condensed = condensation(graph, true);

    for component in condensed.node_weights() {
        if component.len() > 1 {
            tracing::warn!(
                members = ?component,
                "dependency cycle among impacted consumers; dispatching them in one wave"
            );
        }
    }

    // The condensation is acyclic by construction.
    let order = toposort(&condensed, None).expect("condensed graph is acyclic");

    let mut level: HashMap<_, usize> = HashMap::new();
    let mut max_level = 0;
    for node in order {
        let depth = condensed
            .neighbors_directed(node, Direction::Incoming)
            .map(|pred| level[&pred] + 1)
            .max()
            .unwrap_or(0);
        max_level = max_level.max(depth);
        level.insert(node, depth);
    }

    let mut waves = vec![Vec::new(); max_level + 1];
    for (node, depth) in &level {
        waves[*depth].extend(condensed[*node].iter().cloned());
    }
    for wave in &mut waves {
        wave.sort();
    }

    WavePlan { waves }
}

/// Stamp each bundle with its consumer's wave index. Consumers the planner
/// never saw default to wave 0.
pub fn assign_wave_indices(bundles: &mut [Bundle], plan: &WavePlan) {
    for bundle in bundles {
        bundle.wave_index = plan.wave_of(&bundle.consumer).unwrap_or(0);
    }
}
