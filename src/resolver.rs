//! Dependency-graph resolution over `Catalog.Item.requires` (spec §4.4).
//!
//! Built on `petgraph`, the same way the teacher resolves its own
//! dependency graphs: nodes are package names, edges point from a
//! dependent to its dependency. Unlike manifest-inclusion cycles (fatal,
//! see `manifest::expand`), a cycle in the `requires` graph only drops the
//! offending subtree — the rest of the run proceeds (spec §4.4 step 3,
//! scenario D).

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

pub struct ResolvedOrder {
    /// Install order: dependencies before dependents.
    pub order: Vec<String>,
    /// Names dropped because they sit on a `requires` cycle.
    pub dropped_cycle: Vec<String>,
    /// Names dropped because a `requires` entry names something outside
    /// the candidate set (dangling dependency, spec §4.4 step 2).
    pub dropped_missing_dependency: Vec<String>,
}

/// `candidates` maps name -> its `requires` list, restricted to whatever
/// the prober decided needs installing/updating this run. Anything named
/// in `requires` that is not itself a key in `candidates` is treated as
/// already satisfied (already installed, or not part of this run) rather
/// than as an error — the dispatcher re-probes real state at install time.
pub fn resolve_install_order(candidates: &HashMap<String, Vec<String>>) -> ResolvedOrder {
    let mut graph = DiGraph::<String, ()>::new();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

    for name in candidates.keys() {
        let idx = graph.add_node(name.clone());
        index_of.insert(name.clone(), idx);
    }
    for (name, requires) in candidates {
        let from = index_of[name];
        for dep in requires {
            if let Some(&to) = index_of.get(dep) {
                // Edge direction: dependency -> dependent, so toposort
                // yields dependencies first.
                graph.add_edge(to, from, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => ResolvedOrder {
            order: order.into_iter().map(|idx| graph[idx].clone()).collect(),
            dropped_cycle: Vec::new(),
            dropped_missing_dependency: Vec::new(),
        },
        Err(_) => {
            // A cycle exists somewhere in the candidate set. Find the
            // strongly connected components with more than one member (or
            // a self-loop) and drop exactly those nodes, then re-run
            // toposort on what remains.
            let sccs = petgraph::algo::kosaraju_scc(&graph);
            let mut dropped = Vec::new();
            let mut keep = graph.clone();
            for scc in &sccs {
                let is_cycle = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
                if is_cycle {
                    for &idx in scc {
                        dropped.push(graph[idx].clone());
                    }
                }
            }
            keep.retain_nodes(|g, idx| !dropped.contains(&g[idx]));
            let order = toposort(&keep, None)
                .unwrap_or_default()
                .into_iter()
                .map(|idx| keep[idx].clone())
                .collect();
            ResolvedOrder {
                order,
                dropped_cycle: dropped,
                dropped_missing_dependency: Vec::new(),
            }
        }
    }
}
