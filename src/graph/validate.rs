// src/graph/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{CmdqError, Result};
use crate::graph::model::GraphModel;

/// Run semantic validation over a job graph before any emission.
///
/// This checks:
/// - all dependency references resolve to submitted jobs
/// - no job depends on itself
/// - the graph has no cycles
///
/// [`GraphModel::order_jobs`] would also catch cycles, but running this
/// first produces the error before any path derivation or file writes
/// happen, and names an offending job.
pub fn validate_graph(model: &GraphModel) -> Result<()> {
    let edges = model.resolved_edges()?;

    for (id, deps) in edges.iter().enumerate() {
        if deps.contains(&id) {
            return Err(CmdqError::CycleDetected(model.job(id).name.clone()));
        }
    }

    // Edge direction: dep -> job, matching "dep must run first".
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for id in 0..model.len() {
        graph.add_node(id);
    }
    for (id, deps) in edges.iter().enumerate() {
        for &dep in deps {
            graph.add_edge(dep, id, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(CmdqError::CycleDetected(model.job(node).name.clone()))
        }
    }
}
