//! Executor: drives a graph to completion in topological order.
//!
//! resolve → execute → store outputs, one node at a time. The first failure
//! stops the run; remaining nodes are never attempted. Completed nodes are
//! left in place unless the rollback policy asks for teardown.

use super::config::GlobalConfig;
use super::error::NodeError;
use super::graph::Graph;
use super::resolver;
use super::types::{NodeFailure, RollbackPolicy, RunReport};
use crate::backend::ProvisioningBackend;
use std::time::Instant;
use tracing::{error, info, warn};

/// Options for a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub rollback: RollbackPolicy,
}

/// Execute every node once, in order, against the backend.
pub fn run(
    graph: &Graph,
    config: &GlobalConfig,
    backend: &mut dyn ProvisioningBackend,
    options: &RunOptions,
) -> RunReport {
    let start = Instant::now();
    let mut report = RunReport {
        order: graph.order().to_vec(),
        ..RunReport::default()
    };
    info!(
        profile = config.profile(),
        credentials = config.credential_profile(),
        nodes = graph.len(),
        rollback = %options.rollback,
        "starting run"
    );

    for (index, node) in graph.iter().enumerate() {
        let name = node.name();
        let node_start = Instant::now();
        info!(node = name, "executing");

        let result = resolver::resolve_inputs(node.spec(), config, &report.outputs, &*backend)
            .map_err(NodeError::from)
            .and_then(|inputs| {
                let outputs = node.execute(&inputs, backend)?;
                Ok((inputs, outputs))
            });

        match result {
            Ok((inputs, outputs)) => {
                info!(
                    node = name,
                    duration_ms = node_start.elapsed().as_millis() as u64,
                    outputs = ?outputs.keys().collect::<Vec<_>>(),
                    "executed"
                );
                report.inputs.insert(name.to_string(), inputs);
                report.outputs.insert(name.to_string(), outputs);
                report.completed.push(name.to_string());
            }
            Err(err) => {
                error!(node = name, error = %err, "node failed");
                report.failure = Some(NodeFailure {
                    node: name.to_string(),
                    error: err,
                });
                report.skipped = report.order[index + 1..].to_vec();
                break;
            }
        }
    }

    if report.failure.is_some() && options.rollback == RollbackPolicy::Teardown {
        teardown(graph, backend, &mut report);
    }

    report.duration = start.elapsed();
    report
}

/// Tear down completed nodes in reverse completion order.
fn teardown(graph: &Graph, backend: &mut dyn ProvisioningBackend, report: &mut RunReport) {
    for name in report.completed.iter().rev() {
        let (Some(node), Some(inputs), Some(outputs)) = (
            graph.node(name),
            report.inputs.get(name),
            report.outputs.get(name),
        ) else {
            continue;
        };
        warn!(node = %name, "tearing down");
        match node.teardown(inputs, outputs, backend) {
            Ok(()) => report.torn_down.push(name.clone()),
            Err(err) => {
                error!(node = %name, error = %err, "teardown failed");
                report.teardown_errors.push(NodeFailure {
                    node: name.clone(),
                    error: err.into(),
                });
            }
        }
    }
}
