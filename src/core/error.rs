//! Error taxonomy for graph construction, input resolution, and node execution.
//!
//! Every failure is value-returned up to the executor; none are retried.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("config root must be a mapping of profiles")]
    NotAMapping,

    #[error("profile '{profile}' not found (available: {available})")]
    UnknownProfile { profile: String, available: String },

    #[error("invalid override '{0}', expected KEY=VALUE")]
    InvalidOverride(String),
}

/// Graph construction errors. Raised before any node executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("node '{node}' input '{input}' references unknown node '{upstream}'")]
    UnknownNode {
        node: String,
        input: String,
        upstream: String,
    },

    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' input '{input}' has no sources and no default")]
    UnsatisfiableInput { node: String, input: String },

    #[error("invalid input source '{0}', expected NAMESPACE:KEY")]
    InvalidSource(String),
}

/// Image selection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("no image matches filter {filter}")]
    NotFound { filter: String },

    #[error("{count} images match filter {filter}, expected exactly one")]
    Ambiguous { filter: String, count: usize },
}

/// Errors reported by a provisioning backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{target} rejected: {reason}")]
    Rejected { target: String, reason: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("backend state error: {0}")]
    State(String),
}

/// Input resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("node '{node}' is missing required input '{input}'")]
    MissingInput { node: String, input: String },

    #[error("node '{node}' read from '{upstream}' before it executed")]
    UpstreamNotExecuted { node: String, upstream: String },

    #[error("node '{node}' input '{input}': image filter needs global '{key}'")]
    FilterValueMissing {
        node: String,
        input: String,
        key: String,
    },

    #[error("node '{node}' input '{input}': {source}")]
    Image {
        node: String,
        input: String,
        #[source]
        source: ImageError,
    },

    #[error("node '{node}' input '{input}': image catalog unavailable: {source}")]
    Catalog {
        node: String,
        input: String,
        #[source]
        source: BackendError,
    },
}

/// Failures raised by a node's execute step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    #[error("backend rejected: {0}")]
    BackendRejected(#[from] BackendError),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("input '{input}' is unusable: {reason}")]
    InvalidInput { input: String, reason: String },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// The single failure that stopped a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

/// A run that stopped before completing every node.
#[derive(Error, Debug, Clone)]
#[error("node '{node}' failed after {} completed node(s): {error}", .completed.len())]
pub struct RunError {
    pub node: String,
    pub completed: Vec<String>,
    pub error: NodeError,
}
