//! Orchestration core: types, configuration, graph, resolution, execution.

pub mod config;
pub mod ensure;
pub mod error;
pub mod executor;
pub mod graph;
pub mod image;
pub mod node;
pub mod planner;
pub mod resolver;
pub mod types;
