//! Strata: dependency-ordered infrastructure provisioning.
//!
//! Nodes declare named inputs and where they come from: global config,
//! another node's outputs, or the newest matching machine image. The
//! executor orders nodes topologically, resolves each node's inputs, and
//! drives a provisioning backend one node at a time.

pub mod backend;
pub mod cli;
pub mod core;
pub mod imaging;
pub mod stacks;
