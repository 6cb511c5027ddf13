//! Provisioning backend abstraction: declarative apply plus direct actions.
//!
//! The core only forwards descriptors and reads back flat outputs. Two
//! implementations ship: an in-memory backend and a file-persisted one that
//! stands in for a remote provider between runs.

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::{BackendCall, BackendState, MemoryBackend};

use crate::core::error::BackendError;
use crate::core::types::{DesiredState, ExistingResource, MachineImage, ResourceDescriptor, StackOutputs};

/// Read access to machine images, used by input resolution.
pub trait ImageCatalog {
    fn list_images(&self) -> Result<Vec<MachineImage>, BackendError>;
}

/// The external system that turns descriptors into infrastructure.
///
/// Every call blocks; the executor never overlaps two calls.
pub trait ProvisioningBackend: ImageCatalog {
    /// Create the stack if absent, update it if the descriptor changed.
    fn apply(&mut self, descriptor: &ResourceDescriptor) -> Result<StackOutputs, BackendError>;

    /// Delete a stack. Deleting an absent stack is not an error.
    fn destroy(&mut self, stack_name: &str) -> Result<(), BackendError>;

    /// List directly-managed resources of one kind.
    fn list_existing(&self, kind: &str) -> Result<Vec<ExistingResource>, BackendError>;

    /// Create a directly-managed resource carrying an identity marker.
    fn create(
        &mut self,
        kind: &str,
        marker: &str,
        desired: &DesiredState,
    ) -> Result<ExistingResource, BackendError>;

    /// Availability zones of a region, in provider order.
    fn availability_zones(&self, region: &str) -> Result<Vec<String>, BackendError>;
}

/// Derive a short deterministic identifier from its parts.
pub(crate) fn short_id(parts: &[&str]) -> String {
    let hash = blake3::hash(parts.join("\0").as_bytes());
    hash.to_hex()[..12].to_string()
}

/// Fingerprint a descriptor so unchanged re-applies are no-ops.
pub fn fingerprint(descriptor: &ResourceDescriptor) -> Result<String, BackendError> {
    let json = serde_json::to_string(descriptor)
        .map_err(|e| BackendError::State(format!("cannot serialize descriptor: {}", e)))?;
    Ok(format!("blake3:{}", blake3::hash(json.as_bytes()).to_hex()))
}
