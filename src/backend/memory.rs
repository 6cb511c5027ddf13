//! In-memory provisioning backend with deterministic physical ids.

use super::{fingerprint, short_id, ImageCatalog, ProvisioningBackend};
use crate::core::error::BackendError;
use crate::core::types::{
    DesiredState, ExistingResource, MachineImage, OutputValue, ResourceDescriptor, StackOutputs,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Everything the backend knows; this is what a file backend persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendState {
    #[serde(default)]
    pub stacks: IndexMap<String, StackRecord>,

    #[serde(default)]
    pub resources: Vec<ExistingResource>,

    #[serde(default)]
    pub images: Vec<MachineImage>,

    /// Availability zones per region; unlisted regions get `<region>a`, `<region>b`
    #[serde(default)]
    pub zones: IndexMap<String, Vec<String>>,
}

/// A provisioned stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
    pub fingerprint: String,
    pub revision: u32,
    pub outputs: StackOutputs,

    /// Credential profile the stack was last applied under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// Backend call, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Apply(String),
    Destroy(String),
    ListExisting(String),
    Create { kind: String, marker: String },
    ListImages,
    AvailabilityZones(String),
}

/// Deterministic in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: BackendState,
    calls: std::cell::RefCell<Vec<BackendCall>>,
    failing: HashSet<String>,
    credentials: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: BackendState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn with_images(mut self, images: Vec<MachineImage>) -> Self {
        self.state.images = images;
        self
    }

    /// Act under a named credential profile.
    pub fn with_credentials(mut self, profile: impl Into<String>) -> Self {
        self.credentials = Some(profile.into());
        self
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    /// Make every apply of this stack fail.
    pub fn fail_stack(mut self, stack_name: impl Into<String>) -> Self {
        self.failing.insert(stack_name.into());
        self
    }

    pub fn state(&self) -> &BackendState {
        &self.state
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: BackendCall) {
        self.calls.borrow_mut().push(call);
    }

    fn materialize(
        descriptor: &ResourceDescriptor,
    ) -> Result<StackOutputs, BackendError> {
        let mut outputs = StackOutputs::new();
        for (name, value) in &descriptor.outputs {
            let rendered = match value {
                OutputValue::Literal(s) => s.clone(),
                OutputValue::Ref(logical) => {
                    physical_id(descriptor, logical).ok_or_else(|| reject(descriptor, logical))?
                }
                OutputValue::Attr {
                    resource,
                    attribute,
                } => {
                    let id = physical_id(descriptor, resource)
                        .ok_or_else(|| reject(descriptor, resource))?;
                    attribute_value(&id, attribute)
                }
            };
            outputs.insert(name.clone(), rendered);
        }
        Ok(outputs)
    }
}

fn reject(descriptor: &ResourceDescriptor, logical: &str) -> BackendError {
    BackendError::Rejected {
        target: format!("stack {}", descriptor.stack_name),
        reason: format!("output references unknown resource '{}'", logical),
    }
}

/// `<prefix>-<hash>` where the prefix comes from the resource type.
fn physical_id(descriptor: &ResourceDescriptor, logical: &str) -> Option<String> {
    let resource = descriptor.resources.get(logical)?;
    let rtype = resource
        .get("Type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("Resource");
    let prefix = match rtype.rsplit("::").next().unwrap_or(rtype) {
        "VPC" => "vpc".to_string(),
        "Subnet" => "subnet".to_string(),
        "Instance" => "i".to_string(),
        "SecurityGroup" => "sg".to_string(),
        other => other.to_lowercase(),
    };
    Some(format!(
        "{}-{}",
        prefix,
        short_id(&[descriptor.stack_name.as_str(), logical])
    ))
}

fn attribute_value(id: &str, attribute: &str) -> String {
    if attribute == "PrivateIp" {
        let bytes = blake3::hash(id.as_bytes());
        let b = bytes.as_bytes();
        format!("10.0.{}.{}", 1 + b[0] % 254, 1 + b[1] % 254)
    } else {
        format!("{}.{}", id, attribute)
    }
}

impl ImageCatalog for MemoryBackend {
    fn list_images(&self) -> Result<Vec<MachineImage>, BackendError> {
        self.record(BackendCall::ListImages);
        Ok(self.state.images.clone())
    }
}

impl ProvisioningBackend for MemoryBackend {
    fn apply(&mut self, descriptor: &ResourceDescriptor) -> Result<StackOutputs, BackendError> {
        let name = &descriptor.stack_name;
        self.record(BackendCall::Apply(name.clone()));

        if self.failing.contains(name) {
            return Err(BackendError::Rejected {
                target: format!("stack {}", name),
                reason: "stack operation failed".to_string(),
            });
        }

        let fp = fingerprint(descriptor)?;
        if let Some(existing) = self.state.stacks.get(name) {
            if existing.fingerprint == fp {
                return Ok(existing.outputs.clone());
            }
        }

        let outputs = Self::materialize(descriptor)?;
        let revision = self.state.stacks.get(name).map_or(1, |r| r.revision + 1);
        self.state.stacks.insert(
            name.clone(),
            StackRecord {
                fingerprint: fp,
                revision,
                outputs: outputs.clone(),
                credentials: self.credentials.clone(),
            },
        );
        Ok(outputs)
    }

    fn destroy(&mut self, stack_name: &str) -> Result<(), BackendError> {
        self.record(BackendCall::Destroy(stack_name.to_string()));
        self.state.stacks.shift_remove(stack_name);
        Ok(())
    }

    fn list_existing(&self, kind: &str) -> Result<Vec<ExistingResource>, BackendError> {
        self.record(BackendCall::ListExisting(kind.to_string()));
        Ok(self
            .state
            .resources
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    fn create(
        &mut self,
        kind: &str,
        marker: &str,
        desired: &DesiredState,
    ) -> Result<ExistingResource, BackendError> {
        self.record(BackendCall::Create {
            kind: kind.to_string(),
            marker: marker.to_string(),
        });
        if desired.name.is_empty() {
            return Err(BackendError::Rejected {
                target: kind.to_string(),
                reason: "resource name must not be empty".to_string(),
            });
        }
        let serial = self.state.resources.len().to_string();
        let resource = ExistingResource {
            id: format!("/{}/{}", kind, short_id(&[kind, marker, serial.as_str()]).to_uppercase()),
            kind: kind.to_string(),
            name: desired.name.clone(),
            marker: Some(marker.to_string()),
            properties: desired.properties.clone(),
        };
        self.state.resources.push(resource.clone());
        Ok(resource)
    }

    fn availability_zones(&self, region: &str) -> Result<Vec<String>, BackendError> {
        self.record(BackendCall::AvailabilityZones(region.to_string()));
        Ok(self
            .state
            .zones
            .get(region)
            .cloned()
            .unwrap_or_else(|| vec![format!("{}a", region), format!("{}b", region)]))
    }
}
