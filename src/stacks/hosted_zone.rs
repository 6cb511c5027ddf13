//! Private hosted zone: managed directly, found again by identity marker.
//!
//! Private zones cannot be declared in a stack, so this node lists the
//! existing zones and reuses the one whose marker matches instead of
//! creating a duplicate on every launch.

use super::HOSTED_ZONE;
use crate::backend::ProvisioningBackend;
use crate::core::ensure::ensure;
use crate::core::error::ExecutionFailure;
use crate::core::node::{CustomAction, Node};
use crate::core::types::{DesiredState, NodeSpec, Outputs, ResolvedInputs, Source, Value};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Backend resource kind of a hosted zone.
pub const KIND: &str = "hostedzone";

pub fn node() -> Node {
    let spec = NodeSpec::new(HOSTED_ZONE)
        .input("VpcId", [Source::global("VpcId"), Source::node(super::VPC, "VpcId")])
        .input("PrivateHostedZoneName", [Source::global("PrivateHostedZoneName")])
        .input("Region", [Source::global("Region")])
        .input("StackType", [Source::global("StackType")])
        .input("Tags", [Source::global("Tags")])
        .default_value("Tags", Value::Mapping(Default::default()));
    Node::action(spec, PrivateHostedZone)
}

pub struct PrivateHostedZone;

/// Canonical JSON of the zone's identifying attributes; keys sorted.
pub fn identity_marker(inputs: &ResolvedInputs) -> Result<String, ExecutionFailure> {
    let mut identity: BTreeMap<String, String> = inputs.tags("Tags")?.into_iter().collect();
    identity.insert("StackType".to_string(), inputs.require("StackType")?);
    identity.insert("Zone".to_string(), inputs.require("PrivateHostedZoneName")?);
    serde_json::to_string(&identity)
        .map_err(|e| ExecutionFailure::ActionFailed(format!("cannot encode identity marker: {}", e)))
}

impl CustomAction for PrivateHostedZone {
    fn run(
        &self,
        inputs: &ResolvedInputs,
        backend: &mut dyn ProvisioningBackend,
    ) -> Result<Outputs, ExecutionFailure> {
        let marker = identity_marker(inputs)?;
        let desired = DesiredState {
            name: inputs.require("PrivateHostedZoneName")?,
            properties: IndexMap::from([
                ("VpcId".to_string(), inputs.require("VpcId")?),
                ("VpcRegion".to_string(), inputs.require("Region")?),
                ("PrivateZone".to_string(), "true".to_string()),
            ]),
        };

        let ensured = ensure(backend, KIND, &marker, &desired)?;
        let zone_id = ensured
            .resource
            .id
            .rsplit('/')
            .next()
            .unwrap_or(&ensured.resource.id)
            .to_string();

        let mut outputs = Outputs::new();
        outputs.insert("PrivateHostedZoneId".to_string(), Value::String(zone_id));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::core::types::ExistingResource;

    fn inputs(tags: &[(&str, &str)]) -> ResolvedInputs {
        let mut map = serde_yaml_ng::Mapping::new();
        for (k, v) in tags {
            map.insert((*k).into(), (*v).into());
        }
        ResolvedInputs {
            values: IndexMap::from([
                ("VpcId".to_string(), Value::from("vpc-1")),
                ("PrivateHostedZoneName".to_string(), Value::from("geotrellis-spark.internal")),
                ("Region".to_string(), Value::from("us-east-1")),
                ("StackType".to_string(), Value::from("accumulo")),
                ("Tags".to_string(), Value::Mapping(map)),
            ]),
        }
    }

    #[test]
    fn test_hosted_zone_marker_canonical() {
        let a = identity_marker(&inputs(&[("b", "2"), ("a", "1")])).unwrap();
        let b = identity_marker(&inputs(&[("a", "1"), ("b", "2")])).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            r#"{"StackType":"accumulo","Zone":"geotrellis-spark.internal","a":"1","b":"2"}"#
        );
    }

    #[test]
    fn test_hosted_zone_created_once() {
        let mut backend = MemoryBackend::new();
        let first = PrivateHostedZone.run(&inputs(&[]), &mut backend).unwrap();
        let second = PrivateHostedZone.run(&inputs(&[]), &mut backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.state().resources.len(), 1);
        let id = first["PrivateHostedZoneId"].as_str().unwrap();
        assert!(!id.contains('/'));
        assert_eq!(backend.state().resources[0].properties["PrivateZone"], "true");
    }

    #[test]
    fn test_hosted_zone_reuses_preexisting_marker() {
        let marker = identity_marker(&inputs(&[])).unwrap();
        let mut state = crate::backend::BackendState::default();
        state.resources.push(ExistingResource {
            id: "/hostedzone/Z123EXISTING".into(),
            kind: KIND.into(),
            name: "geotrellis-spark.internal".into(),
            marker: Some(marker),
            properties: IndexMap::new(),
        });
        let mut backend = MemoryBackend::with_state(state);
        let out = PrivateHostedZone.run(&inputs(&[]), &mut backend).unwrap();
        assert_eq!(out["PrivateHostedZoneId"], Value::from("Z123EXISTING"));
        assert_eq!(backend.state().resources.len(), 1);
    }

    #[test]
    fn test_hosted_zone_different_tags_new_zone() {
        let mut backend = MemoryBackend::new();
        PrivateHostedZone.run(&inputs(&[]), &mut backend).unwrap();
        PrivateHostedZone
            .run(&inputs(&[("Owner", "ops")]), &mut backend)
            .unwrap();
        assert_eq!(backend.state().resources.len(), 2);
    }
}
