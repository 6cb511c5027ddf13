//! Cluster stacks: the four nodes of a Mesos cluster and their wiring.
//!
//! VPC → R53PrivateHostedZone → MesosLeader → MesosFollower. Each template
//! node builds an opaque CloudFormation-shaped descriptor; the hosted zone is
//! a custom action because it is managed directly by identity marker.

pub mod follower;
pub mod hosted_zone;
pub mod leader;
pub mod vpc;

use crate::core::error::{ExecutionFailure, GraphError};
use crate::core::graph::Graph;
use crate::core::types::{ImageFilter, ResolvedInputs, ResourceDescriptor, Source};
use indexmap::IndexMap;
use serde_json::{json, Value as Json};
use std::fmt;
use std::str::FromStr;

pub const VPC: &str = "VPC";
pub const HOSTED_ZONE: &str = "R53PrivateHostedZone";
pub const LEADER: &str = "MesosLeader";
pub const FOLLOWER: &str = "MesosFollower";

pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const ALLOW_ALL_CIDR: &str = "0.0.0.0/0";

/// Instance types a leader or follower may use.
pub const EC2_INSTANCE_TYPES: &[&str] = &[
    "c4.8xlarge",
    "c3.2xlarge",
    "c3.4xlarge",
    "cc1.4xlarge",
    "i2.xlarge",
    "i2.2xlarge",
    "i2.4xlarge",
    "i2.8xlarge",
    "m2.4xlarge",
    "m3.large",
    "m3.2xlarge",
    "r3.large",
    "r3.2xlarge",
    "r3.4xlarge",
];

/// Build the cluster graph. Validation happens here, before anything runs.
pub fn build_graph() -> Result<Graph, GraphError> {
    Graph::new(vec![
        vpc::node(),
        hosted_zone::node(),
        leader::node(),
        follower::node(),
    ])
}

/// Kind of machine image the cluster runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    MesosLeader,
    MesosFollower,
}

impl MachineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MesosLeader => "mesos-leader",
            Self::MesosFollower => "mesos-follower",
        }
    }

    /// Most recent image built for this machine type and the configured stack type.
    pub fn image_source(&self) -> Source {
        Source::latest_image(
            ImageFilter::new()
                .tag("Name", self.as_str())
                .tag_from_global("StackType", "StackType"),
        )
    }
}

impl FromStr for MachineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mesos-leader" => Ok(Self::MesosLeader),
            "mesos-follower" => Ok(Self::MesosFollower),
            other => Err(format!(
                "unknown machine type '{}' (expected mesos-leader or mesos-follower)",
                other
            )),
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<NameSpace>-<StackType>-<node>`, skipping absent parts.
pub fn stack_name(inputs: &ResolvedInputs, node: &str) -> String {
    let mut parts: Vec<String> = ["NameSpace", "StackType"]
        .iter()
        .filter_map(|key| inputs.text(key))
        .filter(|s| !s.is_empty())
        .collect();
    parts.push(node.to_string());
    parts.join("-")
}

/// Configured tags plus the stack type and owning node.
pub fn stack_tags(
    inputs: &ResolvedInputs,
    node: &str,
) -> Result<IndexMap<String, String>, ExecutionFailure> {
    let mut tags = inputs.tags("Tags")?;
    if let Some(stack_type) = inputs.text("StackType") {
        tags.insert("StackType".to_string(), stack_type);
    }
    tags.insert("Node".to_string(), node.to_string());
    Ok(tags)
}

/// A descriptor skeleton carrying the stack name and tags.
pub(crate) fn descriptor(
    inputs: &ResolvedInputs,
    node: &str,
) -> Result<ResourceDescriptor, ExecutionFailure> {
    Ok(ResourceDescriptor {
        stack_name: stack_name(inputs, node),
        parameters: IndexMap::new(),
        resources: IndexMap::new(),
        outputs: IndexMap::new(),
        tags: stack_tags(inputs, node)?,
    })
}

/// Reject instance types outside [`EC2_INSTANCE_TYPES`].
pub fn validate_instance_type(input: &str, value: &str) -> Result<(), ExecutionFailure> {
    if EC2_INSTANCE_TYPES.contains(&value) {
        Ok(())
    } else {
        Err(ExecutionFailure::InvalidInput {
            input: input.to_string(),
            reason: format!("'{}' is not an allowed instance type", value),
        })
    }
}

/// Office access as CIDR; bare addresses become a /32.
pub fn office_cidr(ip_access: &str) -> String {
    if ip_access.contains('/') {
        ip_access.to_string()
    } else {
        format!("{}/32", ip_access)
    }
}

pub(crate) fn name_tag(name: &str) -> Json {
    json!([{ "Key": "Name", "Value": name }])
}

pub(crate) fn reference(logical: &str) -> Json {
    json!({ "Ref": logical })
}

/// One TCP rule per port from the given CIDR.
pub(crate) fn port_rules(cidr: &Json, ports: &[u16]) -> Vec<Json> {
    ports
        .iter()
        .map(|p| json!({ "IpProtocol": "tcp", "CidrIp": cidr, "FromPort": p, "ToPort": p }))
        .collect()
}

/// All TCP ports from inside the VPC.
pub(crate) fn vpc_internal_rule() -> Json {
    json!({ "IpProtocol": "tcp", "CidrIp": VPC_CIDR, "FromPort": 0, "ToPort": 65535 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend};
    use crate::core::config::GlobalConfig;
    use crate::core::error::{ImageError, NodeError, ResolutionError};
    use crate::core::executor::{self, RunOptions};
    use crate::core::types::{MachineImage, Value};

    pub(crate) const CLUSTER: &str = r#"
default:
  Region: us-east-1
  IPAccess: 203.0.113.7
  PrivateHostedZoneName: geotrellis-spark.internal
accumulo:
  NameSpace: ops
  StackType: accumulo
  KeyName: geotrellis-spark-test
  NumFollowers: 3
  MesosFollowerSpotPrice: "0.25"
  Tags:
    Project: geotrellis
"#;

    pub(crate) fn cluster_config() -> GlobalConfig {
        GlobalConfig::builder("accumulo").yaml(CLUSTER).unwrap().build()
    }

    pub(crate) fn image(id: &str, machine: MachineType, created: &str) -> MachineImage {
        MachineImage {
            id: id.to_string(),
            tags: IndexMap::from([
                ("Name".to_string(), machine.as_str().to_string()),
                ("StackType".to_string(), "accumulo".to_string()),
                ("Created".to_string(), created.to_string()),
            ]),
        }
    }

    pub(crate) fn backend_with_images() -> MemoryBackend {
        MemoryBackend::new().with_images(vec![
            image("ami-leader-old", MachineType::MesosLeader, "2020-01-01T00:00:00Z"),
            image("ami-leader-new", MachineType::MesosLeader, "2021-06-01T00:00:00Z"),
            image("ami-follower", MachineType::MesosFollower, "2021-06-01T00:00:00Z"),
        ])
    }

    #[test]
    fn test_stacks_graph_order() {
        let graph = build_graph().unwrap();
        assert_eq!(graph.order(), &[VPC, HOSTED_ZONE, LEADER, FOLLOWER]);
        assert_eq!(graph.dependencies(FOLLOWER), &[VPC, HOSTED_ZONE, LEADER]);
    }

    #[test]
    fn test_stacks_full_run() {
        let graph = build_graph().unwrap();
        let mut backend = backend_with_images();
        let report = executor::run(&graph, &cluster_config(), &mut backend, &RunOptions::default());
        assert!(report.is_success(), "{:?}", report.failure);
        assert_eq!(report.completed, vec![VPC, HOSTED_ZONE, LEADER, FOLLOWER]);

        let stacks: Vec<&String> = backend.state().stacks.keys().collect();
        assert_eq!(
            stacks,
            vec!["accumulo-VPC", "ops-accumulo-MesosLeader", "ops-accumulo-MesosFollower"]
        );
        assert_eq!(backend.state().resources.len(), 1);
        assert_eq!(
            report.inputs[LEADER].text("MesosLeaderAMI").as_deref(),
            Some("ami-leader-new")
        );
        assert_eq!(
            report.inputs[FOLLOWER].text("PrivateHostedZoneId"),
            report.outputs[HOSTED_ZONE]["PrivateHostedZoneId"]
                .as_str()
                .map(String::from)
        );
    }

    #[test]
    fn test_stacks_rerun_converges() {
        let graph = build_graph().unwrap();
        let config = cluster_config();
        let mut backend = backend_with_images();
        let first = executor::run(&graph, &config, &mut backend, &RunOptions::default());
        let second = executor::run(&graph, &config, &mut backend, &RunOptions::default());
        assert!(second.is_success());
        assert_eq!(first.outputs, second.outputs);
        assert_eq!(backend.state().resources.len(), 1);
        assert!(backend.state().stacks.values().all(|s| s.revision == 1));
        let creates = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Create { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_stacks_ami_override_skips_lookup() {
        let graph = build_graph().unwrap();
        let config = GlobalConfig::builder("accumulo")
            .yaml(CLUSTER)
            .unwrap()
            .overrides(&[
                "MesosLeaderAMI=ami-pinned-leader".to_string(),
                "MesosFollowerAMI=ami-pinned-follower".to_string(),
            ])
            .unwrap()
            .build();
        let mut backend = MemoryBackend::new();
        let report = executor::run(&graph, &config, &mut backend, &RunOptions::default());
        assert!(report.is_success(), "{:?}", report.failure);
        assert!(!backend.calls().contains(&BackendCall::ListImages));
        assert_eq!(
            report.inputs[FOLLOWER].text("MesosFollowerAMI").as_deref(),
            Some("ami-pinned-follower")
        );
    }

    #[test]
    fn test_stacks_missing_image_stops_at_leader() {
        let graph = build_graph().unwrap();
        let mut backend = MemoryBackend::new();
        let report = executor::run(&graph, &cluster_config(), &mut backend, &RunOptions::default());
        let err = report.into_result().unwrap_err();
        assert_eq!(err.node, LEADER);
        assert_eq!(err.completed, vec![VPC, HOSTED_ZONE]);
        assert!(matches!(
            err.error,
            NodeError::Resolution(ResolutionError::Image {
                source: ImageError::NotFound { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_stacks_existing_vpc_from_config() {
        let graph = build_graph().unwrap();
        let config = GlobalConfig::builder("accumulo")
            .yaml(CLUSTER)
            .unwrap()
            .overrides(&["VpcId=vpc-existing".to_string()])
            .unwrap()
            .build();
        let mut backend = backend_with_images();
        let report = executor::run(&graph, &config, &mut backend, &RunOptions::default());
        assert!(report.is_success());
        assert_eq!(report.inputs[LEADER].text("VpcId").as_deref(), Some("vpc-existing"));
        assert_eq!(
            backend.state().resources[0].properties["VpcId"],
            "vpc-existing"
        );
    }

    #[test]
    fn test_stacks_stack_name_parts() {
        let mut inputs = ResolvedInputs::default();
        inputs.values.insert("StackType".into(), Value::from("accumulo"));
        assert_eq!(stack_name(&inputs, VPC), "accumulo-VPC");
        inputs.values.insert("NameSpace".into(), Value::from("ops"));
        assert_eq!(stack_name(&inputs, LEADER), "ops-accumulo-MesosLeader");
        inputs.values.insert("NameSpace".into(), Value::Null);
        assert_eq!(stack_name(&inputs, LEADER), "accumulo-MesosLeader");
    }

    #[test]
    fn test_stacks_machine_type_parse() {
        assert_eq!("mesos-leader".parse::<MachineType>().unwrap(), MachineType::MesosLeader);
        assert_eq!(MachineType::MesosFollower.to_string(), "mesos-follower");
        assert!("spark-worker".parse::<MachineType>().is_err());
    }

    #[test]
    fn test_stacks_instance_type_and_cidr() {
        assert!(validate_instance_type("T", "r3.large").is_ok());
        assert!(validate_instance_type("T", "t2.nano").is_err());
        assert_eq!(office_cidr("203.0.113.7"), "203.0.113.7/32");
        assert_eq!(office_cidr("203.0.113.0/24"), "203.0.113.0/24");
    }
}
