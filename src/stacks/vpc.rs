//! VPC stack: network, internet gateway, public route, one public subnet.

use super::{descriptor, name_tag, office_cidr, reference, ALLOW_ALL_CIDR, VPC, VPC_CIDR};
use crate::backend::ProvisioningBackend;
use crate::core::error::ExecutionFailure;
use crate::core::node::{Node, Template};
use crate::core::types::{NodeSpec, OutputValue, ResolvedInputs, ResourceDescriptor, Source, Value};
use serde_json::json;

pub fn node() -> Node {
    let spec = NodeSpec::new(VPC)
        .input("Tags", [Source::global("Tags")])
        .input("Region", [Source::global("Region")])
        .input("StackType", [Source::global("StackType")])
        .input("IPAccess", [Source::global("IPAccess")])
        .default_value("Tags", Value::Mapping(Default::default()));
    Node::template(spec, VpcStack)
}

pub struct VpcStack;

impl Template for VpcStack {
    fn stack_name(&self, inputs: &ResolvedInputs) -> String {
        super::stack_name(inputs, VPC)
    }

    fn descriptor(
        &self,
        inputs: &ResolvedInputs,
        backend: &dyn ProvisioningBackend,
    ) -> Result<ResourceDescriptor, ExecutionFailure> {
        let region = inputs.require("Region")?;
        let ip_access = inputs.require("IPAccess")?;

        let zone = backend
            .availability_zones(&region)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ExecutionFailure::ActionFailed(format!("region {} has no availability zones", region))
            })?;
        let subnet = format!("{}PublicSubnet", title_case(&zone));

        let mut d = descriptor(inputs, VPC)?;
        d.parameters
            .insert("OfficeCIDR".to_string(), office_cidr(&ip_access));

        let resources = [
            (
                "GeoTrellisSparkVPC",
                json!({
                    "Type": "AWS::EC2::VPC",
                    "Properties": {
                        "CidrBlock": VPC_CIDR,
                        "EnableDnsSupport": true,
                        "EnableDnsHostnames": true,
                        "Tags": name_tag("GeoTrellisSparkVPC"),
                    }
                }),
            ),
            (
                "InternetGateway",
                json!({
                    "Type": "AWS::EC2::InternetGateway",
                    "Properties": { "Tags": name_tag("InternetGateway") }
                }),
            ),
            (
                "VPCGatewayAttachment",
                json!({
                    "Type": "AWS::EC2::VPCGatewayAttachment",
                    "Properties": {
                        "VpcId": reference("GeoTrellisSparkVPC"),
                        "InternetGatewayId": reference("InternetGateway"),
                    }
                }),
            ),
            (
                "PublicRouteTable",
                json!({
                    "Type": "AWS::EC2::RouteTable",
                    "Properties": {
                        "VpcId": reference("GeoTrellisSparkVPC"),
                        "Tags": name_tag("PublicRouteTable"),
                    }
                }),
            ),
            (
                "PublicRoute",
                json!({
                    "Type": "AWS::EC2::Route",
                    "DependsOn": "VPCGatewayAttachment",
                    "Properties": {
                        "RouteTableId": reference("PublicRouteTable"),
                        "DestinationCidrBlock": ALLOW_ALL_CIDR,
                        "GatewayId": reference("InternetGateway"),
                    }
                }),
            ),
        ];
        for (logical, body) in resources {
            d.resources.insert(logical.to_string(), body);
        }

        d.resources.insert(
            subnet.clone(),
            json!({
                "Type": "AWS::EC2::Subnet",
                "Properties": {
                    "VpcId": reference("GeoTrellisSparkVPC"),
                    "CidrBlock": "10.0.1.0/24",
                    "AvailabilityZone": zone,
                    "Tags": name_tag(&subnet),
                }
            }),
        );
        d.resources.insert(
            format!("{}PublicRouteTableAssociation", subnet),
            json!({
                "Type": "AWS::EC2::SubnetRouteTableAssociation",
                "Properties": {
                    "SubnetId": reference(&subnet),
                    "RouteTableId": reference("PublicRouteTable"),
                }
            }),
        );

        d.outputs.insert(
            "VpcId".to_string(),
            OutputValue::Ref("GeoTrellisSparkVPC".to_string()),
        );
        d.outputs
            .insert("MesosSubnet".to_string(), OutputValue::Ref(subnet));
        d.outputs
            .insert("AvailabilityZone".to_string(), OutputValue::Literal(zone));
        Ok(d)
    }
}

/// `us-east-1a` → `UsEast1A`: capitalize each letter run, drop dashes.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c == '-' {
            prev_alpha = false;
            continue;
        }
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
        } else {
            out.push(c);
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendState, MemoryBackend};
    use crate::core::config::GlobalConfig;
    use crate::core::resolver::resolve_inputs;
    use crate::stacks::tests::cluster_config;
    use indexmap::IndexMap;

    fn inputs(config: &GlobalConfig) -> ResolvedInputs {
        let node = node();
        resolve_inputs(node.spec(), config, &IndexMap::new(), &MemoryBackend::new()).unwrap()
    }

    #[test]
    fn test_vpc_title_case() {
        assert_eq!(title_case("us-east-1a"), "UsEast1A");
        assert_eq!(title_case("eu-west-1c"), "EuWest1C");
    }

    #[test]
    fn test_vpc_descriptor_shape() {
        let backend = MemoryBackend::new();
        let d = VpcStack.descriptor(&inputs(&cluster_config()), &backend).unwrap();
        assert_eq!(d.stack_name, "accumulo-VPC");
        assert_eq!(d.parameters["OfficeCIDR"], "203.0.113.7/32");
        assert!(d.resources.contains_key("UsEast1APublicSubnet"));
        assert!(d
            .resources
            .contains_key("UsEast1APublicSubnetPublicRouteTableAssociation"));
        assert_eq!(
            d.outputs["AvailabilityZone"],
            OutputValue::Literal("us-east-1a".into())
        );
        assert_eq!(d.tags["Project"], "geotrellis");
        assert_eq!(d.tags["StackType"], "accumulo");
    }

    #[test]
    fn test_vpc_first_zone_of_region() {
        let mut state = BackendState::default();
        state
            .zones
            .insert("us-east-1".into(), vec!["us-east-1c".into(), "us-east-1d".into()]);
        let backend = MemoryBackend::with_state(state);
        let d = VpcStack.descriptor(&inputs(&cluster_config()), &backend).unwrap();
        assert!(d.resources.contains_key("UsEast1CPublicSubnet"));
    }

    #[test]
    fn test_vpc_region_without_zones() {
        let mut state = BackendState::default();
        state.zones.insert("us-east-1".into(), Vec::new());
        let backend = MemoryBackend::with_state(state);
        let err = VpcStack
            .descriptor(&inputs(&cluster_config()), &backend)
            .unwrap_err();
        assert!(matches!(err, ExecutionFailure::ActionFailed(_)));
    }

    #[test]
    fn test_vpc_tags_default_empty() {
        let config = GlobalConfig::from_pairs([
            ("Region", "us-east-1"),
            ("StackType", "cassandra"),
            ("IPAccess", "198.51.100.1"),
        ]);
        let d = VpcStack.descriptor(&inputs(&config), &MemoryBackend::new()).unwrap();
        assert_eq!(d.tags.keys().collect::<Vec<_>>(), vec!["StackType", "Node"]);
    }
}
