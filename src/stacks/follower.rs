//! Mesos follower stack: security group, launch configuration, auto-scaling group.

use super::{
    descriptor, name_tag, office_cidr, port_rules, reference, validate_instance_type,
    vpc_internal_rule, MachineType, ALLOW_ALL_CIDR, FOLLOWER, HOSTED_ZONE, LEADER, VPC,
};
use crate::backend::ProvisioningBackend;
use crate::core::error::ExecutionFailure;
use crate::core::node::{Node, Template};
use crate::core::types::{NodeSpec, ResolvedInputs, ResourceDescriptor, Source, Value};
use serde_json::{json, Value as Json};

/// Ports open to the office CIDR.
pub const FOLLOWER_PORTS: &[u16] = &[22, 5050, 5051];

/// Outbound web ports.
pub const EGRESS_PORTS: &[u16] = &[80, 443];

/// Ephemeral instance-store devices, `/dev/sdb` through `/dev/sdi`.
const EPHEMERAL_DEVICES: usize = 8;

pub fn node() -> Node {
    let spec = NodeSpec::new(FOLLOWER)
        .input("NameSpace", [Source::global("NameSpace")])
        .input("AvailabilityZone", [Source::node(VPC, "AvailabilityZone")])
        .input("Tags", [Source::global("Tags")])
        .input("Region", [Source::global("Region")])
        .input("StackType", [Source::global("StackType")])
        .input("KeyName", [Source::global("KeyName")])
        .input("IPAccess", [Source::global("IPAccess")])
        .input("PrivateHostedZoneId", [Source::node(HOSTED_ZONE, "PrivateHostedZoneId")])
        .input("LeaderPrivateIp", [Source::node(LEADER, "LeaderPrivateIp")])
        .input(
            "MesosFollowerAMI",
            [
                Source::global("MesosFollowerAMI"),
                MachineType::MesosFollower.image_source(),
            ],
        )
        .input("NumFollowers", [Source::global("NumFollowers")])
        .input("MesosFollowerInstanceProfile", [Source::global("MesosFollowerInstanceProfile")])
        .input("MesosFollowerSpotPrice", [Source::global("MesosFollowerSpotPrice")])
        .input("MesosSubnet", [Source::node(VPC, "MesosSubnet")])
        .input("MesosFollowerInstanceType", [Source::global("MesosFollowerInstanceType")])
        .input("VpcId", [Source::global("VpcId"), Source::node(VPC, "VpcId")])
        .optional("NameSpace")
        .optional("MesosFollowerSpotPrice")
        .default_value("Tags", Value::Mapping(Default::default()))
        .default_value("NumFollowers", "2")
        .default_value("MesosFollowerInstanceProfile", "MesosFollowerInstanceProfile")
        .default_value("MesosFollowerInstanceType", "i2.2xlarge");
    Node::template(spec, FollowerStack)
}

pub struct FollowerStack;

impl Template for FollowerStack {
    fn stack_name(&self, inputs: &ResolvedInputs) -> String {
        super::stack_name(inputs, FOLLOWER)
    }

    fn descriptor(
        &self,
        inputs: &ResolvedInputs,
        _backend: &dyn ProvisioningBackend,
    ) -> Result<ResourceDescriptor, ExecutionFailure> {
        let instance_type = inputs.require("MesosFollowerInstanceType")?;
        validate_instance_type("MesosFollowerInstanceType", &instance_type)?;

        let num_followers = inputs.require("NumFollowers")?;
        let count: u32 = num_followers
            .parse()
            .map_err(|_| ExecutionFailure::InvalidInput {
                input: "NumFollowers".to_string(),
                reason: format!("'{}' is not a whole number", num_followers),
            })?;
        let stack_type = inputs.require("StackType")?;
        let zone = inputs.require("AvailabilityZone")?;

        let mut d = descriptor(inputs, FOLLOWER)?;
        let parameters = [
            ("VpcId", inputs.require("VpcId")?),
            ("KeyName", inputs.require("KeyName")?),
            ("OfficeCIDR", office_cidr(&inputs.require("IPAccess")?)),
            ("MesosFollowerAMI", inputs.require("MesosFollowerAMI")?),
            ("MesosFollowerInstanceProfile", inputs.require("MesosFollowerInstanceProfile")?),
            ("MesosFollowerInstanceType", instance_type),
            ("MesosSubnet", inputs.require("MesosSubnet")?),
            ("PrivateHostedZoneId", inputs.require("PrivateHostedZoneId")?),
            ("LeaderPrivateIp", inputs.require("LeaderPrivateIp")?),
        ];
        for (name, value) in parameters {
            d.parameters.insert(name.to_string(), value);
        }

        let mut ingress = port_rules(&reference("OfficeCIDR"), FOLLOWER_PORTS);
        ingress.push(vpc_internal_rule());
        let mut egress = vec![vpc_internal_rule()];
        egress.extend(port_rules(&json!(ALLOW_ALL_CIDR), EGRESS_PORTS));
        d.resources.insert(
            "sgMesosFollower".to_string(),
            json!({
                "Type": "AWS::EC2::SecurityGroup",
                "Properties": {
                    "GroupDescription": "Enables access to the MesosFollower",
                    "VpcId": reference("VpcId"),
                    "SecurityGroupIngress": ingress,
                    "SecurityGroupEgress": egress,
                    "Tags": name_tag("sgMesosFollower"),
                }
            }),
        );

        let devices: Vec<Json> = (0..EPHEMERAL_DEVICES)
            .map(|i| {
                let letter = (b'b' + i as u8) as char;
                json!({ "DeviceName": format!("/dev/sd{}", letter), "VirtualName": format!("ephemeral{}", i) })
            })
            .collect();
        let mut launch = json!({
            "AssociatePublicIpAddress": true,
            "BlockDeviceMappings": devices,
            "ImageId": reference("MesosFollowerAMI"),
            "IamInstanceProfile": reference("MesosFollowerInstanceProfile"),
            "InstanceType": reference("MesosFollowerInstanceType"),
            "KeyName": reference("KeyName"),
            "SecurityGroups": [reference("sgMesosFollower")],
            "UserDataFile": format!("cloud-config/{}-follower.yml", stack_type),
        });
        if let (Some(price), Some(props)) =
            (inputs.text("MesosFollowerSpotPrice"), launch.as_object_mut())
        {
            props.insert("SpotPrice".to_string(), Json::String(price));
        }
        d.resources.insert(
            "lcMesosFollower".to_string(),
            json!({ "Type": "AWS::AutoScaling::LaunchConfiguration", "Properties": launch }),
        );

        d.resources.insert(
            "asgMesosFollower".to_string(),
            json!({
                "Type": "AWS::AutoScaling::AutoScalingGroup",
                "Properties": {
                    "AvailabilityZones": [zone],
                    "Cooldown": 300,
                    "DesiredCapacity": count,
                    "HealthCheckGracePeriod": 600,
                    "HealthCheckType": "EC2",
                    "LaunchConfigurationName": reference("lcMesosFollower"),
                    "MaxSize": count,
                    "MinSize": count,
                    "VPCZoneIdentifier": reference("MesosSubnet"),
                    "Tags": [{ "Key": "Name", "Value": "MesosFollower", "PropagateAtLaunch": true }],
                }
            }),
        );
        Ok(d)
    }
}
