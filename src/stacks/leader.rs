//! Mesos leader stack: security group, leader instance, private DNS records.

use super::{
    descriptor, name_tag, office_cidr, port_rules, reference, validate_instance_type,
    vpc_internal_rule, MachineType, ALLOW_ALL_CIDR, HOSTED_ZONE, LEADER, VPC,
};
use crate::backend::ProvisioningBackend;
use crate::core::error::ExecutionFailure;
use crate::core::node::{Node, Template};
use crate::core::types::{NodeSpec, OutputValue, ResolvedInputs, ResourceDescriptor, Source, Value};
use serde_json::{json, Value as Json};

/// Ports open to the office CIDR.
pub const LEADER_PORTS: &[u16] = &[
    22,    // SSH
    1723,  // PPTPD
    2181,  // Zookeeper
    4040,  // Spark
    5050,  // Mesos
    8080,  // Marathon
    8081,  // Graphite Web
    8090,  // Grafana
    9200,  // ElasticSearch
    50070, // HDFS
    50095, // Accumulo
];

/// Private DNS names pointing at the leader.
pub const SERVICE_RECORDS: &[(&str, &str)] = &[
    ("dnsZookeeper", "zookeeper"),
    ("dnsMesosLeader", "mesos-leader"),
    ("dnsNameNode", "namenode"),
    ("dnsAccumulo", "accumulo-leader"),
    ("dnsMonitoring", "monitoring"),
];

pub const SERVICE_DOMAIN: &str = "service.geotrellis-spark.internal.";

pub fn node() -> Node {
    let spec = NodeSpec::new(LEADER)
        .input("NameSpace", [Source::global("NameSpace")])
        .input("Tags", [Source::global("Tags")])
        .input("StackType", [Source::global("StackType")])
        .input("KeyName", [Source::global("KeyName")])
        .input("IPAccess", [Source::global("IPAccess")])
        .input("Region", [Source::global("Region")])
        .input("PrivateHostedZoneId", [Source::node(HOSTED_ZONE, "PrivateHostedZoneId")])
        .input(
            "MesosLeaderAMI",
            [
                Source::global("MesosLeaderAMI"),
                MachineType::MesosLeader.image_source(),
            ],
        )
        .input("MesosLeaderInstanceProfile", [Source::global("MesosLeaderInstanceProfile")])
        .input("MesosSubnet", [Source::node(VPC, "MesosSubnet")])
        .input("MesosLeaderInstanceType", [Source::global("MesosLeaderInstanceType")])
        .input("VpcId", [Source::global("VpcId"), Source::node(VPC, "VpcId")])
        .optional("NameSpace")
        .default_value("Tags", Value::Mapping(Default::default()))
        .default_value("MesosLeaderInstanceProfile", "MesosLeaderInstanceProfile")
        .default_value("MesosLeaderInstanceType", "r3.large");
    Node::template(spec, LeaderStack)
}

pub struct LeaderStack;

impl Template for LeaderStack {
    fn stack_name(&self, inputs: &ResolvedInputs) -> String {
        super::stack_name(inputs, LEADER)
    }

    fn descriptor(
        &self,
        inputs: &ResolvedInputs,
        _backend: &dyn ProvisioningBackend,
    ) -> Result<ResourceDescriptor, ExecutionFailure> {
        let instance_type = inputs.require("MesosLeaderInstanceType")?;
        validate_instance_type("MesosLeaderInstanceType", &instance_type)?;

        let mut d = descriptor(inputs, LEADER)?;
        let parameters = [
            ("VpcId", inputs.require("VpcId")?),
            ("KeyName", inputs.require("KeyName")?),
            ("OfficeCIDR", office_cidr(&inputs.require("IPAccess")?)),
            ("PrivateHostedZoneId", inputs.require("PrivateHostedZoneId")?),
            ("MesosLeaderAMI", inputs.require("MesosLeaderAMI")?),
            ("MesosLeaderInstanceProfile", inputs.require("MesosLeaderInstanceProfile")?),
            ("MesosLeaderInstanceType", instance_type),
            ("MesosSubnet", inputs.require("MesosSubnet")?),
        ];
        for (name, value) in parameters {
            d.parameters.insert(name.to_string(), value);
        }

        let mut ingress = port_rules(&reference("OfficeCIDR"), LEADER_PORTS);
        ingress.push(vpc_internal_rule());
        d.resources.insert(
            "sgMesosLeader".to_string(),
            json!({
                "Type": "AWS::EC2::SecurityGroup",
                "Properties": {
                    "GroupDescription": "Enables access to the MesosLeader",
                    "VpcId": reference("VpcId"),
                    "SecurityGroupIngress": ingress,
                    "SecurityGroupEgress": [{
                        "IpProtocol": "-1", "CidrIp": ALLOW_ALL_CIDR, "FromPort": 0, "ToPort": 65535
                    }],
                    "Tags": name_tag("sgMesosLeader"),
                }
            }),
        );

        d.resources.insert(
            "MesosLeader".to_string(),
            json!({
                "Type": "AWS::EC2::Instance",
                "Properties": {
                    "BlockDeviceMappings": [{ "DeviceName": "/dev/sda1", "Ebs": { "VolumeSize": "256" } }],
                    "InstanceType": reference("MesosLeaderInstanceType"),
                    "KeyName": reference("KeyName"),
                    "ImageId": reference("MesosLeaderAMI"),
                    "IamInstanceProfile": reference("MesosLeaderInstanceProfile"),
                    "NetworkInterfaces": [{
                        "Description": "ENI for MesosLeader",
                        "GroupSet": [reference("sgMesosLeader")],
                        "SubnetId": reference("MesosSubnet"),
                        "AssociatePublicIpAddress": true,
                        "DeviceIndex": 0,
                        "DeleteOnTermination": true,
                    }],
                    "UserDataFile": "cloud-config/leader.yml",
                    "Tags": name_tag("MesosLeader"),
                }
            }),
        );

        let records: Vec<Json> = SERVICE_RECORDS
            .iter()
            .map(|(logical, host)| {
                json!({
                    "Name": logical,
                    "RecordName": format!("{}.{}", host, SERVICE_DOMAIN),
                    "Type": "A",
                    "TTL": "60",
                    "ResourceRecords": [{ "Fn::GetAtt": ["MesosLeader", "PrivateIp"] }],
                })
            })
            .collect();
        d.resources.insert(
            "dnsPrivateRecords".to_string(),
            json!({
                "Type": "AWS::Route53::RecordSetGroup",
                "Properties": {
                    "HostedZoneId": reference("PrivateHostedZoneId"),
                    "RecordSets": records,
                }
            }),
        );

        d.outputs.insert(
            "LeaderInstanceId".to_string(),
            OutputValue::Ref("MesosLeader".to_string()),
        );
        d.outputs.insert(
            "LeaderPrivateIp".to_string(),
            OutputValue::Attr {
                resource: "MesosLeader".to_string(),
                attribute: "PrivateIp".to_string(),
            },
        );
        Ok(d)
    }
}
