//! Core types: input sources, node specs, descriptors, backend records, run reports.
//!
//! All persisted types derive Serialize/Deserialize so backend state can be
//! round-tripped through YAML.

use super::error::{ExecutionFailure, GraphError, NodeError, RunError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A configuration or output value.
pub type Value = serde_yaml_ng::Value;

/// Outputs produced by a node, keyed by output name.
pub type Outputs = IndexMap<String, Value>;

/// Flat string outputs as reported by a provisioning backend.
pub type StackOutputs = IndexMap<String, String>;

/// Namespace that selects the global configuration in a source string.
pub const GLOBAL_NAMESPACE: &str = "global";

// ============================================================================
// Input sources
// ============================================================================

/// Where an input value may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A key in the global configuration.
    Global { key: String },

    /// An output of an upstream node.
    Node { node: String, key: String },

    /// The most recent machine image matching a tag filter.
    LatestImage(ImageFilter),
}

impl Source {
    pub fn global(key: impl Into<String>) -> Self {
        Self::Global { key: key.into() }
    }

    pub fn node(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            key: key.into(),
        }
    }

    pub fn latest_image(filter: ImageFilter) -> Self {
        Self::LatestImage(filter)
    }

    /// Upstream node this source reads from, if any.
    pub fn upstream(&self) -> Option<&str> {
        match self {
            Self::Node { node, .. } => Some(node),
            _ => None,
        }
    }
}

impl FromStr for Source {
    type Err = GraphError;

    /// Parse `namespace:key`, where `global` selects the configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, key) = s
            .split_once(':')
            .filter(|(ns, key)| !ns.is_empty() && !key.is_empty())
            .ok_or_else(|| GraphError::InvalidSource(s.to_string()))?;
        if namespace == GLOBAL_NAMESPACE {
            Ok(Self::global(key))
        } else {
            Ok(Self::node(namespace, key))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global { key } => write!(f, "{}:{}", GLOBAL_NAMESPACE, key),
            Self::Node { node, key } => write!(f, "{}:{}", node, key),
            Self::LatestImage(filter) => write!(f, "latest-image{}", filter),
        }
    }
}

/// A tag filter value: either literal or read from the global configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Literal(String),
    Global(String),
}

/// Tag equality filter used to select machine images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    pub tags: IndexMap<String, FilterValue>,
}

impl ImageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .insert(key.into(), FilterValue::Literal(value.into()));
        self
    }

    pub fn tag_from_global(mut self, key: impl Into<String>, config_key: impl Into<String>) -> Self {
        self.tags
            .insert(key.into(), FilterValue::Global(config_key.into()));
        self
    }
}

impl fmt::Display for ImageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .tags
            .iter()
            .map(|(k, v)| match v {
                FilterValue::Literal(s) => format!("{}={}", k, s),
                FilterValue::Global(g) => format!("{}=global:{}", k, g),
            })
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

// ============================================================================
// Node specification
// ============================================================================

/// Declared inputs and defaults of a graph node.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub name: String,

    /// Ordered sources per logical input name
    pub inputs: IndexMap<String, Vec<Source>>,

    /// Fallback values; `Value::Null` declares an optional input
    pub defaults: IndexMap<String, Value>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare an input with its sources in priority order.
    pub fn input<I>(mut self, name: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = Source>,
    {
        self.inputs
            .insert(name.into(), sources.into_iter().collect());
        self
    }

    /// Declare an input from `namespace:key` strings.
    pub fn input_from(mut self, name: &str, sources: &[&str]) -> Result<Self, GraphError> {
        let parsed = sources
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Source>, _>>()?;
        self.inputs.insert(name.to_string(), parsed);
        Ok(self)
    }

    pub fn default_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Mark an input optional: it resolves to no value when every source is absent.
    pub fn optional(self, name: impl Into<String>) -> Self {
        self.default_value(name, Value::Null)
    }

    /// Upstream nodes referenced by any input, in declaration order, deduplicated.
    pub fn upstream(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for source in self.inputs.values().flatten() {
            if let Some(up) = source.upstream() {
                if !seen.contains(&up) {
                    seen.push(up);
                }
            }
        }
        seen
    }
}

// ============================================================================
// Resolved inputs
// ============================================================================

/// Concrete input values for one node. `Value::Null` means "no value".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    pub values: IndexMap<String, Value>,
}

impl ResolvedInputs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Scalar input rendered as text.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(value_to_string)
    }

    /// Scalar input that must be present.
    pub fn require(&self, name: &str) -> Result<String, ExecutionFailure> {
        self.text(name)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExecutionFailure::InvalidInput {
                input: name.to_string(),
                reason: "no value".to_string(),
            })
    }

    /// Tag map input; an absent input yields no tags.
    pub fn tags(&self, name: &str) -> Result<IndexMap<String, String>, ExecutionFailure> {
        match self.get(name) {
            None => Ok(IndexMap::new()),
            Some(Value::Mapping(map)) => Ok(map
                .iter()
                .map(|(k, v)| (value_to_string(k), value_to_string(v)))
                .collect()),
            Some(other) => Err(ExecutionFailure::InvalidInput {
                input: name.to_string(),
                reason: format!("expected a tag mapping, got {}", value_to_string(other)),
            }),
        }
    }
}

// ============================================================================
// Descriptors and backend records
// ============================================================================

/// Structured payload handed to the provisioning backend's apply operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Backend-side stack name
    pub stack_name: String,

    /// Template parameters
    #[serde(default)]
    pub parameters: IndexMap<String, String>,

    /// Logical resources keyed by logical id
    #[serde(default)]
    pub resources: IndexMap<String, serde_json::Value>,

    /// Declared outputs
    #[serde(default)]
    pub outputs: IndexMap<String, OutputValue>,

    /// Stack-level tags
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

/// How a declared output is computed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputValue {
    /// A fixed value
    Literal(String),
    /// Physical id of a logical resource
    Ref(String),
    /// Attribute of a logical resource
    Attr { resource: String, attribute: String },
}

/// A machine image known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub id: String,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

/// A directly-managed resource listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingResource {
    pub id: String,
    pub kind: String,
    pub name: String,

    /// Stable identity marker attached at creation
    #[serde(default)]
    pub marker: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// Desired state of a directly-managed resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub name: String,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

// ============================================================================
// Run policy and report
// ============================================================================

/// What to do with already-executed nodes when a run fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RollbackPolicy {
    /// Leave provisioned resources in place
    #[default]
    Retain,
    /// Tear down completed nodes in reverse order
    Teardown,
}

impl fmt::Display for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// A node and the error it stopped with.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node: String,
    pub error: NodeError,
}

/// Result of driving a graph to completion or to its first failure.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Planned topological order
    pub order: Vec<String>,

    /// Nodes that executed successfully, in execution order
    pub completed: Vec<String>,

    /// Resolved inputs per executed node
    pub inputs: IndexMap<String, ResolvedInputs>,

    /// Outputs per executed node
    pub outputs: IndexMap<String, Outputs>,

    /// The failure that stopped the run
    pub failure: Option<NodeFailure>,

    /// Nodes never attempted because the run stopped
    pub skipped: Vec<String>,

    /// Nodes torn down under `RollbackPolicy::Teardown`
    pub torn_down: Vec<String>,

    /// Teardown errors; these never replace `failure`
    pub teardown_errors: Vec<NodeFailure>,

    pub duration: std::time::Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Collapse into the per-node outputs or the stopping error.
    pub fn into_result(self) -> Result<IndexMap<String, Outputs>, RunError> {
        match self.failure {
            None => Ok(self.outputs),
            Some(NodeFailure { node, error }) => Err(RunError {
                node,
                completed: self.completed,
                error,
            }),
        }
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Render a scalar value as text. Null renders empty.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Convert backend string outputs into node outputs.
pub fn outputs_from_stack(stack: StackOutputs) -> Outputs {
    stack
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_source_parse_global() {
        let s: Source = "global:Region".parse().unwrap();
        assert_eq!(s, Source::global("Region"));
        assert_eq!(s.upstream(), None);
    }

    #[test]
    fn test_types_source_parse_node() {
        let s: Source = "VPC:VpcId".parse().unwrap();
        assert_eq!(s, Source::node("VPC", "VpcId"));
        assert_eq!(s.upstream(), Some("VPC"));
        assert_eq!(s.to_string(), "VPC:VpcId");
    }

    #[test]
    fn test_types_source_parse_invalid() {
        assert!("VpcId".parse::<Source>().is_err());
        assert!(":VpcId".parse::<Source>().is_err());
        assert!("VPC:".parse::<Source>().is_err());
    }

    #[test]
    fn test_types_spec_upstream_dedup() {
        let spec = NodeSpec::new("follower")
            .input("VpcId", [Source::global("VpcId"), Source::node("VPC", "VpcId")])
            .input("Subnet", [Source::node("VPC", "MesosSubnet")])
            .input("Zone", [Source::node("Zone", "PrivateHostedZoneId")]);
        assert_eq!(spec.upstream(), vec!["VPC", "Zone"]);
    }

    #[test]
    fn test_types_spec_input_from_strings() {
        let spec = NodeSpec::new("zone")
            .input_from("VpcId", &["global:VpcId", "VPC:VpcId"])
            .unwrap();
        assert_eq!(
            spec.inputs["VpcId"],
            vec![Source::global("VpcId"), Source::node("VPC", "VpcId")]
        );
    }

    #[test]
    fn test_types_resolved_inputs_null_is_absent() {
        let mut inputs = ResolvedInputs::default();
        inputs.values.insert("SpotPrice".into(), Value::Null);
        inputs.values.insert("NumFollowers".into(), Value::from(3));
        assert!(inputs.get("SpotPrice").is_none());
        assert_eq!(inputs.text("NumFollowers").as_deref(), Some("3"));
        assert!(inputs.require("SpotPrice").is_err());
    }

    #[test]
    fn test_types_resolved_inputs_tags() {
        let mut map = serde_yaml_ng::Mapping::new();
        map.insert("Project".into(), "geo".into());
        let mut inputs = ResolvedInputs::default();
        inputs.values.insert("Tags".into(), Value::Mapping(map));
        inputs.values.insert("Bad".into(), Value::from("x"));
        let tags = inputs.tags("Tags").unwrap();
        assert_eq!(tags["Project"], "geo");
        assert!(inputs.tags("Missing").unwrap().is_empty());
        assert!(inputs.tags("Bad").is_err());
    }

    #[test]
    fn test_types_image_filter_display() {
        let f = ImageFilter::new()
            .tag("Name", "mesos-leader")
            .tag_from_global("StackType", "StackType");
        assert_eq!(f.to_string(), "[Name=mesos-leader, StackType=global:StackType]");
    }

    #[test]
    fn test_types_descriptor_roundtrip() {
        let mut d = ResourceDescriptor {
            stack_name: "accumulo-VPC".into(),
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
            tags: IndexMap::new(),
        };
        d.outputs
            .insert("VpcId".into(), OutputValue::Ref("GeoTrellisSparkVPC".into()));
        let yaml = serde_yaml_ng::to_string(&d).unwrap();
        let back: ResourceDescriptor = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_types_value_to_string() {
        assert_eq!(value_to_string(&Value::from("hello")), "hello");
        assert_eq!(value_to_string(&Value::Bool(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "");
    }

    #[test]
    fn test_types_rollback_policy_default() {
        assert_eq!(RollbackPolicy::default(), RollbackPolicy::Retain);
        assert_eq!(RollbackPolicy::Teardown.to_string(), "teardown");
    }
}
