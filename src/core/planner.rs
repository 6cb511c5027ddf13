//! Plan generation: the execution order and each node's input wiring.
//!
//! Planning never touches the backend. Global sources are checked against
//! the configuration so obviously missing keys show up before a launch.

use super::config::GlobalConfig;
use super::graph::Graph;
use super::types::{value_to_string, Source};
use serde::Serialize;

/// What a run would do, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub profile: String,
    pub steps: Vec<PlannedStep>,
}

/// One node of the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub node: String,
    pub kind: StepKind,
    pub depends_on: Vec<String>,
    pub inputs: Vec<PlannedInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Template,
    Action,
}

/// One declared input and where its value would come from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedInput {
    pub name: String,
    pub sources: Vec<String>,
    pub default: Option<String>,

    /// Set when a global source already has a value and wins over later sources
    pub from_config: Option<String>,

    /// No global value, no upstream or image source, and no default
    pub unresolvable: bool,
}

/// Build the plan for a graph under a configuration.
pub fn plan(graph: &Graph, config: &GlobalConfig) -> ExecutionPlan {
    let steps = graph
        .iter()
        .map(|node| {
            let spec = node.spec();
            let mut inputs: Vec<PlannedInput> = spec
                .inputs
                .iter()
                .map(|(name, sources)| {
                    let default = spec.defaults.get(name);
                    plan_input(name, sources, default, config)
                })
                .collect();
            for (name, default) in &spec.defaults {
                if !spec.inputs.contains_key(name) {
                    inputs.push(plan_input(name, &[], Some(default), config));
                }
            }
            PlannedStep {
                node: node.name().to_string(),
                kind: if node.is_template() {
                    StepKind::Template
                } else {
                    StepKind::Action
                },
                depends_on: graph.dependencies(node.name()).to_vec(),
                inputs,
            }
        })
        .collect();

    ExecutionPlan {
        profile: config.profile().to_string(),
        steps,
    }
}

fn plan_input(
    name: &str,
    sources: &[Source],
    default: Option<&super::types::Value>,
    config: &GlobalConfig,
) -> PlannedInput {
    // Only the leading global sources can be decided without running anything.
    let mut from_config = None;
    for source in sources {
        match source {
            Source::Global { key } => {
                if let Some(value) = config.get(key) {
                    from_config = Some(format!("{} = {}", source, value_to_string(value)));
                    break;
                }
            }
            _ => break,
        }
    }
    let only_globals = sources.iter().all(|s| matches!(s, Source::Global { .. }));

    PlannedInput {
        name: name.to_string(),
        sources: sources.iter().map(ToString::to_string).collect(),
        default: default.map(|v| {
            if v.is_null() {
                "(none)".to_string()
            } else {
                value_to_string(v)
            }
        }),
        unresolvable: from_config.is_none() && only_globals && default.is_none(),
        from_config,
    }
}

impl ExecutionPlan {
    /// Nodes whose inputs cannot resolve from the configuration alone.
    pub fn unresolvable(&self) -> Vec<(&str, &str)> {
        self.steps
            .iter()
            .flat_map(|step| {
                step.inputs
                    .iter()
                    .filter(|i| i.unresolvable)
                    .map(move |i| (step.node.as_str(), i.name.as_str()))
            })
            .collect()
    }
}

/// Render the plan as pretty-printed JSON.
pub fn to_json(plan: &ExecutionPlan) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(plan)
}

/// Render the plan as the text the CLI prints.
pub fn describe(plan: &ExecutionPlan) -> String {
    let mut out = format!("Plan for profile '{}' ({} nodes)\n", plan.profile, plan.steps.len());
    for (i, step) in plan.steps.iter().enumerate() {
        let kind = match step.kind {
            StepKind::Template => "template",
            StepKind::Action => "action",
        };
        out.push_str(&format!("\n{}. {} [{}]\n", i + 1, step.node, kind));
        if !step.depends_on.is_empty() {
            out.push_str(&format!("   after: {}\n", step.depends_on.join(", ")));
        }
        for input in &step.inputs {
            let mut line = format!("   {} <- ", input.name);
            if input.sources.is_empty() {
                line.push_str("(default only)");
            } else {
                line.push_str(&input.sources.join(" | "));
            }
            if let Some(default) = &input.default {
                line.push_str(&format!(" (default: {})", default));
            }
            if let Some(value) = &input.from_config {
                line.push_str(&format!("  [{}]", value));
            }
            if input.unresolvable {
                line.push_str("  [MISSING]");
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}
