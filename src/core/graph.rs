//! Dependency graph construction and topological ordering.
//!
//! Edges come from upstream-node sources in each node's input spec. The
//! order is computed once at construction using Kahn's algorithm with
//! alphabetical tie-breaking, so identical graphs always run identically.

use super::error::GraphError;
use super::node::Node;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};

/// A validated, acyclic set of nodes with a fixed execution order.
pub struct Graph {
    nodes: IndexMap<String, Node>,
    dependencies: IndexMap<String, Vec<String>>,
    order: Vec<String>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("order", &self.order)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl Graph {
    /// Validate the nodes and compute their order. Fails before anything runs.
    pub fn new(nodes: Vec<Node>) -> Result<Self, GraphError> {
        let mut by_name: IndexMap<String, Node> = IndexMap::new();
        for node in nodes {
            let name = node.name().to_string();
            if by_name.contains_key(&name) {
                return Err(GraphError::DuplicateNode(name));
            }
            by_name.insert(name, node);
        }

        let mut dependencies: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, node) in &by_name {
            let spec = node.spec();
            for (input, sources) in &spec.inputs {
                if sources.is_empty() && !spec.defaults.contains_key(input) {
                    return Err(GraphError::UnsatisfiableInput {
                        node: name.clone(),
                        input: input.clone(),
                    });
                }
                for upstream in sources.iter().filter_map(|s| s.upstream()) {
                    if !by_name.contains_key(upstream) {
                        return Err(GraphError::UnknownNode {
                            node: name.clone(),
                            input: input.clone(),
                            upstream: upstream.to_string(),
                        });
                    }
                }
            }
            let deps = spec.upstream().into_iter().map(String::from).collect();
            dependencies.insert(name.clone(), deps);
        }

        let order = topological_order(&dependencies)?;
        Ok(Self {
            nodes: by_name,
            dependencies,
            order,
        })
    }

    /// Execution order: every node after all of its dependencies.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Direct dependencies of a node, in declaration order.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }
}

/// Kahn's algorithm; the ready set is kept sorted so ties break alphabetically.
pub fn topological_order(
    dependencies: &IndexMap<String, Vec<String>>,
) -> Result<Vec<String>, GraphError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, deps) in dependencies {
        in_degree.insert(name, deps.len());
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(current) = ready.pop_first() {
        order.push(current.to_string());
        for dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() != dependencies.len() {
        return Err(GraphError::CyclicDependency {
            cycle: find_cycle(dependencies),
        });
    }
    Ok(order)
}

/// Walk dependency edges depth-first and return the first cycle found,
/// closed on its starting node (`a -> b -> a`).
fn find_cycle(dependencies: &IndexMap<String, Vec<String>>) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        dependencies: &'a IndexMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(name, Mark::OnStack);
        stack.push(name);
        for dep in dependencies.get(name).into_iter().flatten() {
            match marks.get(dep.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::OnStack => {
                    let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, dependencies, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let mut names: Vec<&str> = dependencies.keys().map(String::as_str).collect();
    names.sort_unstable();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for name in names {
        if marks.get(name).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(name, dependencies, &mut marks, &mut stack) {
                return cycle;
            }
        }
    }
    Vec::new()
}
