//! Plugin dependency graph.
//!
//! Nodes are kept in registration order, which is also the tie-break order of
//! the topological sort, so resolution is deterministic for a given sequence
//! of registrations.

use crate::error::{RuntimeError, RuntimeResult};
use crate::version::{Version, VersionConstraint};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

/// A dependency declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the plugin depended upon.
    pub name: String,

    /// Version constraint, e.g. `>=1.0.0,<2.0.0`. Empty matches anything.
    #[serde(default, rename = "version")]
    pub constraint: String,

    /// Optional dependencies never fail resolution when absent.
    #[serde(default)]
    pub optional: bool,
}

impl Dependency {
    pub fn required(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
            optional: true,
        }
    }
}

/// A node of the graph: one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginNode {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
}

/// Dependency graph over registered plugins.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<PluginNode>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, or replace the node of the same name in place.
    ///
    /// Nothing is resolved here; missing dependencies are reported by
    /// [`validate_dependencies`](Self::validate_dependencies).
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        dependencies: Vec<Dependency>,
    ) {
        let node = PluginNode {
            name: name.into(),
            version: version.into(),
            dependencies,
        };

        match self.index.get(&node.name) {
            Some(&i) => {
                debug!(plugin = %node.name, "Replacing graph node");
                self.nodes[i] = node;
            }
            None => {
                debug!(plugin = %node.name, "Adding graph node");
                self.index.insert(node.name.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    /// Remove a node. Edges pointing at it become dangling until re-added.
    pub fn remove_node(&mut self, name: &str) -> Option<PluginNode> {
        let i = self.index.remove(name)?;
        let node = self.nodes.remove(i);
        for (pos, n) in self.nodes.iter().enumerate().skip(i) {
            self.index.insert(n.name.clone(), pos);
        }
        Some(node)
    }

    pub fn node(&self, name: &str) -> Option<&PluginNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Plugins that declare a dependency (required or optional) on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&PluginNode> {
        self.nodes
            .iter()
            .filter(|n| n.name != name && n.dependencies.iter().any(|d| d.name == name))
            .collect()
    }

    /// Build the petgraph view: one node per plugin (same index as
    /// registration order) and one edge dependent -> dependency for every
    /// dependency whose target is present.
    fn edge_graph(&self) -> DiGraph<&str, bool> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        for node in &self.nodes {
            graph.add_node(node.name.as_str());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependencies {
                if let Some(&target) = self.index.get(&dep.name) {
                    graph.add_edge(NodeIndex::new(i), NodeIndex::new(target), dep.optional);
                }
            }
        }
        graph
    }

    /// Depth-first search for a cycle.
    ///
    /// Reports the participants of the first cycle found, in dependency order.
    /// A plugin that depends on itself is a one-node cycle.
    pub fn detect_circular_dependencies(&self) -> RuntimeResult<()> {
        let graph = self.edge_graph();
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        let outcome = depth_first_search(&graph, graph.node_indices(), |event| match event {
            DfsEvent::TreeEdge(from, to) => {
                parent.insert(to, from);
                Control::<Vec<NodeIndex>>::Continue
            }
            DfsEvent::BackEdge(from, to) => {
                // `to` is on the stack: walk the tree back from `from` to it.
                let mut path = vec![from];
                let mut current = from;
                while current != to {
                    match parent.get(&current) {
                        Some(&p) => {
                            current = p;
                            path.push(p);
                        }
                        None => break,
                    }
                }
                path.reverse();
                Control::Break(path)
            }
            _ => Control::Continue,
        });

        match outcome {
            Control::Break(path) => {
                let names: Vec<String> = path.iter().map(|&i| graph[i].to_string()).collect();
                Err(RuntimeError::CircularDependency(names))
            }
            _ => Ok(()),
        }
    }

    /// Order plugins so every dependency precedes its dependents.
    ///
    /// Ready plugins are emitted in registration order. Dependencies on absent
    /// plugins do not constrain the order.
    pub fn topological_sort(&self) -> RuntimeResult<Vec<String>> {
        self.detect_circular_dependencies()?;

        let graph = self.edge_graph();
        let mut pending: Vec<usize> = graph
            .node_indices()
            .map(|i| graph.neighbors_directed(i, Direction::Outgoing).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(self.nodes[i].name.clone());
            for dependent in graph.neighbors_directed(NodeIndex::new(i), Direction::Incoming) {
                let slot = &mut pending[dependent.index()];
                *slot -= 1;
                if *slot == 0 {
                    ready.push(Reverse(dependent.index()));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = pending
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(i, _)| self.nodes[i].name.clone())
                .collect();
            return Err(RuntimeError::CircularDependency(stuck));
        }

        Ok(order)
    }

    /// Check every node's dependencies.
    pub fn validate_dependencies(&self) -> RuntimeResult<()> {
        for node in &self.nodes {
            self.check_node(node)?;
        }
        Ok(())
    }

    /// Check one node's dependencies.
    pub fn validate_node(&self, name: &str) -> RuntimeResult<()> {
        let node = self
            .node(name)
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;
        self.check_node(node)
    }

    fn check_node(&self, node: &PluginNode) -> RuntimeResult<()> {
        for dep in &node.dependencies {
            let Some(target) = self.node(&dep.name) else {
                if dep.optional {
                    continue;
                }
                return Err(RuntimeError::MissingDependency {
                    plugin: node.name.clone(),
                    dependency: dep.name.clone(),
                });
            };

            let constraint = VersionConstraint::parse(&dep.constraint)?;
            if constraint.is_any() {
                continue;
            }

            let compatible = Version::parse(&target.version)
                .map(|v| constraint.matches(&v))
                .unwrap_or(false);
            if !compatible {
                return Err(RuntimeError::VersionMismatch {
                    plugin: node.name.clone(),
                    dependency: dep.name.clone(),
                    constraint: dep.constraint.clone(),
                    found: target.version.clone(),
                });
            }
        }
        Ok(())
    }

    /// Detect cycles, validate every edge, then sort.
    pub fn resolve_dependencies(&self) -> RuntimeResult<Vec<String>> {
        self.detect_circular_dependencies()?;
        self.validate_dependencies()?;
        self.topological_sort()
    }
}
