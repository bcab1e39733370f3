//! Dependency graph representation for wave execution.
//!
//! This module provides a directed graph over operation ids, with both forward
//! (dependency) and reverse (dependent) edges, and Kahn-style leveling into waves.

use std::collections::{HashMap, HashSet, VecDeque};

/// A directed graph representing operation dependencies.
///
/// The graph maintains both forward edges (dependencies) and reverse edges (dependents)
/// for efficient traversal in both directions. This is crucial for:
/// - Leveling operations into waves
/// - Propagating failures to dependent operations
///
/// Nodes remember their insertion order so that waves list ids in request order.
///
/// # Examples
///
/// ```ignore
/// use batch_toolkit::batch::DependencyGraph;
///
/// let mut graph = DependencyGraph::new();
/// graph.add_node("a");
/// graph.add_node("b");
/// graph.add_dependency("b", "a"); // b depends on a
///
/// assert!(graph.get_dependencies("b").contains("a"));
/// assert_eq!(graph.topological_waves().unwrap(), vec![vec!["a"], vec!["b"]]);
/// ```
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Forward edges: id -> set of ids it depends on
    nodes: HashMap<String, HashSet<String>>,
    /// Reverse edges: id -> set of ids that depend on it
    reverse_edges: HashMap<String, HashSet<String>>,
    /// Node ids in insertion order
    order: Vec<String>,
}

impl DependencyGraph {
    /// Creates a new empty dependency graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            reverse_edges: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Adds a node to the graph without any dependencies.
    ///
    /// If the node already exists, this is a no-op.
    pub fn add_node(&mut self, id: &str) {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(id.to_string(), HashSet::new());
            self.order.push(id.to_string());
        }
        self.reverse_edges.entry(id.to_string()).or_default();
    }

    /// Adds a dependency edge: `id` depends on `depends_on`.
    ///
    /// Both nodes are created if missing.
    pub fn add_dependency(&mut self, id: &str, depends_on: &str) {
        self.add_node(id);
        self.add_node(depends_on);

        if let Some(deps) = self.nodes.get_mut(id) {
            deps.insert(depends_on.to_string());
        }
        if let Some(dependents) = self.reverse_edges.get_mut(depends_on) {
            dependents.insert(id.to_string());
        }
    }

    /// Returns true if the node exists.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns the set of ids the given node depends on.
    ///
    /// Returns an empty set if the node has no dependencies.
    pub fn get_dependencies(&self, id: &str) -> HashSet<String> {
        self.nodes.get(id).cloned().unwrap_or_default()
    }

    /// Dependencies of `id` sorted by insertion order.
    pub fn sorted_dependencies(&self, id: &str) -> Vec<String> {
        let deps = self.get_dependencies(id);
        self.order
            .iter()
            .filter(|node| deps.contains(*node))
            .cloned()
            .collect()
    }

    /// Returns the set of ids that depend on the given node.
    ///
    /// Returns an empty set if nothing depends on it.
    pub fn get_dependents(&self, id: &str) -> HashSet<String> {
        self.reverse_edges.get(id).cloned().unwrap_or_default()
    }

    /// Every node reachable through reverse edges from `id`, in insertion order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut reached = HashSet::new();
        let mut stack = vec![id.to_string()];

        while let Some(current) = stack.pop() {
            for dependent in self.get_dependents(&current) {
                if reached.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }

        self.order
            .iter()
            .filter(|node| reached.contains(*node))
            .cloned()
            .collect()
    }

    /// Returns the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Levels the graph into waves using Kahn's algorithm.
    ///
    /// Wave 0 holds every node without dependencies; a node lands in wave `k`
    /// when the deepest of its dependencies sits in wave `k - 1`. Each wave is
    /// listed in insertion order.
    ///
    /// Returns the ids that could not be ordered (members of a cycle or
    /// downstream of one) as the error.
    pub fn topological_waves(&self) -> Result<Vec<Vec<String>>, Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        for id in &queue {
            level.insert(*id, 0);
        }

        while let Some(id) = queue.pop_front() {
            let current = level.get(id).copied().unwrap_or(0);
            let Some(dependents) = self.reverse_edges.get(id) else {
                continue;
            };
            for dependent in dependents {
                let entry = level.entry(dependent.as_str()).or_insert(0);
                *entry = (*entry).max(current + 1);

                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        let unordered: Vec<String> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id.as_str()).is_some_and(|degree| *degree > 0))
            .cloned()
            .collect();
        if !unordered.is_empty() {
            return Err(unordered);
        }

        let wave_count = level.values().copied().max().map_or(0, |max| max + 1);
        let mut waves = vec![Vec::new(); wave_count];
        for id in &self.order {
            if let Some(wave) = level.get(id.as_str()) {
                waves[*wave].push(id.clone());
            }
        }

        Ok(waves)
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true if every wave holds exactly one operation.
pub fn is_linear_chain(waves: &[Vec<String>]) -> bool {
    !waves.is_empty() && waves.iter().all(|wave| wave.len() == 1)
}
