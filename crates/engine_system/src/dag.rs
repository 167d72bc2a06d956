//! Generic dependency graph with topological ordering and level analysis.
//!
//! [`DagScheduler`] stores nodes of arbitrary data keyed by an ID, together
//! with "depends on" edges. It knows nothing about systems or worlds; the
//! stage runner builds one per plan.
//!
//! Nodes and edges keep insertion order, so every result is deterministic
//! for identical input.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

/// Errors from graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// An edge referenced a node that has not been added.
    #[error("unknown node {0}")]
    UnknownNode(String),
}

/// A dependency cycle, as a closed path: `cycle[0] == cycle[cycle.len() - 1]`.
///
/// Each element depends on the one after it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency cycle detected: {}", format_path(.cycle))]
pub struct CycleError<K: Debug> {
    /// The closed cycle path.
    pub cycle: Vec<K>,
}

fn format_path<K: Debug>(path: &[K]) -> String {
    path.iter()
        .map(|k| format!("{k:?}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A node in the graph.
#[derive(Debug, Clone)]
pub struct DagNode<K, D> {
    /// The node's payload.
    pub data: D,
    /// Nodes this node depends on (must come before it).
    pub dependencies: IndexSet<K>,
    /// Nodes that depend on this node.
    pub dependents: IndexSet<K>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    Visiting,
    Visited,
}

/// A dependency graph over arbitrary node IDs.
#[derive(Debug, Clone)]
pub struct DagScheduler<K, D> {
    nodes: IndexMap<K, DagNode<K, D>>,
}

impl<K, D> DagScheduler<K, D>
where
    K: Clone + Eq + Hash + Debug,
{
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node. If `id` already exists its data is replaced, its edges
    /// are kept, and `false` is returned.
    pub fn add_node(&mut self, id: K, data: D) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.data = data;
            return false;
        }
        self.nodes.insert(
            id,
            DagNode {
                data,
                dependencies: IndexSet::new(),
                dependents: IndexSet::new(),
            },
        );
        true
    }

    /// Record that `dependent` requires `dependency` to come first.
    ///
    /// A node may depend on itself; that self-loop is reported as a cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownNode`] if either node is missing.
    pub fn add_dependency(&mut self, dependent: &K, dependency: &K) -> Result<(), SchedulerError> {
        for id in [dependent, dependency] {
            if !self.nodes.contains_key(id) {
                return Err(SchedulerError::UnknownNode(format!("{id:?}")));
            }
        }
        if let Some(node) = self.nodes.get_mut(dependent) {
            node.dependencies.insert(dependency.clone());
        }
        if let Some(node) = self.nodes.get_mut(dependency) {
            node.dependents.insert(dependent.clone());
        }
        Ok(())
    }

    /// Remove one edge. Returns `false` if it did not exist.
    pub fn remove_dependency(&mut self, dependent: &K, dependency: &K) -> bool {
        let removed = self
            .nodes
            .get_mut(dependent)
            .is_some_and(|node| node.dependencies.shift_remove(dependency));
        if removed && let Some(node) = self.nodes.get_mut(dependency) {
            node.dependents.shift_remove(dependent);
        }
        removed
    }

    /// Remove a node and every edge touching it. Returns `false` if absent.
    pub fn remove_node(&mut self, id: &K) -> bool {
        let Some(node) = self.nodes.shift_remove(id) else {
            return false;
        };
        for dependency in &node.dependencies {
            if let Some(other) = self.nodes.get_mut(dependency) {
                other.dependents.shift_remove(id);
            }
        }
        for dependent in &node.dependents {
            if let Some(other) = self.nodes.get_mut(dependent) {
                other.dependencies.shift_remove(id);
            }
        }
        true
    }

    /// Returns `true` if the node exists.
    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.nodes.contains_key(id)
    }

    /// Borrow a node.
    #[must_use]
    pub fn node(&self, id: &K) -> Option<&DagNode<K, D>> {
        self.nodes.get(id)
    }

    /// Borrow a node's data.
    #[must_use]
    pub fn data(&self, id: &K) -> Option<&D> {
        self.nodes.get(id).map(|node| &node.data)
    }

    /// Mutably borrow a node's data.
    pub fn data_mut(&mut self, id: &K) -> Option<&mut D> {
        self.nodes.get_mut(id).map(|node| &mut node.data)
    }

    /// Direct dependencies of a node.
    #[must_use]
    pub fn dependencies(&self, id: &K) -> Option<&IndexSet<K>> {
        self.nodes.get(id).map(|node| &node.dependencies)
    }

    /// Direct dependents of a node.
    #[must_use]
    pub fn dependents(&self, id: &K) -> Option<&IndexSet<K>> {
        self.nodes.get(id).map(|node| &node.dependents)
    }

    /// Every node reachable through dependency edges from `id`, nearest
    /// first. Does not include `id` unless it lies on a cycle.
    #[must_use]
    pub fn transitive_dependencies(&self, id: &K) -> Vec<K> {
        let mut seen: IndexSet<K> = IndexSet::new();
        let mut frontier: Vec<K> = self
            .dependencies(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for dep in frontier {
                if seen.insert(dep.clone())
                    && let Some(deps) = self.dependencies(&dep)
                {
                    next.extend(deps.iter().cloned());
                }
            }
            frontier = next;
        }
        seen.into_iter().collect()
    }

    /// Node IDs in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Nodes with no dependencies.
    #[must_use]
    pub fn roots(&self) -> Vec<K> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.dependencies.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Nodes nothing depends on.
    #[must_use]
    pub fn leaves(&self) -> Vec<K> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.dependents.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Order the nodes so that every dependency precedes its dependents.
    ///
    /// # Errors
    ///
    /// Returns the first cycle found as a [`CycleError`].
    pub fn topological_sort(&self) -> Result<Vec<K>, CycleError<K>> {
        let mut sorted = Vec::with_capacity(self.nodes.len());
        match self.depth_first(Some(&mut sorted)) {
            Some(cycle) => {
                warn!(cycle = %format_path(&cycle), "topological sort rejected cyclic graph");
                Err(CycleError { cycle })
            }
            None => Ok(sorted),
        }
    }

    /// Find a cycle without changing the graph. Returns an empty vector when
    /// the graph is acyclic; a self-loop on `A` returns `[A, A]`.
    #[must_use]
    pub fn detect_cycle(&self) -> Vec<K> {
        self.depth_first(None).unwrap_or_default()
    }

    /// Longest-path depth of every node: 0 for nodes without dependencies,
    /// otherwise one more than the deepest dependency.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] for cyclic graphs, where depth is undefined.
    pub fn node_levels(&self) -> Result<IndexMap<K, usize>, CycleError<K>> {
        let order = self.topological_sort()?;
        let mut levels: IndexMap<K, usize> = IndexMap::with_capacity(order.len());
        // Dependencies come first in `order`, so each lookup is memoized.
        for id in order {
            let level = self.nodes[&id]
                .dependencies
                .iter()
                .filter_map(|dep| levels.get(dep))
                .map(|&l| l + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id, level);
        }
        // Report in insertion order.
        Ok(self
            .nodes
            .keys()
            .filter_map(|id| levels.get(id).map(|&l| (id.clone(), l)))
            .collect())
    }

    /// Group nodes into batches by level. Batch `n` only depends on batches
    /// before it, and no two nodes in a batch have an edge between them.
    /// Within a batch, nodes keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] for cyclic graphs.
    pub fn analyze_parallel_batches(&self) -> Result<Vec<Vec<K>>, CycleError<K>> {
        let levels = self.node_levels()?;
        let depth = levels.values().copied().max().map_or(0, |max| max + 1);
        let mut batches: Vec<Vec<K>> = vec![Vec::new(); depth];
        for (id, level) in levels {
            batches[level].push(id);
        }
        Ok(batches)
    }

    // Depth-first walk over every node in insertion order, visiting
    // dependencies before the node itself. Pushes post-order into `sorted`
    // when given. Returns the closed cycle on the first back edge.
    fn depth_first(&self, mut sorted: Option<&mut Vec<K>>) -> Option<Vec<K>> {
        let mut state: HashMap<&K, Visit> = self
            .nodes
            .keys()
            .map(|k| (k, Visit::Unvisited))
            .collect();
        let mut path: Vec<&K> = Vec::new();

        for root in self.nodes.keys() {
            if state[root] != Visit::Unvisited {
                continue;
            }
            // Explicit stack of (node, next dependency to explore).
            let mut stack: Vec<(&K, usize)> = vec![(root, 0)];
            state.insert(root, Visit::Visiting);
            path.push(root);

            while let Some((id, cursor)) = stack.last_mut() {
                let deps = &self.nodes[*id].dependencies;
                if let Some(dep) = deps.get_index(*cursor) {
                    *cursor += 1;
                    match state.get(dep).copied().unwrap_or(Visit::Visited) {
                        Visit::Unvisited => {
                            state.insert(dep, Visit::Visiting);
                            path.push(dep);
                            stack.push((dep, 0));
                        }
                        Visit::Visiting => {
                            let start = path.iter().position(|k| *k == dep).unwrap_or(0);
                            let mut cycle: Vec<K> =
                                path[start..].iter().map(|k| (*k).clone()).collect();
                            cycle.push(dep.clone());
                            return Some(cycle);
                        }
                        Visit::Visited => {}
                    }
                } else {
                    let id = *id;
                    stack.pop();
                    path.pop();
                    state.insert(id, Visit::Visited);
                    if let Some(out) = sorted.as_deref_mut() {
                        out.push(id.clone());
                    }
                }
            }
        }
        None
    }
}

impl<K, D> Default for DagScheduler<K, D>
where
    K: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> DagScheduler<&'static str, ()> {
        let mut dag = DagScheduler::new();
        for id in ["A", "B", "C", "D"] {
            dag.add_node(id, ());
        }
        dag.add_dependency(&"B", &"A").unwrap();
        dag.add_dependency(&"C", &"A").unwrap();
        dag.add_dependency(&"D", &"B").unwrap();
        dag.add_dependency(&"D", &"C").unwrap();
        dag
    }

    fn position(order: &[&str], id: &str) -> usize {
        order.iter().position(|k| *k == id).unwrap()
    }

    #[test]
    fn test_diamond_sort_respects_edges() {
        let order = diamond().topological_sort().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "A") < position(&order, "B"));
        assert!(position(&order, "A") < position(&order, "C"));
        assert!(position(&order, "B") < position(&order, "D"));
        assert!(position(&order, "C") < position(&order, "D"));
    }

    #[test]
    fn test_diamond_batches() {
        let batches = diamond().analyze_parallel_batches().unwrap();
        assert_eq!(batches, vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn test_batches_use_longest_path() {
        let mut dag = diamond();
        dag.add_node("E", ());
        // E depends on A directly and on D, so it lands after D.
        dag.add_dependency(&"E", &"A").unwrap();
        dag.add_dependency(&"E", &"D").unwrap();
        let levels = dag.node_levels().unwrap();
        assert_eq!(levels[&"E"], 3);
        assert_eq!(dag.analyze_parallel_batches().unwrap().len(), 4);
    }

    #[test]
    fn test_batches_have_no_internal_edges() {
        let dag = diamond();
        for batch in dag.analyze_parallel_batches().unwrap() {
            for a in &batch {
                for b in &batch {
                    assert!(!dag.dependencies(a).unwrap().contains(b));
                }
            }
        }
    }

    #[test]
    fn test_three_node_cycle() {
        let mut dag: DagScheduler<&str, ()> = DagScheduler::new();
        for id in ["A", "B", "C"] {
            dag.add_node(id, ());
        }
        dag.add_dependency(&"A", &"B").unwrap();
        dag.add_dependency(&"B", &"C").unwrap();
        dag.add_dependency(&"C", &"A").unwrap();

        let cycle = dag.detect_cycle();
        assert_eq!(cycle, vec!["A", "B", "C", "A"]);
        assert_eq!(cycle.first(), cycle.last());

        let err = dag.topological_sort().unwrap_err();
        assert_eq!(err.cycle.first(), err.cycle.last());
        assert!(dag.analyze_parallel_batches().is_err());
        // Detection does not mutate the graph.
        assert_eq!(dag.len(), 3);
        assert_eq!(dag.detect_cycle(), cycle);
    }

    #[test]
    fn test_self_loop() {
        let mut dag: DagScheduler<&str, ()> = DagScheduler::new();
        dag.add_node("A", ());
        dag.add_dependency(&"A", &"A").unwrap();
        assert_eq!(dag.detect_cycle(), vec!["A", "A"]);
    }

    #[test]
    fn test_acyclic_detect_is_empty() {
        assert!(diamond().detect_cycle().is_empty());
    }

    #[test]
    fn test_cycle_error_message() {
        let err = CycleError { cycle: vec!["A", "B", "A"] };
        assert_eq!(err.to_string(), r#"dependency cycle detected: "A" -> "B" -> "A""#);
    }

    #[test]
    fn test_unknown_node_dependency() {
        let mut dag: DagScheduler<&str, ()> = DagScheduler::new();
        dag.add_node("A", ());
        assert_eq!(
            dag.add_dependency(&"A", &"missing"),
            Err(SchedulerError::UnknownNode(r#""missing""#.to_string()))
        );
        assert!(dag.dependencies(&"A").unwrap().is_empty());
    }

    #[test]
    fn test_add_node_twice_keeps_edges() {
        let mut dag: DagScheduler<&str, u32> = DagScheduler::new();
        dag.add_node("A", 1);
        dag.add_node("B", 2);
        dag.add_dependency(&"B", &"A").unwrap();
        assert!(!dag.add_node("B", 20));
        assert_eq!(dag.data(&"B"), Some(&20));
        assert!(dag.dependencies(&"B").unwrap().contains(&"A"));
    }

    #[test]
    fn test_remove_node_scrubs_edges() {
        let mut dag = diamond();
        assert!(dag.remove_node(&"B"));
        assert!(!dag.remove_node(&"B"));
        assert!(!dag.dependents(&"A").unwrap().contains(&"B"));
        assert!(!dag.dependencies(&"D").unwrap().contains(&"B"));
        for id in dag.node_ids() {
            let node = dag.node(id).unwrap();
            assert!(node.dependencies.iter().all(|d| dag.contains(d)));
            assert!(node.dependents.iter().all(|d| dag.contains(d)));
        }
        assert_eq!(
            dag.analyze_parallel_batches().unwrap(),
            vec![vec!["A"], vec!["C"], vec!["D"]]
        );
    }

    #[test]
    fn test_remove_dependency() {
        let mut dag = diamond();
        assert!(dag.remove_dependency(&"D", &"C"));
        assert!(!dag.remove_dependency(&"D", &"C"));
        assert!(!dag.dependents(&"C").unwrap().contains(&"D"));
        assert_eq!(dag.leaves(), vec!["C", "D"]);
    }

    #[test]
    fn test_roots_leaves_and_transitive() {
        let dag = diamond();
        assert_eq!(dag.roots(), vec!["A"]);
        assert_eq!(dag.leaves(), vec!["D"]);
        assert_eq!(dag.transitive_dependencies(&"D"), vec!["B", "C", "A"]);
        assert!(dag.transitive_dependencies(&"A").is_empty());
    }

    #[test]
    fn test_data_mut_and_clear() {
        let mut dag: DagScheduler<u32, String> = DagScheduler::new();
        dag.add_node(1, "one".to_string());
        dag.data_mut(&1).unwrap().push('!');
        assert_eq!(dag.data(&1).map(String::as_str), Some("one!"));
        dag.clear();
        assert!(dag.is_empty());
    }

    #[test]
    fn test_empty_graph() {
        let dag: DagScheduler<u32, ()> = DagScheduler::new();
        assert!(dag.topological_sort().unwrap().is_empty());
        assert!(dag.analyze_parallel_batches().unwrap().is_empty());
    }
}
