//! Dependency graph over the variables of one set.
//!
//! Built once per activation from each variable's template references. An
//! edge A -> B means B's template references A. The graph does not defend
//! against cycles: the scheduler never starts a variable inside one, so such
//! variables stall. [`DependencyGraph::is_cyclic`] exists purely as an
//! activation-time diagnostic probe.

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Directed dependency graph keyed by variable index.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: DiGraphMap<u32, ()>,
}

impl DependencyGraph {
    /// Build from each variable's referenced names.
    ///
    /// `dependencies[i]` holds the names referenced by `names[i]`. Edges are
    /// only added for references that resolve to a variable in `names`;
    /// unknown references are interpolation no-ops, not graph edges.
    /// Self-references are ignored.
    #[must_use]
    pub fn build(names: &[String], dependencies: &[BTreeSet<String>]) -> Self {
        let index_of: HashMap<&str, u32> = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index as u32))
            .collect();

        let mut inner = DiGraphMap::new();
        for index in 0..names.len() {
            inner.add_node(index as u32);
        }
        for (index, deps) in dependencies.iter().enumerate() {
            for dep in deps {
                if let Some(&from) = index_of.get(dep.as_str()) {
                    if from != index as u32 {
                        inner.add_edge(from, index as u32, ());
                    }
                }
            }
        }
        Self { inner }
    }

    /// Indices whose values `index` depends on.
    #[must_use]
    pub fn dependencies_of(&self, index: usize) -> Vec<usize> {
        self.inner
            .neighbors_directed(index as u32, Direction::Incoming)
            .map(|n| n as usize)
            .collect()
    }

    /// Indices that reference `index`.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.inner
            .neighbors_directed(index as u32, Direction::Outgoing)
            .map(|n| n as usize)
            .collect()
    }

    /// Indices with no dependencies inside the set.
    #[must_use]
    pub fn roots(&self) -> Vec<usize> {
        self.inner
            .nodes()
            .filter(|&n| {
                self.inner
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| n as usize)
            .collect()
    }

    /// Number of variables in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Diagnostic probe; a cyclic configuration stalls rather than errors.
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(defs: &[(&str, &[&str])]) -> DependencyGraph {
        let names: Vec<String> = defs.iter().map(|(n, _)| (*n).to_string()).collect();
        let deps: Vec<BTreeSet<String>> = defs
            .iter()
            .map(|(_, d)| d.iter().map(|s| (*s).to_string()).collect())
            .collect();
        DependencyGraph::build(&names, &deps)
    }

    #[test]
    fn chain_edges_and_roots() {
        let g = graph(&[("A", &[]), ("B", &["A"]), ("C", &["A", "B"])]);
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.roots(), vec![0]);

        let mut deps = g.dependencies_of(2);
        deps.sort_unstable();
        assert_eq!(deps, vec![0, 1]);

        let mut dependents = g.dependents_of(0);
        dependents.sort_unstable();
        assert_eq!(dependents, vec![1, 2]);
    }

    #[test]
    fn unknown_references_add_no_edges() {
        let g = graph(&[("A", &["missing"]), ("B", &["A", "ghost"])]);
        assert_eq!(g.edge_count(), 1);
        let mut roots = g.roots();
        roots.sort_unstable();
        assert_eq!(roots, vec![0]);
    }

    #[test]
    fn self_reference_is_ignored() {
        let g = graph(&[("A", &["A"])]);
        assert_eq!(g.edge_count(), 0);
        assert!(!g.is_cyclic());
    }

    #[test]
    fn cycle_probe_reports_cycles() {
        let g = graph(&[("A", &["B"]), ("B", &["A"])]);
        assert!(g.is_cyclic());
    }
}
