//! # Dependency Graph
//!
//! Static mapping from subsystem name to the ordered set of names it depends
//! on. Built once per orchestrator and validated on construction, so every
//! `DependencyGraph` value is acyclic.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigurationError;
use crate::order;

/// Validated, acyclic dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build and validate a graph.
    ///
    /// Duplicate dependencies are collapsed, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// - `EmptyName` if any name is empty
    /// - `DependencyCycle` if the graph has a cycle (self-dependencies included)
    pub fn new<I, N, D, S>(entries: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();

        for (name, deps) in entries {
            let name = name.into();
            if name.is_empty() {
                return Err(ConfigurationError::EmptyName);
            }

            let mut seen = HashSet::new();
            let mut list = Vec::new();
            for dep in deps {
                let dep = dep.into();
                if dep.is_empty() {
                    return Err(ConfigurationError::EmptyName);
                }
                if seen.insert(dep.clone()) {
                    list.push(dep);
                }
            }
            edges.insert(name, list);
        }

        let graph = Self { edges };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Configured dependencies of `name`, empty if it is not in the graph.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names that have an entry in the graph.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_edges_unchecked(edges: HashMap<String, Vec<String>>) -> Self {
        Self { edges }
    }

    fn check_acyclic(&self) -> Result<(), ConfigurationError> {
        // Sorted roots give a stable cycle report across runs
        let mut roots: Vec<&str> = self.names().collect();
        roots.sort_unstable();

        // Treat every name as present so traversal follows all edges
        order::initialization_order(self, roots, |_| true).map(|_| ())
    }
}
