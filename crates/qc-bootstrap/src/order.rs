//! # Order Builder
//!
//! Depth-first topological sort over the registered subset of the
//! dependency graph. O(names + edges).
//!
//! ## Determinism
//!
//! Roots are visited in the order given (registration order), dependencies in
//! the order they are configured. The same registrations therefore always
//! produce the same order.
//!
//! ## Unregistered Names
//!
//! A name for which `is_present` returns false is a no-op visit: it is not
//! emitted and its own dependencies are not followed. It still blocks its
//! dependents at readiness time, which is the driver's concern.

use std::collections::HashMap;

use crate::error::ConfigurationError;
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current recursion path.
    InProgress,
    /// Fully visited and emitted.
    Done,
}

struct Walker<'a, F> {
    graph: &'a DependencyGraph,
    is_present: F,
    marks: HashMap<&'a str, Mark>,
    path: Vec<&'a str>,
    output: Vec<String>,
}

impl<'a, F> Walker<'a, F>
where
    F: Fn(&str) -> bool,
{
    fn visit(&mut self, name: &'a str) -> Result<(), ConfigurationError> {
        if !(self.is_present)(name) {
            return Ok(());
        }

        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => return Err(self.cycle_through(name)),
            None => {}
        }

        self.marks.insert(name, Mark::InProgress);
        self.path.push(name);

        let graph = self.graph;
        for dep in graph.dependencies_of(name) {
            self.visit(dep)?;
        }

        self.path.pop();
        self.marks.insert(name, Mark::Done);
        self.output.push(name.to_string());
        Ok(())
    }

    /// Path segment from the first occurrence of `name`, closed with `name`.
    fn cycle_through(&self, name: &str) -> ConfigurationError {
        let start = self.path.iter().position(|n| *n == name).unwrap_or(0);
        let mut cycle: Vec<String> = self.path[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        ConfigurationError::DependencyCycle { cycle }
    }
}

/// Compute an initialization order covering exactly the present names
/// reachable from `roots`.
///
/// Every emitted name appears after all of its present dependencies.
///
/// # Errors
///
/// `DependencyCycle` if a name is reached again while still on the current
/// recursion path.
pub fn initialization_order<'a, R, F>(
    graph: &'a DependencyGraph,
    roots: R,
    is_present: F,
) -> Result<Vec<String>, ConfigurationError>
where
    R: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> bool,
{
    let mut walker = Walker {
        graph,
        is_present,
        marks: HashMap::new(),
        path: Vec::new(),
        output: Vec::new(),
    };

    for root in roots {
        walker.visit(root)?;
    }

    Ok(walker.output)
}
