use std::collections::{BTreeMap, BTreeSet};

use super::DependencyGraph;
use crate::error::LibraryError;

impl DependencyGraph {
    /// Evaluation order over same-frame dependencies.
    ///
    /// Kahn's algorithm with the ready set kept sorted, so ties always break
    /// by ascending id and the order is reproducible across recompiles.
    pub fn topological_sort(&self) -> Result<Vec<String>, LibraryError> {
        if let Some(cycle) = self.detect_cycles().into_iter().find(|c| c.instantaneous) {
            return Err(LibraryError::graph(format!(
                "instantaneous cycle: {}",
                cycle.describe()
            )));
        }

        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.id.as_str(), n.dependencies.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(node.id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(LibraryError::graph(format!(
                "ordering failed: scheduled {} of {} nodes, unresolved: {}",
                order.len(),
                self.nodes.len(),
                stuck.join(", ")
            )));
        }

        Ok(order)
    }
}
