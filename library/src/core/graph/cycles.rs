use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::{DependencyGraph, GraphEdge};

/// A closed path `nodes[0] → … → nodes[n-1] → nodes[0]` and the edges taken.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub nodes: Vec<String>,
    pub edges: Vec<GraphEdge>,
    /// True when no edge on the path is delayed through state.
    pub instantaneous: bool,
}

impl Cycle {
    /// `a -> b -> a`
    pub fn describe(&self) -> String {
        let mut parts: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        if let Some(first) = self.nodes.first() {
            parts.push(first);
        }
        parts.join(" -> ")
    }
}

struct Frame<'g> {
    node: &'g str,
    next_edge: usize,
}

impl DependencyGraph {
    /// Finds cycles by depth-first search, roots and edges in ascending order.
    ///
    /// The non-delayed subgraph is searched too, so every instantaneous cycle
    /// is reported even when it shares nodes with a legal feedback loop.
    pub fn detect_cycles(&self) -> Vec<Cycle> {
        let mut cycles = self.dfs_cycles(true);
        let mut seen: HashSet<BTreeSet<String>> = cycles
            .iter()
            .filter(|c| c.instantaneous)
            .map(|c| c.nodes.iter().cloned().collect())
            .collect();
        for cycle in self.dfs_cycles(false) {
            if seen.insert(cycle.nodes.iter().cloned().collect()) {
                cycles.push(cycle);
            }
        }
        cycles
    }

    pub fn has_instantaneous_cycle(&self) -> bool {
        self.detect_cycles().iter().any(|c| c.instantaneous)
    }

    fn dfs_cycles(&self, include_delayed: bool) -> Vec<Cycle> {
        let adj = self.adjacency(include_delayed);
        let mut visited: HashSet<&str> = HashSet::new();
        let mut cycles = Vec::new();

        for root in adj.keys().copied() {
            if visited.contains(root) {
                continue;
            }
            let mut stack = vec![Frame {
                node: root,
                next_edge: 0,
            }];
            // Position on the current path, per node.
            let mut on_path: HashMap<&str, usize> = HashMap::from([(root, 0)]);
            // `path_edges[i]` leads from `stack[i]` to `stack[i + 1]`.
            let mut path_edges: Vec<usize> = Vec::new();
            visited.insert(root);

            while let Some(top) = stack.last_mut() {
                let out = adj_edges(&adj, top.node);
                let Some(&edge_index) = out.get(top.next_edge) else {
                    on_path.remove(top.node);
                    stack.pop();
                    path_edges.pop();
                    continue;
                };
                top.next_edge += 1;

                let target = self.edges[edge_index].to.as_str();
                if let Some(&start) = on_path.get(target) {
                    cycles.push(self.extract_cycle(&stack, &path_edges, start, edge_index));
                } else if visited.insert(target) {
                    on_path.insert(target, stack.len());
                    path_edges.push(edge_index);
                    stack.push(Frame {
                        node: target,
                        next_edge: 0,
                    });
                }
            }
        }
        cycles
    }

    fn extract_cycle(
        &self,
        stack: &[Frame],
        path_edges: &[usize],
        start: usize,
        closing_edge: usize,
    ) -> Cycle {
        let nodes: Vec<String> = stack[start..].iter().map(|f| f.node.to_string()).collect();
        let edges: Vec<GraphEdge> = path_edges[start..]
            .iter()
            .chain(std::iter::once(&closing_edge))
            .map(|i| self.edges[*i].clone())
            .collect();
        let instantaneous = edges.iter().all(|e| !e.through_state);
        Cycle {
            nodes,
            edges,
            instantaneous,
        }
    }
}

fn adj_edges<'a>(adj: &'a BTreeMap<&str, Vec<usize>>, node: &str) -> &'a [usize] {
    adj.get(node).map(Vec::as_slice).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(blocks: &[(&str, bool)], connections: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (id, state) in blocks {
            g.add_block_node(id, *state).unwrap();
        }
        for (from, to) in connections {
            g.add_connection_edge(from, to).unwrap();
        }
        g
    }

    #[test]
    fn test_pure_cycle_is_instantaneous() {
        let g = graph(&[("a", false), ("b", false)], &[("a", "b"), ("b", "a")]);
        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].instantaneous);
        assert_eq!(cycles[0].nodes, vec!["a", "b"]);
        assert_eq!(cycles[0].describe(), "a -> b -> a");
    }

    #[test]
    fn test_feedback_through_state_is_legal() {
        let g = graph(&[("acc", true), ("gain", false)], &[("acc", "gain"), ("gain", "acc")]);
        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(!cycles[0].instantaneous);
        assert!(!g.has_instantaneous_cycle());
    }

    #[test]
    fn test_self_loop() {
        let g = graph(&[("a", false)], &[("a", "a")]);
        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].nodes, vec!["a"]);
        assert!(cycles[0].instantaneous);
    }

    #[test]
    fn test_illegal_cycle_next_to_legal_one_is_found() {
        // a(state) -> b -> a is legal; b <-> c is not.
        let g = graph(
            &[("a", true), ("b", false), ("c", false)],
            &[("a", "b"), ("b", "a"), ("b", "c"), ("c", "b")],
        );
        let instantaneous: Vec<Cycle> = g
            .detect_cycles()
            .into_iter()
            .filter(|c| c.instantaneous)
            .collect();
        assert_eq!(instantaneous.len(), 1);
        assert_eq!(instantaneous[0].nodes, vec!["b", "c"]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph(
            &[("a", false), ("b", false), ("c", false)],
            &[("a", "b"), ("a", "c"), ("b", "c")],
        );
        assert!(g.detect_cycles().is_empty());
    }
}
