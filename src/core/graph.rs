//! Dependency graph over a set of assignments.
//!
//! Nodes live in a petgraph arena in input order, so `NodeIndex::new(i)` is
//! the i-th assignment. Edges point from a dependency to its dependent. The
//! traversals below keep their state in plain vectors indexed by node, which
//! keeps them reentrant: two graphs can be walked concurrently without sharing
//! anything.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::assignment::Assignment;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Validated dependency graph borrowed from a slice of assignments.
pub struct AssignmentGraph<'a> {
    assignments: &'a [Assignment],
    graph: DiGraph<usize, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> AssignmentGraph<'a> {
    /// Build the graph, rejecting duplicate step ids and dependencies on steps
    /// that are not part of the same set.
    pub fn build(assignments: &'a [Assignment]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(assignments.len(), assignments.len());
        let mut index = HashMap::with_capacity(assignments.len());

        for (position, assignment) in assignments.iter().enumerate() {
            let node = graph.add_node(position);
            if index.insert(assignment.step_id.as_str(), node).is_some() {
                return Err(Error::Validation(format!(
                    "duplicate step id: {}",
                    assignment.step_id
                )));
            }
        }

        for assignment in assignments {
            let dependent = index[assignment.step_id.as_str()];
            for dep in &assignment.depends_on {
                let dependency = index.get(dep.as_str()).ok_or_else(|| {
                    Error::Validation(format!(
                        "step {} depends on unknown step {}",
                        assignment.step_id, dep
                    ))
                })?;
                graph.update_edge(*dependency, dependent, ());
            }
        }

        Ok(Self {
            assignments,
            graph,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index.contains_key(step_id)
    }

    /// Step ids that directly depend on `step_id`.
    pub fn dependents(&self, step_id: &str) -> Vec<&'a str> {
        let Some(&node) = self.index.get(step_id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.assignments[self.graph[n]].step_id.as_str())
            .collect()
    }

    fn successors(&self) -> Vec<Vec<usize>> {
        (0..self.graph.node_count())
            .map(|i| {
                self.graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
                    .map(|n| n.index())
                    .collect()
            })
            .collect()
    }

    /// Depth-first search with an explicit stack. Returns the steps forming
    /// the first cycle found, in dependency order, or `None` for a DAG.
    pub fn find_cycle(&self) -> Option<Vec<&'a str>> {
        let successors = self.successors();
        let mut marks = vec![Mark::Unvisited; successors.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..successors.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnStack;
            stack.push((root, 0));

            while let Some(&(node, cursor)) = stack.last() {
                let Some(&next) = successors[node].get(cursor) else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks[next] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        return Some(
                            stack[start..]
                                .iter()
                                .map(|&(n, _)| self.assignments[n].step_id.as_str())
                                .collect(),
                        );
                    }
                    Mark::Unvisited => {
                        marks[next] = Mark::OnStack;
                        stack.push((next, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Assignments ordered so every dependency precedes its dependents. Among
    /// steps whose dependencies are all emitted, input order wins.
    pub fn topological_order(&self) -> Result<Vec<&'a Assignment>> {
        let successors = self.successors();
        let mut indegree: Vec<usize> = (0..successors.len())
            .map(|i| {
                self.graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(successors.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(&self.assignments[node]);
            for &next in &successors[node] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != successors.len() {
            let cycle = self
                .find_cycle()
                .map(|steps| steps.join(" -> "))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::CycleDetected(cycle));
        }
        Ok(order)
    }

    /// Fail with `CycleDetected` naming the cycle, if there is one.
    pub fn ensure_acyclic(&self) -> Result<()> {
        match self.find_cycle() {
            Some(steps) => Err(Error::CycleDetected(steps.join(" -> "))),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AssignmentGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentGraph")
            .field("steps", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}

/// True when the declared dependencies contain any cycle.
pub fn detect_cycles(assignments: &[Assignment]) -> Result<bool> {
    Ok(AssignmentGraph::build(assignments)?.has_cycle())
}

/// Dependency-respecting order of `assignments`; rejects cyclic input.
pub fn topological_sort(assignments: &[Assignment]) -> Result<Vec<Assignment>> {
    let graph = AssignmentGraph::build(assignments)?;
    Ok(graph.topological_order()?.into_iter().cloned().collect())
}
