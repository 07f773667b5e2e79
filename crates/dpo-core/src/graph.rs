//! Workflow dependency graph
//!
//! Nodes are task positions in the workflow; an edge `a -> b` means `b`
//! consumes `a`'s output.

use crate::error::GraphError;
use dpo_types::Workflow;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraphMap<usize, ()>,
    depth: Vec<usize>,
}

impl TaskGraph {
    /// Build and validate the graph of `workflow`
    ///
    /// # Errors
    /// Duplicate ids, self-dependencies, unknown dependencies and cycles.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(workflow.len());
        for (i, task) in workflow.tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateId(task.id.clone()));
            }
        }

        let mut graph = DiGraphMap::new();
        for i in 0..workflow.len() {
            graph.add_node(i);
        }
        for (i, task) in workflow.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(GraphError::SelfDependency(task.id.clone()));
                }
                let &from = index.get(dep).ok_or_else(|| GraphError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(from, i, ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::CycleDetected(workflow.tasks[cycle.node_id()].id.clone()))?;

        // longest path from an entry node
        let mut depth = vec![0; workflow.len()];
        for &node in &order {
            let d = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|p| depth[p] + 1)
                .max()
                .unwrap_or(0);
            depth[node] = d;
        }

        Ok(Self { graph, depth })
    }

    #[inline]
    #[must_use]
    pub fn depth(&self, node: usize) -> usize {
        self.depth[node]
    }

    /// Direct dependencies of `node`
    pub fn dependencies(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph.neighbors_directed(node, Direction::Incoming)
    }

    /// Tasks that consume `node`'s output directly
    pub fn dependents(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }

    /// Number of distinct direct dependencies of each task, by position
    #[must_use]
    pub fn in_degrees(&self) -> Vec<usize> {
        (0..self.len()).map(|node| self.dependencies(node).count()).collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.depth.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpo_types::{Task, TaskKind};
    use pretty_assertions::assert_eq;

    fn workflow(tasks: Vec<Task>) -> Workflow {
        let mut wf = Workflow::new("s".into(), "test");
        for t in tasks {
            wf.push(t);
        }
        wf
    }

    #[test]
    fn diamond_edges() {
        let wf = workflow(vec![
            Task::new("load", TaskKind::Extract),
            Task::new("clean", TaskKind::Transform).depends_on("load"),
            Task::new("profile", TaskKind::Profile).depends_on("load"),
            Task::new("answer", TaskKind::Query).depends_on("clean").depends_on("profile"),
        ]);
        let graph = TaskGraph::build(&wf).unwrap();
        assert_eq!(graph.in_degrees(), vec![0, 1, 1, 2]);
        assert_eq!((0..4).map(|n| graph.depth(n)).collect::<Vec<_>>(), vec![0, 1, 1, 2]);
        let mut deps: Vec<usize> = graph.dependencies(3).collect();
        deps.sort_unstable();
        assert_eq!(deps, vec![1, 2]);
        let mut next: Vec<usize> = graph.dependents(0).collect();
        next.sort_unstable();
        assert_eq!(next, vec![1, 2]);
        assert_eq!(graph.dependents(3).count(), 0);
    }

    #[test]
    fn repeated_dependency_counts_once() {
        let wf = workflow(vec![
            Task::new("a", TaskKind::Extract),
            Task::new("b", TaskKind::Profile).depends_on("a").depends_on("a"),
        ]);
        assert_eq!(TaskGraph::build(&wf).unwrap().in_degrees(), vec![0, 1]);
    }

    #[test]
    fn depth_is_longest_path() {
        let wf = workflow(vec![
            Task::new("a", TaskKind::Extract),
            Task::new("b", TaskKind::Transform).depends_on("a"),
            Task::new("c", TaskKind::Query).depends_on("a").depends_on("b"),
        ]);
        let graph = TaskGraph::build(&wf).unwrap();
        assert_eq!(graph.depth(2), 2);
    }

    #[test]
    fn rejects_bad_structure() {
        let dup = workflow(vec![Task::new("a", TaskKind::Extract), Task::new("a", TaskKind::Profile)]);
        assert!(matches!(TaskGraph::build(&dup), Err(GraphError::DuplicateId(_))));

        let unknown = workflow(vec![Task::new("a", TaskKind::Profile).depends_on("ghost")]);
        assert!(matches!(
            TaskGraph::build(&unknown),
            Err(GraphError::UnknownDependency { .. })
        ));

        let self_dep = workflow(vec![Task::new("a", TaskKind::Profile).depends_on("a")]);
        assert!(matches!(TaskGraph::build(&self_dep), Err(GraphError::SelfDependency(_))));

        let cycle = workflow(vec![
            Task::new("a", TaskKind::Transform).depends_on("b"),
            Task::new("b", TaskKind::Transform).depends_on("a"),
        ]);
        assert!(matches!(TaskGraph::build(&cycle), Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn empty_workflow_has_no_nodes() {
        let graph = TaskGraph::build(&workflow(Vec::new())).unwrap();
        assert!(graph.is_empty());
        assert!(graph.in_degrees().is_empty());
    }
}
