//! Job dependency graph.

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use relay_core::DefinitionError;
use relay_core::workflow::{JobTemplate, WorkflowDefinition};
use std::collections::HashMap;

/// Validated, acyclic graph of job templates. Edges point from a
/// dependency to its dependent.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<JobTemplate, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl JobGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn template(&self, name: &str) -> Option<&JobTemplate> {
        self.name_to_index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Templates with no dependencies.
    pub fn roots(&self) -> Vec<&JobTemplate> {
        self.order
            .iter()
            .filter(|&&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|&idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Direct dependencies of a template.
    pub fn dependencies(&self, name: &str) -> Vec<&JobTemplate> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Templates that directly need `name`.
    pub fn dependents(&self, name: &str) -> Vec<&JobTemplate> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every template `name` transitively depends on.
    pub fn ancestors(&self, name: &str) -> Vec<&JobTemplate> {
        let Some(&start) = self.name_to_index.get(name) else {
            return Vec::new();
        };
        let reversed = petgraph::visit::Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut found = Vec::new();
        while let Some(idx) = dfs.next(reversed) {
            if idx != start
                && let Some(node) = self.graph.node_weight(idx)
            {
                found.push(node);
            }
        }
        found
    }

    /// Templates in dependency order.
    pub fn topological_order(&self) -> Vec<&JobTemplate> {
        self.order
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx))
            .collect()
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&JobTemplate> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builds a [`JobGraph`] from a workflow definition.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, workflow: &WorkflowDefinition) -> Result<JobGraph, DefinitionError> {
        if workflow.jobs.is_empty() {
            return Err(DefinitionError::EmptyWorkflow);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for job in &workflow.jobs {
            if name_to_index.contains_key(&job.name) {
                return Err(DefinitionError::DuplicateJob(job.name.clone()));
            }
            let idx = graph.add_node(job.clone());
            name_to_index.insert(job.name.clone(), idx);
        }

        for job in &workflow.jobs {
            let job_idx = name_to_index[&job.name];
            for dep in &job.needs {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| {
                    DefinitionError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.update_edge(*dep_idx, job_idx, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let name = graph
                .node_weight(cycle.node_id())
                .map(|j| j.name.clone())
                .unwrap_or_default();
            DefinitionError::CycleDetected(name)
        })?;

        Ok(JobGraph {
            graph,
            name_to_index,
            order,
        })
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(jobs: Vec<JobTemplate>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".to_string(),
            description: None,
            triggers: vec![],
            jobs,
        }
    }

    fn names(jobs: Vec<&JobTemplate>) -> Vec<String> {
        let mut names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_linear_dag() {
        let wf = workflow(vec![
            JobTemplate::new("build"),
            JobTemplate::new("test").needs(&["build"]),
            JobTemplate::new("deploy").needs(&["test"]),
        ]);
        let dag = DagBuilder::new().build(&wf).unwrap();

        let roots = dag.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "build");

        let order: Vec<_> = dag.topological_order().iter().map(|j| j.name.clone()).collect();
        assert_eq!(order, vec!["build", "test", "deploy"]);
        assert_eq!(names(dag.ancestors("deploy")), vec!["build", "test"]);
    }

    #[test]
    fn test_diamond_dag() {
        let wf = workflow(vec![
            JobTemplate::new("build"),
            JobTemplate::new("test-unit").needs(&["build"]),
            JobTemplate::new("test-integration").needs(&["build"]),
            JobTemplate::new("publish").needs(&["test-unit", "test-integration"]),
        ]);
        let dag = DagBuilder::new().build(&wf).unwrap();

        assert_eq!(dag.dependents("build").len(), 2);
        assert_eq!(
            names(dag.dependencies("publish")),
            vec!["test-integration", "test-unit"]
        );
        assert_eq!(dag.ancestors("publish").len(), 3);
        assert!(dag.ancestors("build").is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let wf = workflow(vec![
            JobTemplate::new("a").needs(&["c"]),
            JobTemplate::new("b").needs(&["a"]),
            JobTemplate::new("c").needs(&["b"]),
        ]);
        let err = DagBuilder::new().build(&wf).unwrap_err();
        assert!(matches!(err, DefinitionError::CycleDetected(_)));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let wf = workflow(vec![JobTemplate::new("a").needs(&["a"])]);
        let err = DagBuilder::new().build(&wf).unwrap_err();
        assert_eq!(err, DefinitionError::CycleDetected("a".to_string()));
    }

    #[test]
    fn test_unknown_dependency() {
        let wf = workflow(vec![JobTemplate::new("test").needs(&["build"])]);
        let err = DagBuilder::new().build(&wf).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownDependency {
                job: "test".to_string(),
                dependency: "build".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_and_empty() {
        let wf = workflow(vec![JobTemplate::new("a"), JobTemplate::new("a")]);
        assert_eq!(
            DagBuilder::new().build(&wf).unwrap_err(),
            DefinitionError::DuplicateJob("a".to_string())
        );
        assert_eq!(
            DagBuilder::new().build(&workflow(vec![])).unwrap_err(),
            DefinitionError::EmptyWorkflow
        );
    }
}
