//! Workflow file loading and static validation.

use relay_core::error::DefinitionError;
use relay_core::workflow::WorkflowDefinition;
use relay_scheduler::{DagBuilder, JobGraph, MatrixExpander};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Step {index} of job '{job}' needs exactly one of `run` or `uses`")]
    InvalidStep { job: String, index: usize },
}

/// A parsed workflow whose graph and matrices are known to be valid.
pub struct LoadedWorkflow {
    pub definition: WorkflowDefinition,
    pub graph: JobGraph,
    /// Instance count per template, in dependency order.
    pub instance_counts: Vec<(String, usize)>,
}

pub fn read_workflow(path: &Path) -> Result<WorkflowDefinition, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse and validate without evaluating any trigger.
pub fn load_workflow(path: &Path, max_matrix_size: usize) -> Result<LoadedWorkflow, LoadError> {
    let definition = read_workflow(path)?;
    validate(definition, max_matrix_size)
}

pub fn validate(
    definition: WorkflowDefinition,
    max_matrix_size: usize,
) -> Result<LoadedWorkflow, LoadError> {
    for job in &definition.jobs {
        for (index, step) in job.steps.iter().enumerate() {
            if step.run.is_some() == step.uses.is_some() {
                return Err(LoadError::InvalidStep {
                    job: job.name.clone(),
                    index: index + 1,
                });
            }
        }
    }

    let graph = DagBuilder::new().build(&definition)?;
    let expander = MatrixExpander::new(max_matrix_size);
    let instance_counts = graph
        .topological_order()
        .into_iter()
        .map(|template| Ok((template.name.clone(), expander.cells(template)?.len())))
        .collect::<Result<Vec<_>, DefinitionError>>()?;

    Ok(LoadedWorkflow {
        definition,
        graph,
        instance_counts,
    })
}
