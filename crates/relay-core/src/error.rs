//! Error types for Relay.

use crate::condition::ConditionParseError;
use crate::ids::{JobInstanceId, RunId};
use crate::trust::GateAction;
use crate::workflow::EventKind;
use thiserror::Error;

/// Faults in the job graph itself. Any of these aborts a run before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Workflow has no jobs")]
    EmptyWorkflow,

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' needs unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in job dependencies involving '{0}'")]
    CycleDetected(String),

    #[error("Matrix for job '{job}' expands to {size} instances (limit {limit})")]
    MatrixTooLarge {
        job: String,
        size: usize,
        limit: usize,
    },

    #[error("Matrix axis '{axis}' of job '{job}' has no values")]
    EmptyMatrixAxis { job: String, axis: String },
}

/// Reasons an event does not start a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerRejected {
    #[error("Workflow '{workflow}' has no trigger for {event} events")]
    NoTriggerForEvent { workflow: String, event: EventKind },

    #[error("Ref '{git_ref}' is excluded by the {event} trigger filters of '{workflow}'")]
    RefFiltered {
        workflow: String,
        event: EventKind,
        git_ref: String,
    },
}

/// Artifact store failures. `NotFound` and `Forbidden` are deliberately distinct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {name}")]
    NotFound { name: String },

    #[error("Job {consumer} may not read artifact '{name}' (not a dependent of its producer)")]
    Forbidden {
        name: String,
        consumer: JobInstanceId,
    },

    #[error("Artifact '{name}' already exists in {run_id}")]
    Conflict { name: String, run_id: RunId },

    #[error("Unknown run: {0}")]
    UnknownRun(RunId),

    #[error("Job {instance} is not part of {run_id}")]
    UnknownInstance {
        run_id: RunId,
        instance: JobInstanceId,
    },

    #[error("Invalid artifact name: '{0}'")]
    InvalidName(String),

    #[error("Artifact storage error: {0}")]
    Storage(String),
}

impl ArtifactError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ArtifactError::Forbidden { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArtifactError::NotFound { .. })
    }
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Storage(err.to_string())
    }
}

/// A trust provider refused to issue a grant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Trust grant for {action} denied: {reason}")]
pub struct TrustDenied {
    pub action: GateAction,
    pub reason: String,
}

impl TrustDenied {
    pub fn new(action: GateAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Trigger rejected: {0}")]
    TriggerRejected(#[from] TriggerRejected),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    TrustDenied(#[from] TrustDenied),

    #[error("Invalid condition: {0}")]
    Condition(#[from] ConditionParseError),

    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run already completed")]
    RunAlreadyCompleted,

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
