//! Run and job instance types.

use crate::artifact::ArtifactMeta;
use crate::condition::ContextField;
use crate::ids::{JobInstanceId, RunId};
use crate::workflow::EventKind;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Incoming event descriptor handed to the trigger evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub git_ref: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub is_tag: bool,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        let git_ref = git_ref.into();
        let is_tag = kind == EventKind::Tag || git_ref.starts_with("refs/tags/");
        Self {
            kind,
            git_ref,
            actor: None,
            is_tag,
            variables: HashMap::new(),
        }
    }

    pub fn push(branch: &str) -> Self {
        Self::new(EventKind::Push, format!("refs/heads/{}", branch))
    }

    pub fn tag(tag: &str) -> Self {
        Self::new(EventKind::Tag, format!("refs/tags/{}", tag))
    }

    pub fn pull_request(number: u64) -> Self {
        Self::new(EventKind::PullRequest, format!("refs/pull/{}/merge", number))
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Facts about a run that guard conditions can observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunContext {
    pub event: EventKind,
    pub git_ref: String,
    pub ref_name: String,
    pub is_tag: bool,
    pub is_pull_request: bool,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl RunContext {
    pub fn new(event: EventKind, git_ref: impl Into<String>) -> Self {
        let git_ref = git_ref.into();
        let is_tag = event == EventKind::Tag || git_ref.starts_with("refs/tags/");
        Self {
            event,
            ref_name: short_ref_name(&git_ref).to_string(),
            git_ref,
            is_tag,
            is_pull_request: event == EventKind::PullRequest,
            actor: None,
            variables: HashMap::new(),
        }
    }

    pub fn from_event(event: &TriggerEvent) -> Self {
        let mut ctx = Self::new(event.kind, event.git_ref.clone());
        ctx.is_tag = ctx.is_tag || event.is_tag;
        ctx.actor = event.actor.clone();
        ctx.variables = event.variables.clone();
        ctx
    }

    pub fn ref_type(&self) -> &'static str {
        if self.is_tag { "tag" } else { "branch" }
    }

    /// Look up a field by name. `None` means the field is absent.
    pub fn field(&self, field: &ContextField) -> Option<String> {
        match field {
            ContextField::Event => Some(self.event.to_string()),
            ContextField::Ref => Some(self.git_ref.clone()),
            ContextField::RefName => Some(self.ref_name.clone()),
            ContextField::RefType => Some(self.ref_type().to_string()),
            ContextField::Actor => self.actor.clone(),
            ContextField::IsTag => Some(self.is_tag.to_string()),
            ContextField::IsPullRequest => Some(self.is_pull_request.to_string()),
            ContextField::Variable(name) => self.variables.get(name).cloned(),
        }
    }
}

fn short_ref_name(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub id: RunId,
    pub workflow_name: String,
    pub context: RunContext,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl Run {
    pub fn new(workflow_name: impl Into<String>, context: RunContext) -> Self {
        Self {
            id: RunId::new(),
            workflow_name: workflow_name.into(),
            context,
            created_at: Utc::now(),
            status: RunStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Trust grant denied for a publish gate.
    Unauthorized,
    Cancelled,
    Skipped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded
                | JobState::Failed
                | JobState::Unauthorized
                | JobState::Cancelled
                | JobState::Skipped
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Unauthorized)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Ready => "ready",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Unauthorized => "failed: unauthorized",
            JobState::Cancelled => "cancelled",
            JobState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why an instance ended the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    ExecutionFailed { message: String },
    ExecutorError { message: String },
    Unauthorized { message: String },
    MissingArtifact { name: String },
    ArtifactForbidden { name: String },
    DependencyFailed { dependency: String },
    ConditionNotMet,
    GateConditionNotMet,
    FailFast { sibling: JobInstanceId },
    RunCancelled,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::ExecutionFailed { message } => write!(f, "execution failed: {}", message),
            Reason::ExecutorError { message } => write!(f, "executor error: {}", message),
            Reason::Unauthorized { message } => write!(f, "unauthorized: {}", message),
            Reason::MissingArtifact { name } => write!(f, "missing artifact '{}'", name),
            Reason::ArtifactForbidden { name } => {
                write!(f, "access to artifact '{}' forbidden", name)
            }
            Reason::DependencyFailed { dependency } => {
                write!(f, "dependency '{}' did not succeed", dependency)
            }
            Reason::ConditionNotMet => f.write_str("condition not met"),
            Reason::GateConditionNotMet => f.write_str("gate condition not met"),
            Reason::FailFast { sibling } => write!(f, "matrix sibling {} failed", sibling),
            Reason::RunCancelled => f.write_str("run cancelled"),
        }
    }
}

/// One schedulable unit: a template, or one matrix cell of it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub run_id: RunId,
    /// Parent template name.
    pub job: String,
    pub display_name: String,
    #[serde(default)]
    pub matrix: IndexMap<String, serde_json::Value>,
    pub state: JobState,
    #[serde(default)]
    pub reason: Option<Reason>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl JobInstance {
    pub fn new(
        run_id: RunId,
        job: impl Into<String>,
        matrix: IndexMap<String, serde_json::Value>,
    ) -> Self {
        let job = job.into();
        let display_name = display_name(&job, &matrix);
        Self {
            id: JobInstanceId::new(),
            run_id,
            job,
            display_name,
            matrix,
            state: JobState::Pending,
            reason: None,
            started_at: None,
            completed_at: None,
            logs: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

fn display_name(job: &str, matrix: &IndexMap<String, serde_json::Value>) -> String {
    if matrix.is_empty() {
        return job.to_string();
    }
    let cell = matrix
        .values()
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} ({})", job, cell)
}

/// Archived view of a finished run: status, per-instance results and logs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run: Run,
    pub status: RunStatus,
    /// First instance to fail, if the run failed.
    pub root_cause: Option<JobInstanceId>,
    pub jobs: Vec<JobInstance>,
    pub artifacts: Vec<ArtifactMeta>,
}

impl RunReport {
    pub fn instances_of<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a JobInstance> + 'a {
        self.jobs.iter().filter(move |j| j.job == job)
    }

    /// State of the first instance of `job`.
    pub fn state_of(&self, job: &str) -> Option<JobState> {
        self.instances_of(job).next().map(|j| j.state)
    }

    pub fn instance(&self, id: JobInstanceId) -> Option<&JobInstance> {
        self.jobs.iter().find(|j| j.id == id)
    }
}
