//! Run lifecycle events.

use crate::artifact::ContentHash;
use crate::ids::*;
use crate::run::{JobState, Reason, RunStatus};
use crate::trust::GateAction;
use crate::workflow::EventKind;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All events emitted while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunCreated(RunCreatedPayload),
    JobStateChanged(JobStateChangedPayload),
    GrantIssued(GrantIssuedPayload),
    GrantDenied(GrantDeniedPayload),
    ArtifactCommitted(ArtifactCommittedPayload),
    RunCompleted(RunCompletedPayload),
}

impl Event {
    /// Dotted subject used for pattern subscriptions.
    pub fn subject(&self) -> String {
        match self {
            Event::RunCreated(p) => format!("run.{}.created", p.run_id),
            Event::JobStateChanged(p) => format!("run.{}.job.{}.{}", p.run_id, p.job, p.to_state),
            Event::GrantIssued(p) => format!("run.{}.grant.issued", p.run_id),
            Event::GrantDenied(p) => format!("run.{}.grant.denied", p.run_id),
            Event::ArtifactCommitted(p) => format!("run.{}.artifact.{}", p.run_id, p.name),
            Event::RunCompleted(p) => format!("run.{}.completed", p.run_id),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunCreated(p) => p.run_id,
            Event::JobStateChanged(p) => p.run_id,
            Event::GrantIssued(p) => p.run_id,
            Event::GrantDenied(p) => p.run_id,
            Event::ArtifactCommitted(p) => p.run_id,
            Event::RunCompleted(p) => p.run_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCreatedPayload {
    pub run_id: RunId,
    pub workflow_name: String,
    pub event: EventKind,
    pub git_ref: String,
    pub instance_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStateChangedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    pub from_state: JobState,
    pub to_state: JobState,
    pub reason: Option<Reason>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GrantIssuedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub grant_id: GrantId,
    pub action: GateAction,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GrantDeniedPayload {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub action: GateAction,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactCommittedPayload {
    pub run_id: RunId,
    pub producer: JobInstanceId,
    pub name: String,
    pub digest: ContentHash,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow_name: String,
    pub status: RunStatus,
    pub root_cause: Option<JobInstanceId>,
    pub jobs_succeeded: u32,
    pub jobs_failed: u32,
    pub jobs_skipped: u32,
    pub jobs_cancelled: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}
