//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduler and the
//! collaborators it drives: executors, trust providers and event sinks.

use crate::artifact::{ContentHash, ResolvedInput};
use crate::error::{ArtifactError, TrustDenied};
use crate::events::Event;
use crate::ids::{JobInstanceId, RunId};
use crate::run::RunContext;
use crate::trust::{TrustGrant, TrustScope};
use crate::workflow::{EnvironmentRequirement, Permission, StepDescriptor};
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use indexmap::IndexMap;
use std::pin::Pin;
use std::sync::Arc;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus for publishing and subscribing to events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching a subject pattern.
    /// Pattern supports wildcards: `run.*.completed`, `run.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Per-instance writer for produced artifacts.
///
/// Writes are staged; they become visible to consumers only once the
/// producing instance succeeds.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn put(&self, name: &str, data: Vec<u8>) -> std::result::Result<ContentHash, ArtifactError>;
}

/// Everything an executor gets for one job instance.
pub struct JobContext {
    pub run_id: RunId,
    pub instance_id: JobInstanceId,
    pub job: String,
    pub display_name: String,
    pub matrix: IndexMap<String, serde_json::Value>,
    pub steps: Vec<StepDescriptor>,
    pub run: RunContext,
    pub environment: Option<EnvironmentRequirement>,
    pub permissions: Vec<Permission>,
    /// Declared inputs, already resolved against the artifact store.
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Arc<dyn ArtifactSink>,
    /// Present only for publish gates.
    pub grant: Option<TrustGrant>,
}

impl JobContext {
    pub fn input(&self, name: &str) -> Option<&ResolvedInput> {
        self.inputs.iter().find(|i| i.meta.name == name)
    }
}

/// Result reported by an executor.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub success: bool,
    pub logs: Vec<String>,
    /// Names of artifacts written through the context's sink.
    pub artifacts: Vec<String>,
    pub message: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>) -> Self {
        self.artifacts.push(name.into());
        self
    }
}

/// Runs a job's steps. Opaque to the scheduler.
///
/// May be called concurrently for different instances; called at most once
/// per instance per run.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> Result<Outcome>;

    /// Stop in-flight work for an instance. Best effort.
    async fn abort(&self, _instance: JobInstanceId) -> Result<()> {
        Ok(())
    }
}

/// Issues short-lived trust grants for publish gates.
#[async_trait]
pub trait TrustProvider: Send + Sync {
    async fn grant(
        &self,
        scope: &TrustScope,
        ctx: &RunContext,
    ) -> std::result::Result<TrustGrant, TrustDenied>;
}
