//! Worker tasks: input resolution, gate authorization and execution.

use crate::gate::PublishGate;
use crate::table::Dispatch;
use relay_artifacts::ArtifactStore;
use relay_core::ArtifactError;
use relay_core::artifact::ResolvedInput;
use relay_core::ids::JobInstanceId;
use relay_core::ports::{JobContext, JobExecutor, Outcome};
use relay_core::run::{Reason, Run};
use relay_core::trust::{GateAction, TrustGrant};
use relay_trace::{RunAttributes, job_span};
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};

/// What a worker task hands back to the driver.
#[derive(Debug)]
pub enum WorkerReport {
    /// The executor ran (or errored) for this instance.
    Finished {
        instance: JobInstanceId,
        outcome: Result<Outcome, String>,
    },
    /// A declared input could not be read; the executor was never called.
    InputRejected {
        instance: JobInstanceId,
        reason: Reason,
    },
    /// A gate got its grant and may start.
    Authorized {
        job: Box<Dispatch>,
        grant: TrustGrant,
        inputs: Vec<ResolvedInput>,
    },
    Denied {
        instance: JobInstanceId,
        action: GateAction,
        reason: String,
    },
}

impl WorkerReport {
    pub fn instance(&self) -> JobInstanceId {
        match self {
            WorkerReport::Finished { instance, .. }
            | WorkerReport::InputRejected { instance, .. }
            | WorkerReport::Denied { instance, .. } => *instance,
            WorkerReport::Authorized { job, .. } => job.instance.id,
        }
    }
}

/// Shared handles every worker task needs.
#[derive(Clone)]
pub struct WorkerEnv {
    pub run: Arc<Run>,
    pub executor: Arc<dyn JobExecutor>,
    pub gate: PublishGate,
    pub store: Arc<ArtifactStore>,
}

impl WorkerEnv {
    fn span(&self, job: &Dispatch) -> tracing::Span {
        job_span(
            &RunAttributes::new()
                .run(self.run.id.to_string(), &self.run.workflow_name)
                .job(&job.instance.display_name, job.instance.id.to_string()),
        )
    }

    /// Resolve declared inputs on behalf of the instance.
    pub async fn resolve_inputs(&self, job: &Dispatch) -> Result<Vec<ResolvedInput>, Reason> {
        let mut inputs = Vec::with_capacity(job.template.inputs.len());
        for name in &job.template.inputs {
            match self.store.get(self.run.id, job.instance.id, name).await {
                Ok(input) => inputs.push(input),
                Err(ArtifactError::NotFound { name }) => {
                    return Err(Reason::MissingArtifact { name });
                }
                Err(ArtifactError::Forbidden { name, .. }) => {
                    return Err(Reason::ArtifactForbidden { name });
                }
                Err(e) => {
                    return Err(Reason::ExecutionFailed {
                        message: format!("artifact store: {}", e),
                    });
                }
            }
        }
        Ok(inputs)
    }

    /// Run an instance through the executor. Inputs are resolved here
    /// unless a gate already resolved them before requesting its grant.
    pub async fn execute(
        self,
        job: Dispatch,
        inputs: Option<Vec<ResolvedInput>>,
        grant: Option<TrustGrant>,
    ) -> WorkerReport {
        let span = self.span(&job);
        async move {
            let instance = job.instance.id;
            let inputs = match inputs {
                Some(inputs) => inputs,
                None => match self.resolve_inputs(&job).await {
                    Ok(inputs) => inputs,
                    Err(reason) => {
                        warn!(%reason, "Input resolution failed");
                        return WorkerReport::InputRejected { instance, reason };
                    }
                },
            };

            let ctx = JobContext {
                run_id: self.run.id,
                instance_id: instance,
                job: job.template.name.clone(),
                display_name: job.instance.display_name.clone(),
                matrix: job.instance.matrix.clone(),
                steps: job.template.steps.clone(),
                run: self.run.context.clone(),
                environment: job.template.environment.clone(),
                permissions: job.template.permissions.clone(),
                inputs,
                outputs: Arc::new(self.store.writer(self.run.id, instance)),
                grant,
            };

            info!("Executing job");
            let outcome = self
                .executor
                .execute(ctx)
                .await
                .map_err(|e| e.to_string());
            match &outcome {
                Ok(o) if o.success => debug!(artifacts = o.artifacts.len(), "Job succeeded"),
                Ok(o) => warn!(message = ?o.message, "Job failed"),
                Err(e) => warn!(error = %e, "Executor error"),
            }
            WorkerReport::Finished { instance, outcome }
        }
        .instrument(span)
        .await
    }

    /// Resolve a gate's inputs, then ask for its grant.
    pub async fn authorize(self, job: Dispatch) -> WorkerReport {
        let span = self.span(&job);
        async move {
            let instance = job.instance.id;
            let inputs = match self.resolve_inputs(&job).await {
                Ok(inputs) => inputs,
                Err(reason) => return WorkerReport::InputRejected { instance, reason },
            };

            match self.gate.authorize(&self.run, &job.instance, &job.template).await {
                Ok(grant) => WorkerReport::Authorized {
                    job: Box::new(job),
                    grant,
                    inputs,
                },
                Err(denied) => WorkerReport::Denied {
                    instance,
                    action: denied.action,
                    reason: denied.reason,
                },
            }
        }
        .instrument(span)
        .await
    }
}
