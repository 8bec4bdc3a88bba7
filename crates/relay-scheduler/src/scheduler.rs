//! Main scheduler orchestration.

use crate::config::SchedulerConfig;
use crate::dag::{DagBuilder, JobGraph};
use crate::gate::PublishGate;
use crate::matrix::MatrixExpander;
use crate::table::{Dispatch, RunTable};
use crate::triggers::TriggerEvaluator;
use crate::worker::{WorkerEnv, WorkerReport};

use chrono::Utc;
use relay_artifacts::{ArtifactStore, Lineage};
use relay_core::events::{
    ArtifactCommittedPayload, Event, GrantDeniedPayload, GrantIssuedPayload, RunCompletedPayload,
    RunCreatedPayload,
};
use relay_core::ids::{JobInstanceId, RunId};
use relay_core::ports::{EventBus, JobExecutor, Outcome, TrustProvider};
use relay_core::run::{JobInstance, JobState, Reason, Run, RunReport, RunStatus, TriggerEvent};
use relay_core::workflow::WorkflowDefinition;
use relay_core::{Error, Result};
use relay_trace::{RunAttributes, run_span};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::{self, JoinSet};
use tracing::{Instrument, debug, error, info, warn};

/// A run that passed trigger evaluation and graph validation, with every
/// instance materialized. Nothing has been dispatched.
#[derive(Debug)]
pub struct RunPlan {
    pub run: Run,
    pub graph: Arc<JobGraph>,
    /// Instances in dependency order. Instances whose template condition
    /// does not hold are already `skipped`.
    pub instances: Vec<JobInstance>,
}

impl RunPlan {
    pub fn instances_of<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a JobInstance> + 'a {
        self.instances.iter().filter(move |i| i.job == job)
    }

    /// Transitive upstream instances of every instance.
    pub fn lineage(&self) -> Lineage {
        let mut by_job: HashMap<&str, Vec<JobInstanceId>> = HashMap::new();
        for instance in &self.instances {
            by_job.entry(instance.job.as_str()).or_default().push(instance.id);
        }

        let mut lineage = Lineage::new();
        for instance in &self.instances {
            let upstream: HashSet<JobInstanceId> = self
                .graph
                .ancestors(&instance.job)
                .into_iter()
                .flat_map(|t| by_job.get(t.name.as_str()).cloned().unwrap_or_default())
                .collect();
            lineage.insert(instance.id, upstream);
        }
        lineage
    }
}

enum Control {
    Cancel,
}

/// Cancels a run from anywhere.
#[derive(Clone)]
pub struct Canceller {
    control: mpsc::Sender<Control>,
}

impl Canceller {
    pub async fn cancel(&self) -> Result<()> {
        self.control
            .send(Control::Cancel)
            .await
            .map_err(|_| Error::RunAlreadyCompleted)
    }
}

/// Handle to a started run.
pub struct RunHandle {
    run_id: RunId,
    control: mpsc::Sender<Control>,
    table: Arc<RwLock<RunTable>>,
    driver: task::JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Cancel the run. Instances already finished keep their result.
    pub async fn cancel(&self) -> Result<()> {
        self.canceller().cancel().await
    }

    /// Detached cancel capability, usable while another task waits.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            control: self.control.clone(),
        }
    }

    /// Current state of every instance.
    pub async fn snapshot(&self) -> Vec<JobInstance> {
        self.table.read().await.instances().cloned().collect()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunReport> {
        self.driver
            .await
            .map_err(|e| Error::Internal(format!("run driver failed: {}", e)))?
    }
}

/// The main scheduler service.
pub struct Scheduler {
    config: SchedulerConfig,
    executor: Arc<dyn JobExecutor>,
    trust: Arc<dyn TrustProvider>,
    store: Arc<ArtifactStore>,
    event_bus: Option<Arc<dyn EventBus>>,
    trigger_evaluator: TriggerEvaluator,
    dag_builder: DagBuilder,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn JobExecutor>,
        trust: Arc<dyn TrustProvider>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            config,
            executor,
            trust,
            store,
            event_bus: None,
            trigger_evaluator: TriggerEvaluator::new(),
            dag_builder: DagBuilder::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Evaluate the trigger, validate the graph and expand every template.
    pub fn plan(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> Result<RunPlan> {
        let run = self.trigger_evaluator.evaluate(workflow, event)?;
        let graph = Arc::new(self.dag_builder.build(workflow)?);
        let expander = MatrixExpander::new(self.config.max_matrix_size);

        let mut instances = Vec::new();
        for template in graph.topological_order() {
            let mut expanded = expander.expand(run.id, template)?;
            let allowed = template
                .condition
                .as_ref()
                .is_none_or(|c| c.allows(&run.context));
            if !allowed {
                debug!(job = %template.name, "Job condition not met");
                for instance in &mut expanded {
                    instance.state = JobState::Skipped;
                    instance.reason = Some(Reason::ConditionNotMet);
                }
            }
            instances.extend(expanded);
        }

        Ok(RunPlan {
            run,
            graph,
            instances,
        })
    }

    /// Plan and start a run in the background.
    pub async fn start(
        &self,
        workflow: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<RunHandle> {
        let plan = self.plan(workflow, event)?;
        self.launch(plan).await
    }

    /// Plan, start and wait for a run.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<RunReport> {
        self.start(workflow, event).await?.wait().await
    }

    /// Start a previously computed plan.
    pub async fn launch(&self, plan: RunPlan) -> Result<RunHandle> {
        self.store.register_run(plan.run.id, plan.lineage()).await;

        let mut run = plan.run;
        run.status = RunStatus::Running;
        let run_id = run.id;
        let instance_count = plan.instances.len();

        let env = WorkerEnv {
            run: Arc::new(run.clone()),
            executor: self.executor.clone(),
            gate: PublishGate::new(self.trust.clone()),
            store: self.store.clone(),
        };

        let created = Event::RunCreated(RunCreatedPayload {
            run_id,
            workflow_name: run.workflow_name.clone(),
            event: run.context.event,
            git_ref: run.context.git_ref.clone(),
            instance_count,
            created_at: run.created_at,
        });

        let table = Arc::new(RwLock::new(RunTable::new(
            run,
            plan.graph,
            plan.instances,
            self.config.max_concurrent_jobs,
        )));
        let (control_tx, control_rx) = mpsc::channel(8);

        let driver = RunDriver {
            table: table.clone(),
            env,
            event_bus: self.event_bus.clone(),
            control: control_rx,
            tasks: JoinSet::new(),
            inflight: HashMap::new(),
        };

        info!(run_id = %run_id, instances = instance_count, "Run started");
        let driver = tokio::spawn(driver.drive(created));

        Ok(RunHandle {
            run_id,
            control: control_tx,
            table,
            driver,
        })
    }
}

/// Owns one run: the single decision loop and its worker tasks.
struct RunDriver {
    table: Arc<RwLock<RunTable>>,
    env: WorkerEnv,
    event_bus: Option<Arc<dyn EventBus>>,
    control: mpsc::Receiver<Control>,
    tasks: JoinSet<WorkerReport>,
    inflight: HashMap<task::Id, JobInstanceId>,
}

impl RunDriver {
    async fn drive(mut self, created: Event) -> Result<RunReport> {
        let span = run_span(
            &RunAttributes::new()
                .run(self.env.run.id.to_string(), &self.env.run.workflow_name)
                .trigger(
                    self.env.run.context.event.to_string(),
                    &self.env.run.context.git_ref,
                ),
        );

        async move {
            self.publish(vec![created]).await;
            let mut control_open = true;

            loop {
                let (dispatches, events) = {
                    let mut table = self.table.write().await;
                    let dispatches = table.advance();
                    (dispatches, table.take_events())
                };
                self.publish(events).await;
                for job in dispatches {
                    self.spawn(job);
                }

                if self.tasks.is_empty() {
                    if self.table.read().await.is_settled() {
                        break;
                    }
                    error!("Run stalled with unresolved jobs and nothing running");
                    self.cancel().await;
                    return Err(Error::Internal("run stalled".to_string()));
                }

                tokio::select! {
                    control = self.control.recv(), if control_open => match control {
                        Some(Control::Cancel) => self.cancel().await,
                        None => control_open = false,
                    },
                    Some(joined) = self.tasks.join_next_with_id() => {
                        self.handle_joined(joined).await;
                    }
                    else => {}
                }
            }

            self.finish().await
        }
        .instrument(span)
        .await
    }

    fn spawn(&mut self, job: Dispatch) {
        let instance = job.instance.id;
        let env = self.env.clone();
        let handle = if job.is_gate() {
            self.tasks.spawn(env.authorize(job))
        } else {
            self.tasks.spawn(env.execute(job, None, None))
        };
        self.inflight.insert(handle.id(), instance);
    }

    async fn handle_joined(
        &mut self,
        joined: std::result::Result<(task::Id, WorkerReport), task::JoinError>,
    ) {
        let report = match joined {
            Ok((id, report)) => {
                self.inflight.remove(&id);
                report
            }
            Err(join_error) => {
                let Some(instance) = self.inflight.remove(&join_error.id()) else {
                    return;
                };
                let message = if join_error.is_panic() {
                    "executor panicked".to_string()
                } else {
                    "worker task aborted".to_string()
                };
                WorkerReport::Finished {
                    instance,
                    outcome: Err(message),
                }
            }
        };
        self.handle_report(report).await;
    }

    async fn handle_report(&mut self, report: WorkerReport) {
        let instance = report.instance();
        let mut events = Vec::new();

        match report {
            WorkerReport::Finished {
                outcome: Ok(outcome),
                ..
            } if outcome.success => {
                self.succeeded(instance, outcome, &mut events).await;
            }
            WorkerReport::Finished { outcome, .. } => {
                let (reason, logs) = match outcome {
                    Ok(Outcome { message, logs, .. }) => (
                        Reason::ExecutionFailed {
                            message: message.unwrap_or_else(|| "job failed".to_string()),
                        },
                        logs,
                    ),
                    Err(message) => (Reason::ExecutorError { message }, Vec::new()),
                };
                self.discard(instance).await;
                let mut table = self.table.write().await;
                table.append_logs(instance, logs);
                table.release(instance);
                if table.transition(instance, JobState::Failed, Some(reason)) {
                    table.fail_fast(instance);
                }
            }
            WorkerReport::InputRejected { reason, .. } => {
                let mut table = self.table.write().await;
                table.release(instance);
                if table.transition(instance, JobState::Failed, Some(reason)) {
                    table.fail_fast(instance);
                }
            }
            WorkerReport::Denied { action, reason, .. } => {
                let mut table = self.table.write().await;
                table.release(instance);
                if table.transition(
                    instance,
                    JobState::Unauthorized,
                    Some(Reason::Unauthorized {
                        message: reason.clone(),
                    }),
                ) {
                    events.push(Event::GrantDenied(GrantDeniedPayload {
                        run_id: self.env.run.id,
                        instance_id: instance,
                        action,
                        reason,
                    }));
                    table.fail_fast(instance);
                }
            }
            WorkerReport::Authorized {
                job,
                grant,
                inputs,
            } => {
                let started = self
                    .table
                    .write()
                    .await
                    .transition(instance, JobState::Running, None);
                if started {
                    events.push(Event::GrantIssued(GrantIssuedPayload {
                        run_id: self.env.run.id,
                        instance_id: instance,
                        grant_id: grant.id(),
                        action: grant.scope().action,
                        expires_at: grant.expires_at(),
                    }));
                    let env = self.env.clone();
                    let handle = self.tasks.spawn(env.execute(*job, Some(inputs), Some(grant)));
                    self.inflight.insert(handle.id(), instance);
                } else {
                    // Cancelled while waiting; the grant is dropped unused.
                    debug!(instance = %instance, "Discarding grant for cancelled gate");
                    self.table.write().await.release(instance);
                }
            }
        }

        let mut all = self.table.write().await.take_events();
        all.extend(events);
        self.publish(all).await;
    }

    async fn succeeded(
        &mut self,
        instance: JobInstanceId,
        outcome: Outcome,
        events: &mut Vec<Event>,
    ) {
        let run_id = self.env.run.id;
        let still_running = self
            .table
            .read()
            .await
            .instance(instance)
            .is_some_and(|i| i.state == JobState::Running);
        if !still_running {
            self.discard(instance).await;
            self.table.write().await.release(instance);
            return;
        }

        let committed = self.env.store.commit(run_id, instance).await;
        let mut table = self.table.write().await;
        table.append_logs(instance, outcome.logs);
        table.release(instance);

        match committed {
            Ok(artifacts) => {
                if table.transition(instance, JobState::Succeeded, None) {
                    events.extend(artifacts.into_iter().map(|meta| {
                        Event::ArtifactCommitted(ArtifactCommittedPayload {
                            run_id,
                            producer: instance,
                            name: meta.name,
                            digest: meta.digest,
                            size_bytes: meta.size_bytes,
                        })
                    }));
                }
            }
            Err(e) => {
                warn!(instance = %instance, error = %e, "Artifact commit failed");
                let reason = Reason::ExecutionFailed {
                    message: format!("artifact commit failed: {}", e),
                };
                if table.transition(instance, JobState::Failed, Some(reason)) {
                    table.fail_fast(instance);
                }
            }
        }
    }

    async fn discard(&self, instance: JobInstanceId) {
        if let Err(e) = self.env.store.discard(self.env.run.id, instance).await {
            warn!(instance = %instance, error = %e, "Failed to discard staged artifacts");
        }
    }

    /// Stop everything: cancel open instances, abort executor work and
    /// worker tasks, drop staged writes.
    async fn cancel(&mut self) {
        let running = {
            let mut table = self.table.write().await;
            if table.is_cancelled() {
                return;
            }
            table.cancel_all()
        };
        info!(running = running.len(), "Cancelling run");

        for instance in running {
            if let Err(e) = self.env.executor.abort(instance).await {
                warn!(instance = %instance, error = %e, "Executor abort failed");
            }
        }

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        self.inflight.clear();

        if let Err(e) = self.env.store.discard_all(self.env.run.id).await {
            warn!(error = %e, "Failed to discard staged artifacts");
        }

        let events = self.table.write().await.take_events();
        self.publish(events).await;
    }

    async fn finish(self) -> Result<RunReport> {
        let run_id = self.env.run.id;
        let artifacts = self.env.store.list(run_id).await?;

        let (report, completed) = {
            let mut table = self.table.write().await;
            let status = table.final_status();
            table.set_status(status);
            let counts = table.counts();
            let completed_at = Utc::now();
            let duration_ms = (completed_at - table.run().created_at)
                .num_milliseconds()
                .max(0) as u64;

            let report = RunReport {
                run: table.run().clone(),
                status,
                root_cause: table.root_cause(),
                jobs: table.instances().cloned().collect(),
                artifacts,
            };
            let completed = Event::RunCompleted(RunCompletedPayload {
                run_id,
                workflow_name: table.run().workflow_name.clone(),
                status,
                root_cause: table.root_cause(),
                jobs_succeeded: counts.succeeded,
                jobs_failed: counts.failed,
                jobs_skipped: counts.skipped,
                jobs_cancelled: counts.cancelled,
                duration_ms,
                completed_at,
            });
            (report, completed)
        };

        self.env.store.archive(run_id).await?;

        match report.status {
            RunStatus::Succeeded => info!(status = %report.status, "Run completed"),
            _ => warn!(
                status = %report.status,
                root_cause = ?report.root_cause,
                "Run completed"
            ),
        }

        self.publish(vec![completed]).await;
        Ok(report)
    }

    async fn publish(&self, events: Vec<Event>) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        for event in events {
            if let Err(e) = bus.publish(event).await {
                warn!(error = %e, "Failed to publish event");
            }
        }
    }
}
