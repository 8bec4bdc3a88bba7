//! Per-run instance table and its transition function.

use crate::dag::JobGraph;
use crate::gate::requirement_holds;
use crate::group::{CompletionGroup, GroupOutcome};
use crate::queue::{QueuedJob, ReadyQueue};
use chrono::Utc;
use indexmap::IndexMap;
use relay_core::events::{Event, JobStateChangedPayload};
use relay_core::ids::JobInstanceId;
use relay_core::run::{JobInstance, JobState, Reason, Run, RunStatus};
use relay_core::workflow::JobTemplate;
use std::sync::Arc;
use tracing::{debug, warn};

/// Work handed from the decision step to a worker task.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub instance: JobInstance,
    pub template: JobTemplate,
}

impl Dispatch {
    pub fn is_gate(&self) -> bool {
        self.template.is_gate()
    }
}

/// Mutable state of one run. Only the scheduler's driver mutates it, and
/// every state change goes through [`RunTable::transition`].
pub struct RunTable {
    run: Run,
    graph: Arc<JobGraph>,
    instances: IndexMap<JobInstanceId, JobInstance>,
    groups: IndexMap<String, CompletionGroup>,
    queue: ReadyQueue,
    root_cause: Option<JobInstanceId>,
    cancelled: bool,
    events: Vec<Event>,
}

impl RunTable {
    pub fn new(
        run: Run,
        graph: Arc<JobGraph>,
        instances: Vec<JobInstance>,
        max_concurrent: usize,
    ) -> Self {
        let mut queue = ReadyQueue::new(max_concurrent);
        let mut groups = IndexMap::new();

        for template in graph.topological_order() {
            let members = instances
                .iter()
                .filter(|i| i.job == template.name)
                .map(|i| i.id)
                .collect();
            groups.insert(
                template.name.clone(),
                CompletionGroup::new(&template.name, members, template.allow_failure),
            );
            if let Some(limit) = template.matrix.as_ref().and_then(|m| m.max_parallel) {
                queue.set_group_limit(&template.name, limit as usize);
            }
        }

        let mut table = Self {
            run,
            graph,
            instances: IndexMap::new(),
            groups,
            queue,
            root_cause: None,
            cancelled: false,
            events: Vec::new(),
        };

        // Instances resolved at planning time still announce their state.
        for mut instance in instances {
            let planned = instance.state;
            let reason = instance.reason.take();
            instance.state = JobState::Pending;
            let id = instance.id;
            table.instances.insert(id, instance);
            if planned != JobState::Pending {
                table.transition(id, planned, reason);
            }
        }
        table
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.run.status = status;
    }

    pub fn instance(&self, id: JobInstanceId) -> Option<&JobInstance> {
        self.instances.get(&id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.instances.values()
    }

    pub fn root_cause(&self) -> Option<JobInstanceId> {
        self.root_cause
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Every instance has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.instances.values().all(|i| i.state.is_terminal())
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Move an instance to a new state. Returns false (and changes
    /// nothing) if the move is not allowed from the current state.
    pub fn transition(&mut self, id: JobInstanceId, to: JobState, reason: Option<Reason>) -> bool {
        let Some(instance) = self.instances.get_mut(&id) else {
            return false;
        };
        let from = instance.state;
        if !can_transition(from, to) {
            if !from.is_terminal() {
                warn!(job = %instance.display_name, %from, %to, "Rejected state transition");
            }
            return false;
        }

        let now = Utc::now();
        instance.state = to;
        if to == JobState::Running {
            instance.started_at = Some(now);
        }
        if to.is_terminal() {
            instance.completed_at = Some(now);
        }
        if reason.is_some() {
            instance.reason = reason.clone();
        }

        debug!(job = %instance.display_name, %from, %to, "Job state changed");

        let soft = self
            .groups
            .get(&instance.job)
            .is_some_and(|g| g.allow_failure);
        if to.is_failure() && !soft && self.root_cause.is_none() {
            self.root_cause = Some(id);
        }

        self.events.push(Event::JobStateChanged(JobStateChangedPayload {
            run_id: self.run.id,
            instance_id: id,
            job: instance.job.clone(),
            display_name: instance.display_name.clone(),
            from_state: from,
            to_state: to,
            reason,
            timestamp: now,
        }));
        true
    }

    /// Append executor logs to an instance.
    pub fn append_logs(&mut self, id: JobInstanceId, logs: Vec<String>) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.logs.extend(logs);
        }
    }

    /// How the instances of `job` look to dependents.
    pub fn group_outcome(&self, job: &str) -> GroupOutcome {
        match self.groups.get(job) {
            Some(group) => group.outcome(|id| {
                self.instances
                    .get(&id)
                    .map(|i| (i.state, i.reason.as_ref()))
            }),
            None => GroupOutcome::SatisfiedAbsent,
        }
    }

    /// Decision step: resolve pending instances whose dependencies have
    /// settled, then take as many ready instances as the limits allow.
    pub fn advance(&mut self) -> Vec<Dispatch> {
        if self.cancelled {
            return Vec::new();
        }

        loop {
            let mut changed = false;
            let pending: Vec<JobInstanceId> = self
                .instances
                .values()
                .filter(|i| i.state == JobState::Pending)
                .map(|i| i.id)
                .collect();

            for id in pending {
                if let Some((to, reason)) = self.resolve_pending(id) {
                    changed |= self.transition(id, to, reason);
                    if to == JobState::Ready
                        && let Some(instance) = self.instances.get(&id)
                    {
                        self.queue.enqueue(QueuedJob::new(id, &instance.job));
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let mut dispatches = Vec::new();
        while let Some(job) = self.queue.dequeue() {
            let Some(template) = self.graph.template(&job.job).cloned() else {
                self.queue.complete(&job);
                continue;
            };
            // Gates stay ready until their grant arrives.
            if !template.is_gate() {
                self.transition(job.instance, JobState::Running, None);
            }
            if let Some(instance) = self.instances.get(&job.instance) {
                dispatches.push(Dispatch {
                    instance: instance.clone(),
                    template,
                });
            }
        }
        dispatches
    }

    fn resolve_pending(&self, id: JobInstanceId) -> Option<(JobState, Option<Reason>)> {
        let instance = self.instances.get(&id)?;
        let template = self.graph.template(&instance.job)?;

        for dependency in &template.needs {
            match self.group_outcome(dependency) {
                GroupOutcome::Pending => return None,
                GroupOutcome::Blocked => {
                    return Some((
                        JobState::Cancelled,
                        Some(Reason::DependencyFailed {
                            dependency: dependency.clone(),
                        }),
                    ));
                }
                GroupOutcome::Satisfied | GroupOutcome::SatisfiedAbsent => {}
            }
        }

        if !requirement_holds(template, &self.run.context) {
            return Some((JobState::Skipped, Some(Reason::GateConditionNotMet)));
        }
        Some((JobState::Ready, None))
    }

    /// Release the dispatch slot of an instance.
    pub fn release(&mut self, id: JobInstanceId) {
        if let Some(instance) = self.instances.get(&id) {
            let job = QueuedJob::new(id, &instance.job);
            self.queue.complete(&job);
        }
    }

    /// Cancel not-yet-started siblings of a failed matrix cell when the
    /// template asks for it. Returns the cancelled instances.
    pub fn fail_fast(&mut self, failed: JobInstanceId) -> Vec<JobInstanceId> {
        let Some(instance) = self.instances.get(&failed) else {
            return Vec::new();
        };
        let job = instance.job.clone();
        let enabled = self
            .graph
            .template(&job)
            .and_then(|t| t.matrix.as_ref())
            .is_some_and(|m| m.fail_fast);
        if !enabled {
            return Vec::new();
        }

        let siblings: Vec<JobInstanceId> = self
            .instances
            .values()
            .filter(|i| {
                i.job == job
                    && i.id != failed
                    && matches!(i.state, JobState::Pending | JobState::Ready)
            })
            .map(|i| i.id)
            .collect();

        let mut cancelled = Vec::new();
        for sibling in siblings {
            self.queue.remove(sibling);
            if self.transition(
                sibling,
                JobState::Cancelled,
                Some(Reason::FailFast { sibling: failed }),
            ) {
                cancelled.push(sibling);
            }
        }
        cancelled
    }

    /// Cancel every non-terminal instance. Returns those that had already
    /// been handed to the executor.
    pub fn cancel_all(&mut self) -> Vec<JobInstanceId> {
        self.cancelled = true;
        self.queue.clear();

        let open: Vec<(JobInstanceId, JobState)> = self
            .instances
            .values()
            .filter(|i| !i.state.is_terminal())
            .map(|i| (i.id, i.state))
            .collect();

        let mut running = Vec::new();
        for (id, state) in open {
            if state == JobState::Running {
                running.push(id);
            }
            self.transition(id, JobState::Cancelled, Some(Reason::RunCancelled));
            self.release(id);
        }
        running
    }

    /// Final status: cancelled if cancelled on request, failed if any
    /// instance of a strict template failed or was cancelled.
    pub fn final_status(&self) -> RunStatus {
        if self.cancelled {
            return RunStatus::Cancelled;
        }
        let failed = self.instances.values().any(|i| {
            let soft = self.groups.get(&i.job).is_some_and(|g| g.allow_failure);
            !soft && (i.state.is_failure() || i.state == JobState::Cancelled)
        });
        if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for instance in self.instances.values() {
            match instance.state {
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed | JobState::Unauthorized => counts.failed += 1,
                JobState::Skipped => counts.skipped += 1,
                JobState::Cancelled => counts.cancelled += 1,
                _ => {}
            }
        }
        counts
    }
}

/// Terminal state tallies for the completion event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateCounts {
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub cancelled: u32,
}

fn can_transition(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Pending, Ready | Skipped | Cancelled)
            | (Ready, Running | Failed | Unauthorized | Skipped | Cancelled)
            | (Running, Succeeded | Failed | Cancelled)
    )
}
