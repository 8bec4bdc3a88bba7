//! Trigger matching and evaluation.

use relay_core::TriggerRejected;
use relay_core::pattern::any_match;
use relay_core::run::{Run, RunContext, TriggerEvent};
use relay_core::workflow::{EventKind, TriggerConfig, WorkflowDefinition};
use tracing::debug;

/// Decides whether an event starts a run of a workflow.
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Accept the event and allocate a run, or reject it.
    pub fn evaluate(
        &self,
        workflow: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<Run, TriggerRejected> {
        let kind = self.matches(workflow, event)?;

        let mut context = RunContext::from_event(event);
        context.event = kind;
        let run = Run::new(&workflow.name, context);

        debug!(
            run_id = %run.id,
            workflow = %workflow.name,
            event = %kind,
            git_ref = %event.git_ref,
            "Trigger accepted"
        );
        Ok(run)
    }

    /// Check an event against the workflow's triggers.
    ///
    /// A push of a tag ref is treated as a tag event. Returns the effective
    /// event kind on success.
    pub fn matches(
        &self,
        workflow: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<EventKind, TriggerRejected> {
        let kind = match event.kind {
            EventKind::Push if event.is_tag || event.git_ref.starts_with("refs/tags/") => {
                EventKind::Tag
            }
            other => other,
        };

        if workflow.triggers.is_empty() {
            // Default: trigger on push to any branch
            return if kind == EventKind::Push {
                Ok(kind)
            } else {
                Err(TriggerRejected::NoTriggerForEvent {
                    workflow: workflow.name.clone(),
                    event: kind,
                })
            };
        }

        let candidates: Vec<&TriggerConfig> = workflow
            .triggers
            .iter()
            .filter(|t| t.event == kind)
            .collect();

        if candidates.is_empty() {
            return Err(TriggerRejected::NoTriggerForEvent {
                workflow: workflow.name.clone(),
                event: kind,
            });
        }

        let ref_name = RunContext::new(kind, event.git_ref.clone()).ref_name;
        if candidates
            .iter()
            .any(|t| self.ref_matches(t, kind, &ref_name))
        {
            Ok(kind)
        } else {
            Err(TriggerRejected::RefFiltered {
                workflow: workflow.name.clone(),
                event: kind,
                git_ref: event.git_ref.clone(),
            })
        }
    }

    fn ref_matches(&self, trigger: &TriggerConfig, kind: EventKind, ref_name: &str) -> bool {
        match kind {
            EventKind::Tag => self.tag_matches(&trigger.tags, ref_name),
            EventKind::Push | EventKind::PullRequest => {
                self.branch_matches(&trigger.branches, ref_name)
            }
        }
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true; // Match all branches if no patterns specified
        }
        any_match(patterns, branch)
    }

    fn tag_matches(&self, patterns: &[String], tag: &str) -> bool {
        // A declared tag trigger with no patterns accepts every tag.
        patterns.is_empty() || any_match(patterns, tag)
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
