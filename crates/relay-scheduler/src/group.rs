//! Fan-in over the instances of one template.

use relay_core::ids::JobInstanceId;
use relay_core::run::{JobState, Reason};

/// How a template's instances look to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Some instance is still unresolved.
    Pending,
    /// All resolved and at least one succeeded.
    Satisfied,
    /// All resolved but nothing succeeded (skipped, or soft failures).
    /// Dependents proceed without its artifacts.
    SatisfiedAbsent,
    /// A member failed or was cancelled; dependents are cancelled.
    Blocked,
}

impl GroupOutcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, GroupOutcome::Pending)
    }
}

/// All instances expanded from one template.
#[derive(Debug, Clone)]
pub struct CompletionGroup {
    pub job: String,
    pub members: Vec<JobInstanceId>,
    pub allow_failure: bool,
}

impl CompletionGroup {
    pub fn new(job: impl Into<String>, members: Vec<JobInstanceId>, allow_failure: bool) -> Self {
        Self {
            job: job.into(),
            members,
            allow_failure,
        }
    }

    /// Aggregate the members' states.
    pub fn outcome<'a, F>(&self, lookup: F) -> GroupOutcome
    where
        F: Fn(JobInstanceId) -> Option<(JobState, Option<&'a Reason>)>,
    {
        let mut any_succeeded = false;
        let mut blocked = false;

        for &member in &self.members {
            let Some((state, reason)) = lookup(member) else {
                continue;
            };
            match state {
                JobState::Pending | JobState::Ready | JobState::Running => {
                    return GroupOutcome::Pending;
                }
                JobState::Succeeded => any_succeeded = true,
                JobState::Skipped => {}
                JobState::Failed | JobState::Unauthorized => {
                    blocked |= !self.allow_failure;
                }
                JobState::Cancelled => match reason {
                    // Cut short by a failing sibling; as good as failed.
                    Some(Reason::FailFast { .. }) => blocked |= !self.allow_failure,
                    _ => blocked = true,
                },
            }
        }

        if blocked {
            GroupOutcome::Blocked
        } else if any_succeeded {
            GroupOutcome::Satisfied
        } else {
            GroupOutcome::SatisfiedAbsent
        }
    }
}
