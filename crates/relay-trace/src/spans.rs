//! Span creation for run and job execution.

use tracing::{Level, Span, span};

/// Span attributes shared by run and job spans.
#[derive(Default)]
pub struct RunAttributes {
    pub run_id: Option<String>,
    pub workflow: Option<String>,
    pub event: Option<String>,
    pub git_ref: Option<String>,
    pub job: Option<String>,
    pub instance_id: Option<String>,
}

impl RunAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, id: impl Into<String>, workflow: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self.workflow = Some(workflow.into());
        self
    }

    pub fn trigger(mut self, event: impl Into<String>, git_ref: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn job(mut self, name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        self.job = Some(name.into());
        self.instance_id = Some(instance_id.into());
        self
    }
}

/// Create a span for a whole run.
pub fn run_span(attrs: &RunAttributes) -> Span {
    span!(
        Level::INFO,
        "run",
        run.id = attrs.run_id.as_deref().unwrap_or(""),
        run.workflow = attrs.workflow.as_deref().unwrap_or(""),
        run.event = attrs.event.as_deref().unwrap_or(""),
        vcs.ref = attrs.git_ref.as_deref().unwrap_or(""),
    )
}

/// Create a span for one job instance.
pub fn job_span(attrs: &RunAttributes) -> Span {
    span!(
        Level::INFO,
        "job",
        run.id = attrs.run_id.as_deref().unwrap_or(""),
        job.name = attrs.job.as_deref().unwrap_or(""),
        job.instance = attrs.instance_id.as_deref().unwrap_or(""),
    )
}

/// Create a span for a trust grant request.
pub fn grant_span(attrs: &RunAttributes, action: &str) -> Span {
    span!(
        Level::INFO,
        "grant",
        run.id = attrs.run_id.as_deref().unwrap_or(""),
        job.name = attrs.job.as_deref().unwrap_or(""),
        grant.action = action,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_attributes_builder() {
        let attrs = RunAttributes::new()
            .run("run_123", "release")
            .trigger("tag", "refs/tags/v1.0.0")
            .job("publish", "job_456");

        assert_eq!(attrs.workflow, Some("release".to_string()));
        assert_eq!(attrs.git_ref, Some("refs/tags/v1.0.0".to_string()));
        assert_eq!(attrs.instance_id, Some("job_456".to_string()));
    }
}
