//! Workflow definition types.
//!
//! These types represent the authored job graph: templates, their
//! dependencies, guards, matrices and gates.

use crate::condition::Condition;
use crate::trust::GateAction;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    pub jobs: Vec<JobTemplate>,
}

impl WorkflowDefinition {
    pub fn job(&self, name: &str) -> Option<&JobTemplate> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    pub event: EventKind,
    /// Branch globs. Empty matches every branch.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Tag globs. Empty matches every tag.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Tag,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Tag => "tag",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" | "pr" => Ok(EventKind::PullRequest),
            "tag" => Ok(EventKind::Tag),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobTemplate {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
    #[serde(default)]
    pub needs: Vec<String>,
    /// Guard evaluated once against the run context; false skips every instance.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentRequirement>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Marks the job as a publish gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<PublishGateSpec>,
    #[serde(default, alias = "continue_on_error")]
    pub allow_failure: bool,
    /// Artifact names this job reads from its upstream jobs.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl JobTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            steps: Vec::new(),
            needs: Vec::new(),
            condition: None,
            matrix: None,
            environment: None,
            permissions: Vec::new(),
            gate: None,
            allow_failure: false,
            inputs: Vec::new(),
        }
    }

    pub fn needs(mut self, deps: &[&str]) -> Self {
        self.needs = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_matrix(mut self, matrix: MatrixSpec) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_gate(mut self, gate: PublishGateSpec) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|i| i.to_string()).collect();
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    pub fn is_gate(&self) -> bool {
        self.gate.is_some()
    }
}

/// Opaque to the scheduler; interpreted by the executor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDescriptor {
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MatrixSpec {
    /// Axis name to ordered values. Declaration order is the expansion order.
    pub axes: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

impl MatrixSpec {
    pub fn axis(mut self, name: &str, values: Vec<serde_json::Value>) -> Self {
        self.axes.insert(name.to_string(), values);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentRequirement {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub protected_variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    ContentsRead,
    ContentsWrite,
    IdTokenWrite,
    PackagesWrite,
    AttestationsWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PublishGateSpec {
    pub action: GateAction,
    /// Must hold for the run context or the gate resolves skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub requires: Option<Condition>,
}

impl PublishGateSpec {
    pub fn new(action: GateAction) -> Self {
        Self {
            action,
            requires: None,
        }
    }

    pub fn requires(mut self, condition: Condition) -> Self {
        self.requires = Some(condition);
        self
    }
}
