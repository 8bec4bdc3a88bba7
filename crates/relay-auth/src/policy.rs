//! Grant policy: which gates may obtain a token, and under which refs.

use relay_core::pattern::any_match;
use relay_core::run::RunContext;
use relay_core::trust::{GateAction, TrustScope};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_ttl")]
    pub token_ttl_seconds: u64,
    /// First rule matching the scope's action and environment decides.
    #[serde(default)]
    pub rules: Vec<GrantRule>,
}

fn default_issuer() -> String {
    "https://relay.local".to_string()
}

fn default_audience() -> String {
    "relay".to_string()
}

fn default_ttl() -> u64 {
    300
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            audience: default_audience(),
            token_ttl_seconds: default_ttl(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRule {
    /// `None` applies to every action.
    #[serde(default)]
    pub action: Option<GateAction>,
    /// `None` applies to every environment, including none.
    #[serde(default)]
    pub environment: Option<String>,
    /// Ref globs the run must match. Empty allows any ref.
    #[serde(default)]
    pub allowed_refs: Vec<String>,
    #[serde(default = "default_true")]
    pub deny_pull_requests: bool,
    /// Empty allows any actor.
    #[serde(default)]
    pub allowed_actors: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl GrantRule {
    pub fn for_action(action: GateAction) -> Self {
        Self {
            action: Some(action),
            environment: None,
            allowed_refs: Vec::new(),
            deny_pull_requests: true,
            allowed_actors: Vec::new(),
        }
    }

    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn allow_refs(mut self, refs: &[&str]) -> Self {
        self.allowed_refs = refs.iter().map(|r| r.to_string()).collect();
        self
    }

    fn applies_to(&self, scope: &TrustScope) -> bool {
        let action_ok = self.action.is_none_or(|a| a == scope.action);
        let env_ok = match &self.environment {
            None => true,
            Some(env) => scope.environment.as_deref() == Some(env.as_str()),
        };
        action_ok && env_ok
    }

    fn check(&self, ctx: &RunContext) -> Result<(), String> {
        if self.deny_pull_requests && ctx.is_pull_request {
            return Err("grants are not issued to pull request runs".to_string());
        }
        if !self.allowed_refs.is_empty() && !any_match(&self.allowed_refs, &ctx.git_ref) {
            return Err(format!("ref '{}' is not allowed", ctx.git_ref));
        }
        if !self.allowed_actors.is_empty() {
            let allowed = ctx
                .actor
                .as_deref()
                .is_some_and(|actor| self.allowed_actors.iter().any(|a| a == actor));
            if !allowed {
                return Err("actor is not allowed".to_string());
            }
        }
        Ok(())
    }
}

impl TrustPolicy {
    pub fn with_rule(mut self, rule: GrantRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Decide a request. `Err` carries the denial reason.
    pub fn evaluate(&self, scope: &TrustScope, ctx: &RunContext) -> Result<(), String> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.applies_to(scope))
            .ok_or_else(|| {
                format!(
                    "no grant rule for {} in environment '{}'",
                    scope.action,
                    scope.environment.as_deref().unwrap_or("-")
                )
            })?;
        rule.check(ctx)
    }
}
