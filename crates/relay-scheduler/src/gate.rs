//! Publish gate admission.

use relay_core::TrustDenied;
use relay_core::ports::TrustProvider;
use relay_core::run::{JobInstance, Run, RunContext};
use relay_core::trust::{GateAction, TrustGrant, TrustScope};
use relay_core::workflow::JobTemplate;
use relay_trace::{RunAttributes, grant_span};
use std::sync::Arc;
use tracing::{Instrument, info, warn};

/// Whether the gate's required condition holds. Non-gates always pass.
pub fn requirement_holds(template: &JobTemplate, ctx: &RunContext) -> bool {
    match template.gate.as_ref().and_then(|g| g.requires.as_ref()) {
        Some(condition) => condition.allows(ctx),
        None => true,
    }
}

/// Grant scope for one gate instance.
pub fn gate_scope(
    run: &Run,
    instance: &JobInstance,
    template: &JobTemplate,
    action: GateAction,
) -> TrustScope {
    TrustScope {
        run_id: run.id,
        instance: instance.id,
        job: template.name.clone(),
        action,
        environment: template.environment.as_ref().map(|e| e.name.clone()),
        permissions: template.permissions.clone(),
    }
}

/// Requests trust grants for gate instances.
#[derive(Clone)]
pub struct PublishGate {
    trust: Arc<dyn TrustProvider>,
}

impl PublishGate {
    pub fn new(trust: Arc<dyn TrustProvider>) -> Self {
        Self { trust }
    }

    /// Ask the provider for a grant scoped to exactly this instance.
    pub async fn authorize(
        &self,
        run: &Run,
        instance: &JobInstance,
        template: &JobTemplate,
    ) -> Result<TrustGrant, TrustDenied> {
        let Some(gate) = &template.gate else {
            return Err(TrustDenied::new(
                GateAction::Publish,
                format!("job '{}' is not a publish gate", template.name),
            ));
        };
        let scope = gate_scope(run, instance, template, gate.action);
        let attrs = RunAttributes::new()
            .run(run.id.to_string(), &run.workflow_name)
            .job(&template.name, instance.id.to_string());

        async {
            let grant = self.trust.grant(&scope, &run.context).await.inspect_err(|denied| {
                warn!(job = %instance.display_name, reason = %denied.reason, "Trust grant denied");
            })?;

            if grant.scope().instance != instance.id || grant.scope().action != gate.action {
                warn!(job = %instance.display_name, "Trust grant scope mismatch");
                return Err(TrustDenied::new(gate.action, "grant scope does not match gate"));
            }
            if grant.is_expired() {
                return Err(TrustDenied::new(gate.action, "grant expired before use"));
            }

            info!(
                job = %instance.display_name,
                grant_id = %grant.id(),
                expires_at = %grant.expires_at(),
                "Trust grant issued"
            );
            Ok(grant)
        }
        .instrument(grant_span(&attrs, &gate.action.to_string()))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use relay_core::condition::Condition;
    use relay_core::ids::JobInstanceId;
    use relay_core::workflow::{EventKind, PublishGateSpec};

    struct FixedTrust {
        wrong_instance: bool,
    }

    #[async_trait]
    impl TrustProvider for FixedTrust {
        async fn grant(
            &self,
            scope: &TrustScope,
            _ctx: &RunContext,
        ) -> Result<TrustGrant, TrustDenied> {
            let mut scope = scope.clone();
            if self.wrong_instance {
                scope.instance = JobInstanceId::new();
            }
            Ok(TrustGrant::new(
                scope,
                "token".to_string(),
                Utc::now() + Duration::minutes(5),
            ))
        }
    }

    fn publish_template() -> JobTemplate {
        JobTemplate::new("publish").with_gate(
            PublishGateSpec::new(GateAction::Publish)
                .requires(Condition::event_is_not("pull_request")),
        )
    }

    #[test]
    fn test_requirement_holds() {
        let template = publish_template();
        let push = RunContext::new(EventKind::Push, "refs/heads/main");
        let pr = RunContext::new(EventKind::PullRequest, "refs/pull/1/merge");

        assert!(requirement_holds(&template, &push));
        assert!(!requirement_holds(&template, &pr));
        assert!(requirement_holds(&JobTemplate::new("build"), &pr));
    }

    #[tokio::test]
    async fn test_authorize_checks_scope() {
        let template = publish_template();
        let run = Run::new("release", RunContext::new(EventKind::Tag, "refs/tags/v1"));
        let instance = JobInstance::new(run.id, "publish", Default::default());

        let gate = PublishGate::new(Arc::new(FixedTrust {
            wrong_instance: false,
        }));
        let grant = gate.authorize(&run, &instance, &template).await.unwrap();
        assert_eq!(grant.scope().instance, instance.id);

        let gate = PublishGate::new(Arc::new(FixedTrust {
            wrong_instance: true,
        }));
        assert!(gate.authorize(&run, &instance, &template).await.is_err());
    }
}
