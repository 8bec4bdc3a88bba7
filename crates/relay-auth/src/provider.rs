//! Policy-checked trust provider issuing signed grant tokens.

use crate::jwt::{GrantClaims, JwtError, JwtSigner};
use crate::policy::TrustPolicy;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use relay_core::ports::TrustProvider;
use relay_core::run::RunContext;
use relay_core::trust::{TrustGrant, TrustScope};
use relay_core::{GrantId, TrustDenied};
use tracing::{info, warn};

const MAX_TTL_SECONDS: i64 = 24 * 60 * 60;

pub struct JwtTrustProvider {
    policy: TrustPolicy,
    signer: JwtSigner,
}

impl JwtTrustProvider {
    pub fn new(policy: TrustPolicy, signer: JwtSigner) -> Self {
        Self { policy, signer }
    }

    /// HS256 provider from a shared secret.
    pub fn with_secret(policy: TrustPolicy, secret: &[u8]) -> Result<Self, JwtError> {
        Ok(Self::new(policy, JwtSigner::new_hs256(secret, None)?))
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }
}

#[async_trait]
impl TrustProvider for JwtTrustProvider {
    async fn grant(&self, scope: &TrustScope, ctx: &RunContext) -> Result<TrustGrant, TrustDenied> {
        if let Err(reason) = self.policy.evaluate(scope, ctx) {
            warn!(
                run_id = %scope.run_id,
                job = %scope.job,
                action = %scope.action,
                reason = %reason,
                "Trust grant denied"
            );
            return Err(TrustDenied::new(scope.action, reason));
        }

        let grant_id = GrantId::new();
        let ttl_seconds = i64::try_from(self.policy.token_ttl_seconds)
            .unwrap_or(i64::MAX)
            .min(MAX_TTL_SECONDS);
        let ttl = Duration::seconds(ttl_seconds);
        let claims = GrantClaims::builder(&self.policy.issuer, &self.policy.audience)
            .ttl(ttl)
            .jti(grant_id.to_string())
            .build(scope, ctx);

        let token = self
            .signer
            .sign(&claims)
            .map_err(|e| TrustDenied::new(scope.action, format!("signing failed: {}", e)))?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or_else(|| Utc::now() + ttl);

        info!(
            run_id = %scope.run_id,
            job = %scope.job,
            action = %scope.action,
            grant_id = %grant_id,
            "Trust grant issued"
        );
        Ok(TrustGrant::with_id(grant_id, scope.clone(), token, expires_at))
    }
}
