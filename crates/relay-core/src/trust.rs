//! Publish gate trust types.
//!
//! A [`TrustGrant`] authorizes exactly one gate instance to perform one
//! privileged action. It is deliberately neither `Clone` nor serializable:
//! the only way to use it is [`TrustGrant::consume`], which moves the token out.

use crate::ids::{GrantId, JobInstanceId, RunId};
use crate::workflow::Permission;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Irreversible action a publish gate performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Publish,
    Sign,
    Release,
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateAction::Publish => f.write_str("publish"),
            GateAction::Sign => f.write_str("sign"),
            GateAction::Release => f.write_str("release"),
        }
    }
}

/// What a grant is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustScope {
    pub run_id: RunId,
    pub instance: JobInstanceId,
    pub job: String,
    pub action: GateAction,
    pub environment: Option<String>,
    pub permissions: Vec<Permission>,
}

/// Ephemeral authorization for a single gate instance.
pub struct TrustGrant {
    id: GrantId,
    scope: TrustScope,
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TrustGrant {
    pub fn new(scope: TrustScope, token: String, expires_at: DateTime<Utc>) -> Self {
        Self::with_id(GrantId::new(), scope, token, expires_at)
    }

    /// Grant whose id was already bound into the token.
    pub fn with_id(
        id: GrantId,
        scope: TrustScope,
        token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            scope,
            token,
            issued_at: Utc::now(),
            expires_at,
        }
    }

    pub fn id(&self) -> GrantId {
        self.id
    }

    pub fn scope(&self) -> &TrustScope {
        &self.scope
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Move the credential out. The grant is gone afterwards.
    pub fn consume(self) -> String {
        self.token
    }
}

impl fmt::Debug for TrustGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustGrant")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
