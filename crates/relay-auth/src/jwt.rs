//! JWT generation for grant tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use relay_core::run::RunContext;
use relay_core::trust::{GateAction, TrustScope};
use relay_core::workflow::Permission;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Claims carried by a grant token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub run_id: String,
    pub job: String,
    pub instance_id: String,
    pub action: GateAction,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub ref_type: String,
    pub event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
}

impl GrantClaims {
    pub fn builder(issuer: impl Into<String>, audience: impl Into<String>) -> GrantClaimsBuilder {
        GrantClaimsBuilder::new(issuer, audience)
    }
}

/// Builder for grant claims.
pub struct GrantClaimsBuilder {
    issuer: String,
    audience: String,
    ttl: Duration,
    jti: Option<String>,
}

impl GrantClaimsBuilder {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            ttl: Duration::minutes(5),
            jti: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn jti(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Subject: `run:<id>:job:<name>:action:<action>`.
    pub fn build(self, scope: &TrustScope, ctx: &RunContext) -> GrantClaims {
        let now = Utc::now();
        let exp = now + self.ttl;

        GrantClaims {
            iss: self.issuer,
            sub: format!("run:{}:job:{}:action:{}", scope.run_id, scope.job, scope.action),
            aud: self.audience,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: self
                .jti
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            run_id: scope.run_id.to_string(),
            job: scope.job.clone(),
            instance_id: scope.instance.to_string(),
            action: scope.action,
            git_ref: ctx.git_ref.clone(),
            ref_type: ctx.ref_type().to_string(),
            event_name: ctx.event.to_string(),
            actor: ctx.actor.clone(),
            environment: scope.environment.clone(),
            permissions: scope.permissions.clone(),
        }
    }
}

/// JWT signer for grant tokens.
pub struct JwtSigner {
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    key_id: Option<String>,
}

impl JwtSigner {
    /// Create a signer with a shared HMAC secret (HS256).
    pub fn new_hs256(secret: &[u8], key_id: Option<String>) -> Result<Self, JwtError> {
        if secret.len() < 16 {
            return Err(JwtError::InvalidKey(
                "HS256 secret must be at least 16 bytes".to_string(),
            ));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            key_id,
        })
    }

    /// Create a new JWT signer with RS256 algorithm.
    pub fn new_rs256(private_key_pem: &[u8], key_id: Option<String>) -> Result<Self, JwtError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        Ok(Self {
            encoding_key,
            algorithm: Algorithm::RS256,
            key_id,
        })
    }

    /// Sign claims and produce a JWT.
    pub fn sign(&self, claims: &GrantClaims) -> Result<String, JwtError> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();

        let token = encode(&header, claims, &self.encoding_key)?;
        Ok(token)
    }
}

/// JWT verifier for grant tokens.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new_hs256(secret: &[u8], issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Create a new JWT verifier with RS256 algorithm.
    pub fn new_rs256(public_key_pem: &[u8], issuer: &str, audience: &str) -> Result<Self, JwtError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    /// Verify and decode a JWT.
    pub fn verify(&self, token: &str) -> Result<GrantClaims, JwtError> {
        let token_data = decode::<GrantClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }
}
