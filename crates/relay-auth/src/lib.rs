//! Trust grants for Relay publish gates.
//!
//! This crate provides a policy-checked trust provider that issues
//! short-lived signed identity tokens to publish, sign and release jobs.

pub mod jwt;
pub mod policy;
pub mod provider;

pub use jwt::{GrantClaims, GrantClaimsBuilder, JwtError, JwtSigner, JwtVerifier};
pub use policy::{GrantRule, TrustPolicy};
pub use provider::JwtTrustProvider;
