//! Relay Core
//!
//! Core domain types, traits, and error handling for Relay.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: the workflow definition, the run and job
//! instance model, the condition grammar, and the executor/trust ports.

pub mod artifact;
pub mod condition;
pub mod error;
pub mod events;
pub mod ids;
pub mod pattern;
pub mod ports;
pub mod run;
pub mod trust;
pub mod workflow;

pub use error::{ArtifactError, DefinitionError, Error, Result, TriggerRejected, TrustDenied};
pub use ids::*;
