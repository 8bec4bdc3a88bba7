//! Run orchestration for Relay.
//!
//! Takes a workflow and a trigger event through trigger evaluation, graph
//! validation and matrix expansion, then drives the resulting job instances
//! to completion: dependency resolution, bounded parallel dispatch, publish
//! gate authorization, artifact commit and cancellation.

pub mod bus;
pub mod config;
pub mod dag;
pub mod gate;
pub mod group;
pub mod matrix;
pub mod queue;
pub mod scheduler;
pub mod table;
pub mod triggers;
pub mod worker;

pub use bus::BroadcastBus;
pub use config::SchedulerConfig;
pub use dag::{DagBuilder, JobGraph};
pub use matrix::MatrixExpander;
pub use scheduler::{Canceller, RunHandle, RunPlan, Scheduler};
pub use triggers::TriggerEvaluator;
