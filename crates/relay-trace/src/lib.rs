//! Tracing for Relay.
//!
//! Subscriber setup (plain or JSON output, `RUST_LOG` aware) and span
//! helpers carrying run, workflow, ref and job attributes.

pub mod spans;
pub mod tracer;

pub use spans::{RunAttributes, grant_span, job_span, run_span};
pub use tracer::{TracerError, TracingConfig, init_test_logging, init_tracing};
