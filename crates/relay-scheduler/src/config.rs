//! Scheduler configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on instances running at once within a run.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Largest matrix a single template may expand to.
    #[serde(default = "default_max_matrix_size")]
    pub max_matrix_size: usize,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_matrix_size() -> usize {
    256
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_matrix_size: default_max_matrix_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_max_matrix_size(mut self, max: usize) -> Self {
        self.max_matrix_size = max;
        self
    }
}
