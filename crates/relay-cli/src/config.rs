//! CLI configuration management.

use relay_auth::TrustPolicy;
use relay_scheduler::SchedulerConfig;
use relay_trace::TracingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration, read from `config.yaml` in the platform config dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Which publish gates may obtain a token. No rules means every gate
    /// is denied.
    #[serde(default)]
    pub trust: TrustPolicy,
    /// Defaults to `warn`.
    #[serde(default = "default_tracing")]
    pub tracing: TracingConfig,
    /// Where committed artifacts are kept. Defaults to the platform data dir.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

fn default_tracing() -> TracingConfig {
    TracingConfig::default().with_level("warn")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            trust: TrustPolicy::default(),
            tracing: default_tracing(),
            artifact_dir: None,
        }
    }
}

impl CliConfig {
    /// Load configuration from the default location, or defaults if absent.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Resolved artifact directory.
    pub fn artifact_dir(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        match &self.artifact_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join("artifacts")),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, Box<dyn std::error::Error>> {
    directories::ProjectDirs::from("dev", "relay", "relay")
        .ok_or_else(|| "Could not determine config directory".into())
}
