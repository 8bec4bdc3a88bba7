//! CLI command definitions.

use clap::{Args, Subcommand};
use relay_core::run::TriggerEvent;
use relay_core::workflow::EventKind;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file
    Validate {
        /// Path to workflow file
        #[arg(default_value = "relay.yaml")]
        path: PathBuf,
    },

    /// Show what a trigger would run, without running it
    Plan {
        /// Path to workflow file
        #[arg(default_value = "relay.yaml")]
        path: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Run a workflow locally
    Run {
        /// Path to workflow file
        #[arg(default_value = "relay.yaml")]
        path: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,

        /// Maximum jobs running at once (overrides config)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Echo step output as it runs
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the workflow JSON schema
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Describes the event that triggers a run.
#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Event kind: push, pull_request or tag
    #[arg(short, long, default_value = "push")]
    pub event: EventKind,

    /// Git ref, e.g. refs/heads/main or a bare branch name
    #[arg(short, long = "ref", default_value = "refs/heads/main")]
    pub git_ref: String,

    /// Treat the ref as a tag
    #[arg(long)]
    pub tag: bool,

    /// Who triggered the run
    #[arg(long, env = "RELAY_ACTOR")]
    pub actor: Option<String>,

    /// Run variables visible to conditions as vars.NAME (KEY=VALUE)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub vars: Vec<(String, String)>,
}

impl TriggerArgs {
    pub fn to_event(&self) -> TriggerEvent {
        let git_ref = normalize_ref(self.event, &self.git_ref, self.tag);
        let mut event = TriggerEvent::new(self.event, git_ref);
        event.is_tag = event.is_tag || self.tag;
        event.actor = self.actor.clone();
        event.variables = self.vars.iter().cloned().collect();
        event
    }
}

/// Expand a bare branch or tag name into a full ref.
fn normalize_ref(event: EventKind, git_ref: &str, tag: bool) -> String {
    if git_ref.starts_with("refs/") {
        return git_ref.to_string();
    }
    if tag || event == EventKind::Tag {
        format!("refs/tags/{}", git_ref)
    } else {
        format!("refs/heads/{}", git_ref)
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(event: EventKind, git_ref: &str, tag: bool) -> TriggerArgs {
        TriggerArgs {
            event,
            git_ref: git_ref.to_string(),
            tag,
            actor: None,
            vars: vec![("channel".to_string(), "stable".to_string())],
        }
    }

    #[test]
    fn test_bare_names_are_expanded() {
        let event = args(EventKind::Push, "main", false).to_event();
        assert_eq!(event.git_ref, "refs/heads/main");
        assert!(!event.is_tag);
        assert_eq!(event.variables.get("channel").map(String::as_str), Some("stable"));

        let event = args(EventKind::Push, "v1.2.0", true).to_event();
        assert_eq!(event.git_ref, "refs/tags/v1.2.0");
        assert!(event.is_tag);

        let event = args(EventKind::Tag, "v1.2.0", false).to_event();
        assert_eq!(event.git_ref, "refs/tags/v1.2.0");
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("a=b=c"),
            Ok(("a".to_string(), "b=c".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
