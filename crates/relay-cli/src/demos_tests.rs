//! Runs the workflows shipped in `demos/` through the real stack.

use crate::config::CliConfig;
use crate::executor::ShellExecutor;
use crate::loader::load_workflow;
use relay_artifacts::{ArtifactStore, FsBackend};
use relay_auth::JwtTrustProvider;
use relay_core::run::{JobState, Reason, RunStatus, TriggerEvent};
use relay_scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;

fn demos_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

fn demo_config() -> CliConfig {
    CliConfig::load_from(&demos_dir().join("config.yaml")).unwrap()
}

fn scheduler(config: &CliConfig, dir: &tempfile::TempDir) -> Scheduler {
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    let store = Arc::new(ArtifactStore::new(Arc::new(FsBackend::new(dir.path()))));
    let trust = Arc::new(JwtTrustProvider::with_secret(config.trust.clone(), b"demo-secret").unwrap());
    let executor = Arc::new(ShellExecutor::new(workspace, dir.path().join("scratch")));
    Scheduler::new(config.scheduler.clone(), executor, trust, store)
}

#[test]
fn test_demos_validate() {
    let config = demo_config();
    for name in ["ci.yaml", "release.yaml"] {
        let path = demos_dir().join(name);
        let loaded = load_workflow(&path, config.scheduler.max_matrix_size)
            .unwrap_or_else(|e| panic!("{} failed to load: {}", name, e));
        assert!(!loaded.definition.jobs.is_empty());
    }

    let ci = load_workflow(&demos_dir().join("ci.yaml"), 256).unwrap();
    assert!(ci.instance_counts.contains(&("test".to_string(), 3)));
}

#[tokio::test]
async fn test_ci_pull_request_skips_report() {
    let config = demo_config();
    let dir = tempfile::tempdir().unwrap();
    let workflow = load_workflow(&demos_dir().join("ci.yaml"), 256)
        .unwrap()
        .definition;

    let report = scheduler(&config, &dir)
        .execute(&workflow, &TriggerEvent::pull_request(42))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.instances_of("test").count(), 3);
    assert!(
        report
            .instances_of("test")
            .all(|i| i.state == JobState::Succeeded)
    );
    assert_eq!(report.state_of("report"), Some(JobState::Skipped));
}

#[tokio::test]
async fn test_release_tag_publishes() {
    let config = demo_config();
    let dir = tempfile::tempdir().unwrap();
    let workflow = load_workflow(&demos_dir().join("release.yaml"), 256)
        .unwrap()
        .definition;

    let report = scheduler(&config, &dir)
        .execute(&workflow, &TriggerEvent::tag("v1.4.0"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded, "{:#?}", report.jobs);
    assert_eq!(report.state_of("publish"), Some(JobState::Succeeded));
    let names: Vec<&str> = report.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert!(names.contains(&"dist.tar.gz"));
    assert!(names.contains(&"dist.sha256"));
}

#[tokio::test]
async fn test_release_branch_push_skips_gate() {
    let config = demo_config();
    let dir = tempfile::tempdir().unwrap();
    let workflow = load_workflow(&demos_dir().join("release.yaml"), 256)
        .unwrap()
        .definition;

    let report = scheduler(&config, &dir)
        .execute(&workflow, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.state_of("checksum"), Some(JobState::Succeeded));
    let publish = report.instances_of("publish").next().unwrap();
    assert_eq!(publish.state, JobState::Skipped);
    assert_eq!(publish.reason, Some(Reason::GateConditionNotMet));
}

#[tokio::test]
async fn test_release_without_grant_rule_is_unauthorized() {
    let mut config = demo_config();
    config.trust.rules.clear();
    let dir = tempfile::tempdir().unwrap();
    let workflow = load_workflow(&demos_dir().join("release.yaml"), 256)
        .unwrap()
        .definition;

    let report = scheduler(&config, &dir)
        .execute(&workflow, &TriggerEvent::tag("v1.4.0"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.state_of("publish"), Some(JobState::Unauthorized));
    assert_eq!(report.state_of("checksum"), Some(JobState::Succeeded));
}
