//! End-to-end scheduler tests against mock executor and trust providers.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use relay_artifacts::{ArtifactStore, MemoryBackend};
use relay_core::artifact::RetentionPolicy;
use relay_core::condition::Condition;
use relay_core::events::Event;
use relay_core::ids::JobInstanceId;
use relay_core::ports::{EventBus, JobContext, JobExecutor, Outcome, TrustProvider};
use relay_core::run::{JobState, Reason, RunContext, RunStatus, TriggerEvent};
use relay_core::trust::{GateAction, TrustGrant, TrustScope};
use relay_core::workflow::{
    EventKind, JobTemplate, MatrixSpec, PublishGateSpec, TriggerConfig, WorkflowDefinition,
};
use relay_core::{DefinitionError, Error, TrustDenied};
use relay_scheduler::{BroadcastBus, Scheduler, SchedulerConfig};
use relay_trace::init_test_logging;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockExecutor {
    /// Display names (or template names) that report failure.
    failing: HashSet<String>,
    /// Templates that never finish on their own.
    hanging: HashSet<String>,
    /// Artifacts written per template.
    outputs: HashMap<String, Vec<(String, Vec<u8>)>>,
    /// Templates that stage their outputs before hanging or failing.
    eager: HashSet<String>,
    /// Template -> artifact it waits to see committed before finishing.
    wait_for: HashMap<String, String>,
    store: Option<Arc<ArtifactStore>>,

    journal: Mutex<Vec<String>>,
    inputs: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    tokens: Mutex<Vec<String>>,
    aborted: Mutex<Vec<JobInstanceId>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockExecutor {
    fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn hanging(mut self, job: &str) -> Self {
        self.hanging.insert(job.to_string());
        self
    }

    fn output(mut self, job: &str, name: &str, data: &[u8]) -> Self {
        self.outputs
            .entry(job.to_string())
            .or_default()
            .push((name.to_string(), data.to_vec()));
        self
    }

    fn eager(mut self, job: &str) -> Self {
        self.eager.insert(job.to_string());
        self
    }

    fn waiting_for(mut self, job: &str, artifact: &str, store: Arc<ArtifactStore>) -> Self {
        self.wait_for.insert(job.to_string(), artifact.to_string());
        self.store = Some(store);
        self
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn started(&self, name: &str) -> bool {
        self.journal().contains(&format!("start:{}", name))
    }

    fn position(&self, entry: &str) -> usize {
        self.journal()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{} not in journal", entry))
    }
}

#[async_trait]
impl JobExecutor for MockExecutor {
    async fn execute(&self, ctx: JobContext) -> relay_core::Result<Outcome> {
        let name = ctx.display_name.clone();
        self.journal.lock().unwrap().push(format!("start:{}", name));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let inputs = ctx
            .inputs
            .iter()
            .map(|i| (i.meta.name.clone(), i.data.clone()))
            .collect();
        self.inputs.lock().unwrap().insert(ctx.job.clone(), inputs);
        if let Some(grant) = ctx.grant {
            self.tokens.lock().unwrap().push(grant.consume());
        }

        tokio::time::sleep(Duration::from_millis(10)).await;

        let eager = self.eager.contains(&ctx.job);
        if eager {
            for (artifact, data) in self.outputs.get(&ctx.job).cloned().unwrap_or_default() {
                ctx.outputs.put(&artifact, data).await?;
            }
            self.journal.lock().unwrap().push(format!("staged:{}", name));
        }

        if self.hanging.contains(&ctx.job) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if let (Some(artifact), Some(store)) = (self.wait_for.get(&ctx.job), &self.store) {
            loop {
                let committed = store.list(ctx.run_id).await?;
                if committed.iter().any(|m| &m.name == artifact) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        if !eager {
            for (artifact, data) in self.outputs.get(&ctx.job).cloned().unwrap_or_default() {
                ctx.outputs.put(&artifact, data).await?;
            }
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push(format!("end:{}", name));

        if self.failing.contains(&name) || self.failing.contains(&ctx.job) {
            Ok(Outcome::failure("exit code 1"))
        } else {
            Ok(Outcome::success().with_logs(vec![format!("ran {}", name)]))
        }
    }

    async fn abort(&self, instance: JobInstanceId) -> relay_core::Result<()> {
        self.aborted.lock().unwrap().push(instance);
        Ok(())
    }
}

struct MockTrust {
    allow: bool,
    requests: Mutex<Vec<TrustScope>>,
}

impl MockTrust {
    fn allowing() -> Self {
        Self {
            allow: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn denying() -> Self {
        Self {
            allow: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TrustProvider for MockTrust {
    async fn grant(
        &self,
        scope: &TrustScope,
        _ctx: &RunContext,
    ) -> Result<TrustGrant, TrustDenied> {
        self.requests.lock().unwrap().push(scope.clone());
        if self.allow {
            Ok(TrustGrant::new(
                scope.clone(),
                format!("token-{}", scope.job),
                Utc::now() + chrono::Duration::minutes(5),
            ))
        } else {
            Err(TrustDenied::new(scope.action, "ref not allowed to publish"))
        }
    }
}

fn store() -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::new(Arc::new(MemoryBackend::new())))
}

fn scheduler(
    executor: &Arc<MockExecutor>,
    trust: &Arc<MockTrust>,
    store: &Arc<ArtifactStore>,
    max_concurrent: usize,
) -> Scheduler {
    Scheduler::new(
        SchedulerConfig::default().with_max_concurrent_jobs(max_concurrent),
        executor.clone(),
        trust.clone(),
        store.clone(),
    )
}

fn workflow(jobs: Vec<JobTemplate>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "release".to_string(),
        description: None,
        triggers: vec![],
        jobs,
    }
}

fn publish_gate() -> JobTemplate {
    JobTemplate::new("publish").with_gate(
        PublishGateSpec::new(GateAction::Publish).requires(Condition::event_is_not("pull_request")),
    )
}

#[tokio::test]
async fn test_cycle_rejected_before_dispatch() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default());
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("build"),
        JobTemplate::new("a").needs(&["build", "b"]),
        JobTemplate::new("b").needs(&["a"]),
    ]);

    let err = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Definition(DefinitionError::CycleDetected(_))
    ));
    assert!(executor.journal().is_empty());
}

#[tokio::test]
async fn test_trigger_rejected() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default());
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let err = scheduler
        .execute(&workflow(vec![JobTemplate::new("build")]), &TriggerEvent::tag("v1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TriggerRejected(_)));
    assert!(executor.journal().is_empty());
}

#[tokio::test]
async fn test_dependent_cancelled_when_dependency_fails() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().failing("a"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![JobTemplate::new("a"), JobTemplate::new("b").needs(&["a"])]);
    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.state_of("a"), Some(JobState::Failed));
    assert_eq!(report.state_of("b"), Some(JobState::Cancelled));

    let a = report.instances_of("a").next().unwrap();
    assert_eq!(report.root_cause, Some(a.id));
    let b = report.instances_of("b").next().unwrap();
    assert_eq!(
        b.reason,
        Some(Reason::DependencyFailed {
            dependency: "a".to_string()
        })
    );
    assert!(!executor.started("b"));
}

#[tokio::test]
async fn test_matrix_fan_in_waits_for_every_cell() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default());
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("test").with_matrix(
            MatrixSpec::default()
                .axis("x", vec![json!(1), json!(2)])
                .axis("y", vec![json!("a"), json!("b")]),
        ),
        JobTemplate::new("report").needs(&["test"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);

    let cells: Vec<_> = report.instances_of("test").collect();
    assert_eq!(cells.len(), 4);
    let combos: HashSet<String> = cells
        .iter()
        .map(|c| serde_json::to_string(&c.matrix).unwrap())
        .collect();
    assert_eq!(combos.len(), 4);

    let report_start = executor.position("start:report");
    for cell in ["test (1, a)", "test (1, b)", "test (2, a)", "test (2, b)"] {
        assert!(executor.position(&format!("end:{}", cell)) < report_start);
    }
}

#[tokio::test]
async fn test_one_failed_cell_fails_template() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().failing("test (2, b)"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("test").with_matrix(
            MatrixSpec::default()
                .axis("x", vec![json!(1), json!(2)])
                .axis("y", vec![json!("a"), json!("b")]),
        ),
        JobTemplate::new("report").needs(&["test"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let succeeded = report
        .instances_of("test")
        .filter(|i| i.state == JobState::Succeeded)
        .count();
    assert_eq!(succeeded, 3);
    assert_eq!(report.state_of("report"), Some(JobState::Cancelled));
    assert!(!executor.started("report"));

    let root = report.instance(report.root_cause.unwrap()).unwrap();
    assert_eq!(root.display_name, "test (2, b)");
}

#[tokio::test]
async fn test_fail_fast_cancels_unstarted_cells() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().failing("shard (1)"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 1);

    let mut matrix = MatrixSpec::default().axis("n", vec![json!(1), json!(2), json!(3)]);
    matrix.fail_fast = true;
    let wf = workflow(vec![JobTemplate::new("shard").with_matrix(matrix)]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    let cancelled: Vec<_> = report
        .instances_of("shard")
        .filter(|i| matches!(i.reason, Some(Reason::FailFast { .. })))
        .collect();
    assert_eq!(cancelled.len(), 2);
    assert_eq!(executor.journal().len(), 2);
}

#[tokio::test]
async fn test_artifacts_flow_to_dependents() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().output("build", "dist", b"wheel-bytes"));
    let trust = Arc::new(MockTrust::allowing());
    let store = store();
    let scheduler = scheduler(&executor, &trust, &store, 4);

    let wf = workflow(vec![
        JobTemplate::new("build"),
        JobTemplate::new("test").needs(&["build"]),
        JobTemplate::new("package")
            .needs(&["test"])
            .with_inputs(&["dist"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let inputs = executor.inputs.lock().unwrap().get("package").cloned().unwrap();
    assert_eq!(inputs, vec![("dist".to_string(), b"wheel-bytes".to_vec())]);

    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.artifacts[0].name, "dist");
    // Run-scoped artifacts are collected once the run is archived.
    assert!(store.list(report.run.id).await.is_err());
}

#[tokio::test]
async fn test_non_dependent_consumer_is_forbidden() {
    init_test_logging();
    let store = store();
    let executor = Arc::new(
        MockExecutor::default()
            .output("build", "dist", b"wheel-bytes")
            .waiting_for("wait", "dist", store.clone()),
    );
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store, 4);

    // lint runs after dist is committed but does not depend on build.
    let wf = workflow(vec![
        JobTemplate::new("build"),
        JobTemplate::new("wait"),
        JobTemplate::new("lint").needs(&["wait"]).with_inputs(&["dist"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    let lint = report.instances_of("lint").next().unwrap();
    assert_eq!(lint.state, JobState::Failed);
    assert_eq!(
        lint.reason,
        Some(Reason::ArtifactForbidden {
            name: "dist".to_string()
        })
    );
    assert!(!executor.started("lint"));
    assert_eq!(report.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_skipped_dependency_means_missing_artifact() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().output("build", "dist", b"x"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("build").with_condition(Condition::parse("is_tag").unwrap()),
        JobTemplate::new("notes").needs(&["build"]),
        JobTemplate::new("package")
            .needs(&["build"])
            .with_inputs(&["dist"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    let build = report.instances_of("build").next().unwrap();
    assert_eq!(build.state, JobState::Skipped);
    assert_eq!(build.reason, Some(Reason::ConditionNotMet));
    assert_eq!(report.state_of("notes"), Some(JobState::Succeeded));

    let package = report.instances_of("package").next().unwrap();
    assert_eq!(package.state, JobState::Failed);
    assert_eq!(
        package.reason,
        Some(Reason::MissingArtifact {
            name: "dist".to_string()
        })
    );
    assert!(!executor.started("build"));
    assert!(!executor.started("package"));
}

#[tokio::test]
async fn test_gate_skipped_for_pull_requests() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default());
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let mut wf = workflow(vec![
        JobTemplate::new("build"),
        publish_gate().needs(&["build"]),
    ]);
    wf.triggers = vec![
        TriggerConfig {
            event: EventKind::Push,
            branches: vec!["main".to_string()],
            tags: vec![],
        },
        TriggerConfig {
            event: EventKind::PullRequest,
            branches: vec![],
            tags: vec![],
        },
    ];

    let report = scheduler
        .execute(&wf, &TriggerEvent::pull_request(42))
        .await
        .unwrap();

    let publish = report.instances_of("publish").next().unwrap();
    assert_eq!(publish.state, JobState::Skipped);
    assert_eq!(publish.reason, Some(Reason::GateConditionNotMet));
    assert!(!executor.started("publish"));
    assert_eq!(trust.request_count(), 0);
    assert_eq!(report.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_gate_runs_with_grant() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().output("build", "dist", b"wheel"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("build"),
        publish_gate().needs(&["build"]).with_inputs(&["dist"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.state_of("publish"), Some(JobState::Succeeded));
    assert_eq!(executor.tokens.lock().unwrap().clone(), vec!["token-publish"]);

    let requests = trust.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let publish = report.instances_of("publish").next().unwrap();
    assert_eq!(requests[0].instance, publish.id);
    assert_eq!(requests[0].action, GateAction::Publish);
}

#[tokio::test]
async fn test_grant_denied_is_unauthorized() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default());
    let trust = Arc::new(MockTrust::denying());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![JobTemplate::new("build"), publish_gate().needs(&["build"])]);
    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    let publish = report.instances_of("publish").next().unwrap();
    assert_eq!(publish.state, JobState::Unauthorized);
    assert_eq!(publish.state.to_string(), "failed: unauthorized");
    assert!(matches!(publish.reason, Some(Reason::Unauthorized { .. })));
    assert!(!executor.started("publish"));
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.root_cause, Some(publish.id));
}

#[tokio::test]
async fn test_cancel_keeps_finished_jobs() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().hanging("slow"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("done"),
        JobTemplate::new("slow"),
        JobTemplate::new("later").needs(&["done", "slow"]),
    ]);

    let handle = scheduler
        .start(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = handle.snapshot().await;
            let state = |job: &str| snapshot.iter().find(|i| i.job == job).map(|i| i.state);
            if state("done") == Some(JobState::Succeeded) && state("slow") == Some(JobState::Running)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run never reached the expected state");

    handle.cancel().await.unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.state_of("done"), Some(JobState::Succeeded));
    assert_eq!(report.state_of("slow"), Some(JobState::Cancelled));
    assert_eq!(report.state_of("later"), Some(JobState::Cancelled));
    assert!(!executor.started("later"));

    let slow = report.instances_of("slow").next().unwrap();
    assert_eq!(executor.aborted.lock().unwrap().clone(), vec![slow.id]);
}

#[tokio::test]
async fn test_failed_job_outputs_are_discarded() {
    init_test_logging();
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(
        ArtifactStore::new(backend.clone()).with_default_retention(RetentionPolicy::Days(7)),
    );
    let executor = Arc::new(
        MockExecutor::default()
            .eager("bad")
            .failing("bad")
            .output("bad", "bad-out", b"half written")
            .output("ok", "ok-out", b"complete"),
    );
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store, 4);

    let wf = workflow(vec![JobTemplate::new("bad"), JobTemplate::new("ok")]);
    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert!(executor.journal().contains(&"staged:bad".to_string()));
    assert_eq!(report.state_of("bad"), Some(JobState::Failed));
    assert_eq!(report.state_of("ok"), Some(JobState::Succeeded));
    let names: Vec<&str> = report.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["ok-out"]);

    // Only the committed output outlives the run.
    assert_eq!(backend.len().await, 1);
    let run_id = report.run.id;
    assert_eq!(store.read_retained(run_id, "ok-out").await.unwrap(), b"complete");
    assert!(store.read_retained(run_id, "bad-out").await.is_err());
}

#[tokio::test]
async fn test_cancelled_job_outputs_are_discarded() {
    init_test_logging();
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(ArtifactStore::new(backend.clone()));
    let executor = Arc::new(
        MockExecutor::default()
            .eager("slow")
            .hanging("slow")
            .output("slow", "slow-out", b"partial")
            .output("done", "done-out", b"complete"),
    );
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store, 4);

    let wf = workflow(vec![JobTemplate::new("done"), JobTemplate::new("slow")]);
    let handle = scheduler
        .start(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = handle.snapshot().await;
            let done = snapshot
                .iter()
                .any(|i| i.job == "done" && i.state == JobState::Succeeded);
            if done && executor.journal().contains(&"staged:slow".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slow job never staged its output");

    handle.cancel().await.unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.state_of("slow"), Some(JobState::Cancelled));
    let names: Vec<&str> = report.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["done-out"]);
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_allow_failure_does_not_block() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().failing("flaky"));
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 4);

    let wf = workflow(vec![
        JobTemplate::new("flaky").allow_failure(),
        JobTemplate::new("deploy").needs(&["flaky"]),
    ]);

    let report = scheduler
        .execute(&wf, &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.state_of("flaky"), Some(JobState::Failed));
    assert_eq!(report.state_of("deploy"), Some(JobState::Succeeded));
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.root_cause, None);
}

#[tokio::test]
async fn test_concurrency_bound() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default());
    let trust = Arc::new(MockTrust::allowing());
    let scheduler = scheduler(&executor, &trust, &store(), 2);

    let jobs = (0..6).map(|i| JobTemplate::new(format!("job-{}", i))).collect();
    let report = scheduler
        .execute(&workflow(jobs), &TriggerEvent::push("main"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(executor.journal().len(), 12);
}

#[tokio::test]
async fn test_events_published() {
    init_test_logging();
    let executor = Arc::new(MockExecutor::default().output("build", "dist", b"x"));
    let trust = Arc::new(MockTrust::allowing());
    let bus = Arc::new(BroadcastBus::new());
    let mut stream = bus.subscribe("run.>").await.unwrap();
    let scheduler = scheduler(&executor, &trust, &store(), 4).with_event_bus(bus.clone());

    let report = scheduler
        .execute(&workflow(vec![JobTemplate::new("build")]), &TriggerEvent::push("main"))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(Ok(event)) = stream.next().await {
        let done = matches!(event, Event::RunCompleted(_));
        events.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(events.first(), Some(Event::RunCreated(_))));
    assert!(events.iter().all(|e| e.run_id() == report.run.id));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ArtifactCommitted(p) if p.name == "dist"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::JobStateChanged(p) if p.to_state == JobState::Succeeded
    )));
    match events.last() {
        Some(Event::RunCompleted(p)) => {
            assert_eq!(p.status, RunStatus::Succeeded);
            assert_eq!(p.jobs_succeeded, 1);
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}
