//! Command handlers.

use crate::commands::TriggerArgs;
use crate::config::CliConfig;
use crate::executor::ShellExecutor;
use crate::loader::load_workflow;
use console::style;
use futures::StreamExt;
use relay_artifacts::{ArtifactStore, FsBackend};
use relay_auth::JwtTrustProvider;
use relay_core::events::Event;
use relay_core::ports::EventBus;
use relay_core::run::{JobInstance, JobState, RunReport, RunStatus};
use relay_core::workflow::WorkflowDefinition;
use relay_scheduler::gate::requirement_holds;
use relay_scheduler::{BroadcastBus, Scheduler, SchedulerConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

/// Validate a workflow file.
pub async fn validate(config: &CliConfig, path: &Path) -> HandlerResult {
    let loaded = load_workflow(path, config.scheduler.max_matrix_size)?;

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        loaded.definition.name
    );
    println!("  Jobs: {}", loaded.graph.len());
    for (job, count) in &loaded.instance_counts {
        let Some(template) = loaded.graph.template(job) else {
            continue;
        };
        let mut line = format!("    - {}", job);
        if *count != 1 {
            line.push_str(&format!(" ({} instances)", count));
        }
        if !template.needs.is_empty() {
            line.push_str(&format!(" needs [{}]", template.needs.join(", ")));
        }
        if let Some(gate) = &template.gate {
            line.push_str(&format!(" {}", style(format!("gate: {}", gate.action)).magenta()));
        }
        println!("{}", line);
    }
    Ok(())
}

/// Show which instances a trigger would create and which are already skipped.
pub async fn plan(config: &CliConfig, path: &Path, trigger: &TriggerArgs) -> HandlerResult {
    let loaded = load_workflow(path, config.scheduler.max_matrix_size)?;
    let scheduler = build_scheduler(config, config.scheduler.clone(), false)?;
    let plan = scheduler.plan(&loaded.definition, &trigger.to_event())?;
    let ctx = &plan.run.context;

    println!(
        "{} {} on {} ({})",
        style("▶").cyan(),
        style(&plan.run.workflow_name).bold(),
        style(&ctx.git_ref).dim(),
        ctx.event
    );
    if let Some(actor) = &ctx.actor {
        println!("  actor: {}", actor);
    }
    let mut vars: Vec<_> = ctx.variables.iter().collect();
    vars.sort();
    for (key, value) in vars {
        println!("  vars.{} = {}", key, value);
    }
    println!();

    for instance in &plan.instances {
        let Some(template) = plan.graph.template(&instance.job) else {
            continue;
        };
        let mut line = format!("  {} {}", state_marker(instance.state), instance.display_name);
        if let Some(gate) = &template.gate {
            let mut note = format!("gate: {}", gate.action);
            if instance.state == JobState::Pending && !requirement_holds(template, ctx) {
                note.push_str(", requirement not met");
            }
            line.push_str(&format!(" {}", style(note).magenta()));
        }
        if let Some(reason) = &instance.reason {
            line.push_str(&format!(" {}", style(format!("({})", reason)).dim()));
        }
        println!("{}", line);
    }
    Ok(())
}

/// Run a workflow locally and print progress as it happens.
pub async fn run(
    config: &CliConfig,
    path: &Path,
    trigger: &TriggerArgs,
    jobs: Option<usize>,
    report_path: Option<&Path>,
    verbose: bool,
) -> HandlerResult {
    let loaded = load_workflow(path, config.scheduler.max_matrix_size)?;
    let mut scheduler_config = config.scheduler.clone();
    if let Some(jobs) = jobs {
        scheduler_config = scheduler_config.with_max_concurrent_jobs(jobs);
    }

    let bus = Arc::new(BroadcastBus::new());
    let scheduler =
        build_scheduler(config, scheduler_config, verbose)?.with_event_bus(bus.clone());
    let plan = scheduler.plan(&loaded.definition, &trigger.to_event())?;

    println!(
        "\n{} Running {} on {}",
        style("▶").cyan().bold(),
        style(&plan.run.workflow_name).bold(),
        style(&plan.run.context.git_ref).dim()
    );
    println!(
        "  {} instances, up to {} at once\n",
        plan.instances.len(),
        scheduler.config().max_concurrent_jobs
    );

    let mut events = bus.subscribe(&format!("run.{}.>", plan.run.id)).await?;
    let handle = scheduler.launch(plan).await?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::RunCompleted(_)) => break,
                Ok(event) => print_event(&event),
                Err(e) => warn!(error = %e, "Event stream error"),
            }
        }
    });

    let canceller = handle.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{} Cancelling run...", style("!").yellow());
            if let Err(e) = canceller.cancel().await {
                warn!(error = %e, "Cancel request failed");
            }
        }
    });

    let report = handle.wait().await?;
    interrupt.abort();
    // Bounded in case the completion event was dropped by a lagging subscriber.
    match tokio::time::timeout(Duration::from_secs(2), printer).await {
        Ok(Err(e)) => warn!(error = %e, "Event printer stopped"),
        Ok(Ok(())) => {}
        Err(_) => warn!("Event printer did not see run completion"),
    }

    print_summary(&report);

    if let Some(report_path) = report_path {
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
        info!(path = %report_path.display(), "Run report written");
    }

    match report.status {
        RunStatus::Succeeded => Ok(()),
        status => Err(format!("Run {}", status).into()),
    }
}

/// Print the workflow JSON schema.
pub fn schema() -> HandlerResult {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> HandlerResult {
    println!("Current configuration:");
    print!("{}", serde_yaml::to_string(config)?);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }
    Ok(())
}

/// Print the configuration file path.
pub fn config_path() -> HandlerResult {
    println!("{}", CliConfig::config_path()?.display());
    Ok(())
}

fn build_scheduler(
    config: &CliConfig,
    scheduler_config: SchedulerConfig,
    verbose: bool,
) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let artifact_dir = config.artifact_dir()?;
    let store = Arc::new(ArtifactStore::new(Arc::new(FsBackend::new(&artifact_dir))));

    // A fixed RELAY_SIGNING_KEY lets downstream services verify gate tokens.
    let secret = std::env::var("RELAY_SIGNING_KEY")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    let trust = Arc::new(JwtTrustProvider::with_secret(
        config.trust.clone(),
        secret.as_bytes(),
    )?);

    let executor = Arc::new(
        ShellExecutor::new(std::env::current_dir()?, artifact_dir.join("scratch")).verbose(verbose),
    );

    Ok(Scheduler::new(scheduler_config, executor, trust, store))
}

fn print_event(event: &Event) {
    match event {
        Event::JobStateChanged(change) => {
            let name = style(&change.display_name).bold();
            let reason = change
                .reason
                .as_ref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default();
            match change.to_state {
                JobState::Running => println!("  {} {}", style("▶").cyan(), name),
                JobState::Succeeded => println!("  {} {}", style("✓").green(), name),
                JobState::Failed | JobState::Unauthorized => {
                    println!("  {} {}{}", style("✗").red(), name, style(reason).red())
                }
                JobState::Skipped => println!("  {} {}{}", style("-").dim(), name, style(reason).dim()),
                JobState::Cancelled => {
                    println!("  {} {}{}", style("⊘").yellow(), name, style(reason).dim())
                }
                JobState::Pending | JobState::Ready => {}
            }
        }
        Event::GrantIssued(grant) => println!(
            "  {} {} grant issued, expires {}",
            style("◆").magenta(),
            grant.action,
            grant.expires_at.format("%H:%M:%S")
        ),
        Event::GrantDenied(denied) => println!(
            "  {} {} grant denied: {}",
            style("◆").red(),
            denied.action,
            denied.reason
        ),
        Event::ArtifactCommitted(artifact) => println!(
            "  {} {} ({} bytes)",
            style("↑").dim(),
            artifact.name,
            artifact.size_bytes
        ),
        Event::RunCreated(_) | Event::RunCompleted(_) => {}
    }
}

fn state_marker(state: JobState) -> console::StyledObject<&'static str> {
    match state {
        JobState::Succeeded => style("✓").green(),
        JobState::Failed | JobState::Unauthorized => style("✗").red(),
        JobState::Cancelled => style("⊘").yellow(),
        JobState::Skipped => style("-").dim(),
        JobState::Running => style("▶").cyan(),
        JobState::Pending | JobState::Ready => style("○").dim(),
    }
}

fn duration(instance: &JobInstance) -> String {
    match (instance.started_at, instance.completed_at) {
        (Some(start), Some(end)) => {
            let ms = (end - start).num_milliseconds().max(0);
            format!("{:.2}s", ms as f64 / 1000.0)
        }
        _ => String::new(),
    }
}

fn print_summary(report: &RunReport) {
    println!();
    let width = report
        .jobs
        .iter()
        .map(|j| j.display_name.len())
        .max()
        .unwrap_or(0);

    for instance in &report.jobs {
        let reason = instance
            .reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default();
        println!(
            "  {} {:<width$}  {:<20} {:>8}  {}",
            state_marker(instance.state),
            instance.display_name,
            instance.state.to_string(),
            duration(instance),
            style(reason).dim(),
            width = width
        );
    }

    if !report.artifacts.is_empty() {
        println!("\n  Artifacts:");
        for artifact in &report.artifacts {
            println!(
                "    {} {} bytes {}",
                artifact.name, artifact.size_bytes, artifact.digest
            );
        }
    }

    let status = match report.status {
        RunStatus::Succeeded => style(report.status.to_string()).green().bold(),
        RunStatus::Cancelled => style(report.status.to_string()).yellow().bold(),
        _ => style(report.status.to_string()).red().bold(),
    };
    println!("\n{} Run {} {}", style("●").bold(), report.run.id, status);

    if let Some(root) = report.root_cause.and_then(|id| report.instance(id)) {
        println!("  root cause: {}", style(&root.display_name).red());
    }
}
