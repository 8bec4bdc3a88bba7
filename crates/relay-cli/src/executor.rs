//! Local shell executor.
//!
//! Runs each `run:` step with `bash -c` in the workspace directory. A job
//! exchanges artifacts through two scratch directories:
//! - `$RELAY_INPUTS` holds the resolved upstream artifacts, one file each
//! - files left in `$RELAY_ARTIFACTS` after the last step are uploaded
//!
//! Publish gates see their identity token as `$RELAY_ID_TOKEN`.

use async_trait::async_trait;
use console::style;
use relay_core::ids::JobInstanceId;
use relay_core::ports::{JobContext, JobExecutor, Outcome};
use relay_core::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

pub struct ShellExecutor {
    workspace: PathBuf,
    scratch: PathBuf,
    verbose: bool,
    aborts: Mutex<HashMap<JobInstanceId, Arc<Notify>>>,
}

impl ShellExecutor {
    /// `scratch` holds per-instance input and output directories.
    pub fn new(workspace: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            scratch: scratch.into(),
            verbose: false,
            aborts: Mutex::new(HashMap::new()),
        }
    }

    /// Echo step output to stdout as it arrives.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn run_steps(
        &self,
        ctx: JobContext,
        dirs: &InstanceDirs,
        abort: &Notify,
    ) -> Result<Outcome> {
        for input in &ctx.inputs {
            tokio::fs::write(dirs.inputs.join(&input.meta.name), &input.data).await?;
        }

        let mut env = job_env(&ctx);
        env.push(("RELAY_INPUTS".to_string(), path_str(&dirs.inputs)));
        env.push(("RELAY_ARTIFACTS".to_string(), path_str(&dirs.outputs)));
        if let Some(grant) = ctx.grant {
            env.push(("RELAY_ID_TOKEN".to_string(), grant.consume()));
        }

        let mut logs = Vec::new();
        let total = ctx.steps.len();
        for (index, step) in ctx.steps.iter().enumerate() {
            let Some(script) = &step.run else {
                let uses = step.uses.as_deref().unwrap_or_default();
                logs.push(format!(
                    "[{}/{}] {} (skipped: uses {})",
                    index + 1,
                    total,
                    step.name,
                    uses
                ));
                continue;
            };
            logs.push(format!("[{}/{}] {}", index + 1, total, step.name));

            let status = self
                .run_script(script, &env, &ctx.display_name, &mut logs, abort)
                .await?;
            match status {
                StepStatus::Exited(0) => {}
                StepStatus::Exited(code) => {
                    return Ok(Outcome::failure(format!(
                        "step '{}' exited with code {}",
                        step.name, code
                    ))
                    .with_logs(logs));
                }
                StepStatus::Signalled => {
                    return Ok(Outcome::failure(format!("step '{}' was terminated", step.name))
                        .with_logs(logs));
                }
                StepStatus::Aborted => {
                    return Ok(Outcome::failure("aborted").with_logs(logs));
                }
            }
        }

        let mut outcome = Outcome::success();
        let mut entries = tokio::fs::read_dir(&dirs.outputs).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let data = tokio::fs::read(entry.path()).await?;
            let digest = ctx.outputs.put(&name, data).await?;
            logs.push(format!("uploaded {} ({})", name, digest));
            outcome = outcome.with_artifact(name);
        }
        Ok(outcome.with_logs(logs))
    }

    async fn run_script(
        &self,
        script: &str,
        env: &[(String, String)],
        label: &str,
        logs: &mut Vec<String>,
        abort: &Notify,
    ) -> Result<StepStatus> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&self.workspace)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().map(|out| self.collect(out, label, false));
        let stderr = child.stderr.take().map(|err| self.collect(err, label, true));

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = abort.notified() => None,
        };
        if status.is_none()
            && let Err(e) = child.kill().await
        {
            warn!(error = %e, "Failed to kill step process");
        }

        for reader in [stdout, stderr].into_iter().flatten() {
            match reader.await {
                Ok(lines) => logs.extend(lines),
                Err(e) => warn!(error = %e, "Output reader failed"),
            }
        }

        Ok(match status {
            None => StepStatus::Aborted,
            Some(status) => match status.code() {
                Some(code) => StepStatus::Exited(code),
                None => StepStatus::Signalled,
            },
        })
    }

    fn collect<R>(&self, reader: R, label: &str, stderr: bool) -> tokio::task::JoinHandle<Vec<String>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let verbose = self.verbose;
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if verbose {
                    let prefix = style(format!("[{}]", label)).dim();
                    if stderr {
                        println!("  {} {}", prefix, style(&line).red());
                    } else {
                        println!("  {} {}", prefix, line);
                    }
                }
                collected.push(line);
            }
            collected
        })
    }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
    async fn execute(&self, ctx: JobContext) -> Result<Outcome> {
        let dirs = InstanceDirs::create(&self.scratch, &ctx).await?;
        let abort = Arc::new(Notify::new());
        self.aborts.lock().await.insert(ctx.instance_id, abort.clone());

        let instance = ctx.instance_id;
        debug!(job = %ctx.display_name, steps = ctx.steps.len(), "Running job locally");
        let result = self.run_steps(ctx, &dirs, &abort).await;

        self.aborts.lock().await.remove(&instance);
        if let Err(e) = tokio::fs::remove_dir_all(&dirs.root).await {
            warn!(error = %e, path = %dirs.root.display(), "Failed to remove scratch directory");
        }
        result
    }

    async fn abort(&self, instance: JobInstanceId) -> Result<()> {
        if let Some(abort) = self.aborts.lock().await.get(&instance) {
            abort.notify_one();
        }
        Ok(())
    }
}

enum StepStatus {
    Exited(i32),
    Signalled,
    Aborted,
}

struct InstanceDirs {
    root: PathBuf,
    inputs: PathBuf,
    outputs: PathBuf,
}

impl InstanceDirs {
    async fn create(scratch: &Path, ctx: &JobContext) -> Result<Self> {
        let root = scratch
            .join(ctx.run_id.to_string())
            .join(ctx.instance_id.to_string());
        let inputs = root.join("inputs");
        let outputs = root.join("artifacts");
        tokio::fs::create_dir_all(&inputs).await?;
        tokio::fs::create_dir_all(&outputs).await?;
        Ok(Self {
            root,
            inputs,
            outputs,
        })
    }
}

/// Variables describing the run and the instance.
fn job_env(ctx: &JobContext) -> Vec<(String, String)> {
    let mut env = vec![
        ("RELAY_RUN_ID".to_string(), ctx.run_id.to_string()),
        ("RELAY_JOB".to_string(), ctx.job.clone()),
        ("RELAY_JOB_NAME".to_string(), ctx.display_name.clone()),
        ("RELAY_EVENT".to_string(), ctx.run.event.to_string()),
        ("RELAY_REF".to_string(), ctx.run.git_ref.clone()),
        ("RELAY_REF_NAME".to_string(), ctx.run.ref_name.clone()),
    ];
    if let Some(actor) = &ctx.run.actor {
        env.push(("RELAY_ACTOR".to_string(), actor.clone()));
    }
    if let Some(environment) = &ctx.environment {
        env.push(("RELAY_ENVIRONMENT".to_string(), environment.name.clone()));
    }
    for (key, value) in &ctx.matrix {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.push((format!("RELAY_MATRIX_{}", env_key(key)), value));
    }
    env
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("os"), "OS");
        assert_eq!(env_key("rust-version"), "RUST_VERSION");
        assert_eq!(env_key("node.js"), "NODE_JS");
    }
}
