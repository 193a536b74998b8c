use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::RoutineConfig;
use crate::error::{PipelineError, Result};
use crate::runner::CommandRunner;
use crate::webhook::PushPayload;

/// Maximum size for job output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Directory a routine clones into: `workspace_root + delivery_id + branch`.
pub fn workspace_path(workspace_root: &str, delivery_id: &str, branch: &str) -> PathBuf {
    PathBuf::from(format!("{}{}{}", workspace_root, delivery_id, branch))
}

/// Exclusively owned clone directory.
///
/// The normal exit is [`Workspace::finish`], which applies the cleanup policy
/// off the async worker. If the workspace is dropped without being finished
/// (cancellation, panic) the policy is applied synchronously in `Drop`. The
/// policy starts out as the routine's failure policy and is switched once the
/// test result is known.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    remove_on_drop: bool,
    finished: bool,
}

impl Workspace {
    /// Creates the directory. An existing path is an error and is left as is.
    pub async fn create(path: PathBuf, remove_on_drop: bool) -> Result<Self> {
        if let Err(source) = tokio::fs::create_dir(&path).await {
            error!(
                "Error creating clone directory <{}>, won't process this payload: {}",
                path.display(),
                source
            );
            return Err(PipelineError::WorkspaceCreateFailed { path, source });
        }
        Ok(Self {
            path,
            remove_on_drop,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_remove_on_drop(&mut self, remove: bool) {
        self.remove_on_drop = remove;
    }

    pub fn will_be_removed(&self) -> bool {
        self.remove_on_drop
    }

    /// Applies the cleanup policy with `tokio::fs`, which runs the removal on
    /// the blocking pool.
    pub async fn finish(mut self) {
        self.finished = true;
        if !self.remove_on_drop {
            debug!("Keeping workspace {}", self.path.display());
            return;
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.remove_on_drop {
            debug!("Keeping workspace {}", self.path.display());
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}

/// Result of one routine that got as far as running its test command.
///
/// Owns the workspace: [`JobOutcome::finish`] applies the cleanup policy, so
/// it must only be called once the notification has been sent.
#[derive(Debug)]
pub struct JobOutcome {
    pub id: String,
    pub routine: RoutineConfig,
    pub success: bool,
    pub command_output: Vec<u8>,
    pub failure_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    workspace: Workspace,
}

impl JobOutcome {
    pub fn workspace_dir(&self) -> &Path {
        self.workspace.path()
    }

    pub fn will_remove_workspace(&self) -> bool {
        self.workspace.will_be_removed()
    }

    /// Consumes the outcome and applies the workspace cleanup policy.
    pub async fn finish(self) {
        self.workspace.finish().await;
    }

    /// Text for the report: the output on success, the failure detail
    /// followed by the output otherwise. Truncated to [`MAX_OUTPUT_SIZE`].
    pub fn message(&self) -> String {
        let output = String::from_utf8_lossy(&self.command_output);
        let mut message = match &self.failure_detail {
            Some(detail) => format!("{}\n{}\n", detail, output),
            None => format!("{}\n", output),
        };
        if message.len() > MAX_OUTPUT_SIZE {
            let mut cut = MAX_OUTPUT_SIZE;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
            message.push_str("\n... (output truncated)");
        }
        message
    }
}

fn clone_args(branch: &str, clone_url: &str) -> Vec<String> {
    [
        "clone",
        "--branch",
        branch,
        "--single-branch",
        "--depth",
        "1",
        "--",
        clone_url,
        ".",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Creates the workspace, clones the pushed branch and runs the routine's
/// test command.
///
/// Workspace and clone failures are returned as errors and skip the test;
/// a failing test is a successful execution with `success == false`.
pub async fn execute(
    runner: &dyn CommandRunner,
    payload: &PushPayload,
    routine: &RoutineConfig,
    delivery_id: &str,
) -> Result<JobOutcome> {
    let id = Uuid::now_v7().to_string();
    let started_at = Utc::now();
    let branch = payload.branch();

    let path = workspace_path(&routine.workspace_root, delivery_id, branch);
    info!(
        "Job {} - routine '{}' will use '{}' as git directory",
        id,
        routine.label(),
        path.display()
    );
    let mut workspace = Workspace::create(path, routine.remove_on_failure).await?;

    let args = clone_args(branch, payload.clone_url());
    debug!("Will be using <git {}> as git command", args.join(" "));
    let clone = runner.run("git", &args, workspace.path()).await;
    let clone = match clone {
        Ok(clone) => clone,
        Err(e) => {
            error!("Job {} - git clone failed to start: {}", id, e);
            workspace.finish().await;
            return Err(PipelineError::CloneFailed {
                detail: e.to_string(),
                output: String::new(),
            });
        }
    };
    if !clone.success() {
        let output = clone.output_lossy();
        error!(
            "Job {} - error cloning from git <{}>, skipping this one\n{}",
            id,
            clone.describe_status(),
            output
        );
        workspace.finish().await;
        return Err(PipelineError::CloneFailed {
            detail: clone.describe_status(),
            output,
        });
    }
    debug!("git clone output:\n{}", clone.output_lossy());

    let test_args = routine.test_argv();
    let (success, command_output, failure_detail) = match runner
        .run(&routine.test_command, &test_args, workspace.path())
        .await
    {
        Ok(out) if out.success() => (true, out.output, None),
        Ok(out) => {
            let detail = out.describe_status();
            (false, out.output, Some(detail))
        }
        Err(e) => (
            false,
            Vec::new(),
            Some(format!(
                "test command '{}' failed to start: {}",
                routine.test_command, e
            )),
        ),
    };

    if success {
        info!(
            "Job {} - test successful on branch <{}> by {} ({})",
            id, branch, payload.pusher.name, payload.pusher.email
        );
        debug!("Command output:\n{}", String::from_utf8_lossy(&command_output));
        workspace.set_remove_on_drop(routine.remove_on_success);
    } else {
        error!(
            "Job {} - test failed on branch <{}> by {} ({}): {}",
            id,
            branch,
            payload.pusher.name,
            payload.pusher.email,
            failure_detail.as_deref().unwrap_or_default()
        );
        error!("Command output:\n{}", String::from_utf8_lossy(&command_output));
        workspace.set_remove_on_drop(routine.remove_on_failure);
    }

    Ok(JobOutcome {
        id,
        routine: routine.clone(),
        success,
        command_output,
        failure_detail,
        started_at,
        completed_at: Utc::now(),
        workspace,
    })
}
