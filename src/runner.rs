//! External process execution behind an injectable capability.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Result of one finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// stdout followed by stderr.
    pub output: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn describe_status(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs an executable with arguments in a working directory.
///
/// Errors are reserved for processes that could not be run at all (missing
/// executable, timeout); a non-zero exit is a normal [`CommandOutput`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, exe: &str, args: &[String], workdir: &Path) -> io::Result<CommandOutput>;
}

/// Runs commands with `tokio::process`, optionally bounded by a timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, exe: &str, args: &[String], workdir: &Path) -> io::Result<CommandOutput> {
        debug!("Running (cwd = '{}'): {} {}", workdir.display(), exe, args.join(" "));

        let mut command = Command::new(exe);
        command
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("'{}' did not finish within {:?}", exe, limit),
                    )
                })??,
            None => command.output().await?,
        };

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(CommandOutput {
            code: output.status.code(),
            output: combined,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessRunner::default()
            .run("sh", &args(&["-c", "echo out; echo err >&2"]), dir.path())
            .await
            .unwrap();

        assert!(out.success());
        assert_eq!(out.output_lossy(), "out\nerr\n");
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), b"").unwrap();
        let out = ProcessRunner::default()
            .run("ls", &[], dir.path())
            .await
            .unwrap();
        assert!(out.output_lossy().contains("marker"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessRunner::default()
            .run("sh", &args(&["-c", "exit 3"]), dir.path())
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.describe_status(), "exit status 3");
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessRunner::default()
            .run("definitely-not-a-real-binary-xyz", &[], dir.path())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_kills_long_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessRunner::new(Some(Duration::from_millis(100)))
            .run("sleep", &args(&["5"]), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
