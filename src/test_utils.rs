//! Shared fixtures for unit tests: payloads, signed headers, a scripted
//! command runner and a recording notifier.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::notify::{MailReport, Notifier, PUSHER_PLACEHOLDER};
use crate::runner::{CommandOutput, CommandRunner};
use crate::signature::{compute_signature, format_signature_header};
use crate::webhook::{HEADER_DELIVERY, HEADER_EVENT, HEADER_SIGNATURE, PushPayload};
use crate::{HookConfig, MailConfig, RoutineConfig, SmtpAuth, SmtpSecurity};

pub fn push_json(git_ref: &str, clone_url: &str) -> serde_json::Value {
    serde_json::json!({
        "ref": git_ref,
        "before": "a",
        "after": "b",
        "repository": {
            "name": "repo",
            "clone_url": clone_url,
            "master_branch": "main"
        },
        "pusher": { "name": "octocat", "email": "octo@example.com" },
        "compare": "https://example.com/compare/a...b",
        "head_commit": { "message": "Fix tests" }
    })
}

pub fn push_body(git_ref: &str, clone_url: &str) -> Vec<u8> {
    serde_json::to_vec(&push_json(git_ref, clone_url)).unwrap()
}

pub fn payload(git_ref: &str, clone_url: &str) -> PushPayload {
    serde_json::from_value(push_json(git_ref, clone_url)).unwrap()
}

pub fn signed_headers(secret: &[u8], event: &str, delivery_id: &str, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let signature = format_signature_header(&compute_signature(secret, body));
    headers.insert(HEADER_SIGNATURE, HeaderValue::from_str(&signature).unwrap());
    headers.insert(HEADER_EVENT, HeaderValue::from_str(event).unwrap());
    headers.insert(HEADER_DELIVERY, HeaderValue::from_str(delivery_id).unwrap());
    headers
}

pub fn routine(name: &str, branches: &[&str], workspace_root: &str) -> RoutineConfig {
    RoutineConfig {
        name: Some(name.to_string()),
        branches: branches.iter().map(|b| b.to_string()).collect(),
        workspace_root: workspace_root.to_string(),
        test_command: "make".to_string(),
        test_args: String::new(),
        remove_on_success: false,
        remove_on_failure: false,
        mail_to: vec![PUSHER_PLACEHOLDER.to_string()],
    }
}

pub fn hook_config(secret: &str, routines: Vec<RoutineConfig>) -> HookConfig {
    HookConfig {
        listen: "127.0.0.1:0".to_string(),
        debug: false,
        webhook_secret: secret.to_string(),
        fail_fast: true,
        detach_jobs: false,
        command_timeout_secs: None,
        log_dir: None,
        mail: None,
        routines,
    }
}

pub fn mail_config() -> MailConfig {
    MailConfig {
        smtp_host: "localhost".to_string(),
        smtp_port: Some(2525),
        security: SmtpSecurity::Plaintext,
        auth: SmtpAuth::Login,
        username: "ci".to_string(),
        password: "secret".to_string(),
        from: "CI <ci@example.com>".to_string(),
        template: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub exe: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

/// Records invocations and answers from a small script: everything
/// succeeds unless told otherwise.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    failing_clone_urls: Vec<String>,
    failing_tests: Vec<String>,
    unstartable: Vec<String>,
    test_delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn fail_clone(mut self, url: &str) -> Self {
        self.failing_clone_urls.push(url.to_string());
        self
    }

    pub fn fail_test(mut self, exe: &str) -> Self {
        self.failing_tests.push(exe.to_string());
        self
    }

    pub fn unstartable(mut self, exe: &str) -> Self {
        self.unstartable.push(exe.to_string());
        self
    }

    /// Every non-git command sleeps for `delay` before answering.
    pub fn slow_test(mut self, delay: Duration) -> Self {
        self.test_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, exe: &str, args: &[String], workdir: &Path) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Invocation {
            exe: exe.to_string(),
            args: args.to_vec(),
            workdir: workdir.to_path_buf(),
        });

        if self.unstartable.iter().any(|e| e == exe) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        if exe == "git" && args.iter().any(|a| self.failing_clone_urls.contains(a)) {
            return Ok(CommandOutput {
                code: Some(128),
                output: b"fatal: repository not found\n".to_vec(),
            });
        }
        if exe != "git" {
            if let Some(delay) = self.test_delay {
                tokio::time::sleep(delay).await;
            }
        }
        if self.failing_tests.iter().any(|e| e == exe) {
            return Ok(CommandOutput {
                code: Some(1),
                output: b"1 test failed\n".to_vec(),
            });
        }
        Ok(CommandOutput {
            code: Some(0),
            output: b"ok\n".to_vec(),
        })
    }
}

/// Collects reports instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<MailReport>>,
    watched_workspace: Mutex<Option<PathBuf>>,
    workspace_seen: Mutex<Option<bool>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<MailReport> {
        self.reports.lock().unwrap().clone()
    }

    /// Records whether `path` still exists when the next report arrives.
    pub fn expect_workspace(&self, path: PathBuf) {
        *self.watched_workspace.lock().unwrap() = Some(path);
    }

    pub fn workspace_seen(&self) -> Option<bool> {
        *self.workspace_seen.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, report: &MailReport) {
        if let Some(path) = self.watched_workspace.lock().unwrap().as_ref() {
            *self.workspace_seen.lock().unwrap() = Some(path.is_dir());
        }
        self.reports.lock().unwrap().push(report.clone());
    }
}
