pub mod api;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod logging;
pub mod notify;
pub mod routine;
pub mod runner;
pub mod signature;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_utils;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatch::Dispatcher;
use crate::error::{PipelineError, Result};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8081";
/// Submission port for STARTTLS.
pub const SMTP_SUBMISSION_PORT: u16 = 587;
/// Implicit TLS port.
pub const SMTPS_PORT: u16 = 465;
pub const SMTP_PLAINTEXT_PORT: u16 = 25;

/// Environment variable holding the webhook secret.
pub const ENV_HOOK_SECRET: &str = "GH_HOOK_SECRET";
/// Environment variable holding the SMTP password.
pub const ENV_SMTP_PASSWORD: &str = "SMTP_PASSWORD";

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_true() -> bool {
    true
}

/// Service configuration. Loaded once at startup and never mutated.
#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub webhook_secret: String,
    /// Stop the remaining routines of a delivery after a workspace or clone failure.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    /// Answer the webhook before routines run.
    #[serde(default)]
    pub detach_jobs: bool,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub mail: Option<MailConfig>,
    #[serde(default, rename = "routine")]
    pub routines: Vec<RoutineConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RoutineConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub branches: Vec<String>,
    pub workspace_root: String,
    pub test_command: String,
    #[serde(default)]
    pub test_args: String,
    #[serde(default)]
    pub remove_on_success: bool,
    #[serde(default)]
    pub remove_on_failure: bool,
    #[serde(default)]
    pub mail_to: Vec<String>,
}

impl RoutineConfig {
    /// Name used in logs and reports; falls back to the test command.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.test_command)
    }

    /// Test arguments split on whitespace.
    pub fn test_argv(&self) -> Vec<String> {
        self.test_args.split_whitespace().map(String::from).collect()
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    #[default]
    Starttls,
    Tls,
    #[serde(rename = "none")]
    Plaintext,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpAuth {
    #[default]
    Login,
    Plain,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    /// Defaults to the usual port for `security` when absent.
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default)]
    pub auth: SmtpAuth,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    /// Handlebars HTML template; the built-in one is used when absent.
    #[serde(default)]
    pub template: Option<PathBuf>,
}

impl MailConfig {
    pub fn port(&self) -> u16 {
        self.smtp_port.unwrap_or(match self.security {
            SmtpSecurity::Starttls => SMTP_SUBMISSION_PORT,
            SmtpSecurity::Tls => SMTPS_PORT,
            SmtpSecurity::Plaintext => SMTP_PLAINTEXT_PORT,
        })
    }
}

impl HookConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Applies environment overrides and checks the result is usable.
    pub fn finalize(mut self, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(secret) = env(ENV_HOOK_SECRET).filter(|s| !s.is_empty()) {
            self.webhook_secret = secret;
        }
        if let (Some(mail), Some(password)) = (self.mail.as_mut(), env(ENV_SMTP_PASSWORD)) {
            mail.password = password;
        }

        if self.webhook_secret.is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "no webhook secret configured; set webhook_secret or {}",
                ENV_HOOK_SECRET
            )));
        }
        for (index, routine) in self.routines.iter().enumerate() {
            if routine.test_command.trim().is_empty() {
                return Err(PipelineError::ConfigError(format!(
                    "routine #{} ('{}') has an empty test_command",
                    index + 1,
                    routine.label()
                )));
            }
        }
        Ok(self)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// Load and parse the configuration file, then apply environment overrides
pub fn load_config(path: &Path) -> Result<HookConfig> {
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config = HookConfig::from_toml_str(&config_str).map_err(|e| {
        PipelineError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    config.finalize(|key| std::env::var(key).ok())
}

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
