//! Report mails for finished jobs.
//!
//! The pipeline decides whether and whom to notify; delivery is best-effort.
//! Failures are logged by the notifier and never reach the caller.

use async_trait::async_trait;
use handlebars::{Handlebars, html_escape};
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::job::JobOutcome;
use crate::webhook::PushPayload;
use crate::{MailConfig, SmtpAuth, SmtpSecurity};

/// Recipient entry replaced with the pusher's email address.
pub const PUSHER_PLACEHOLDER: &str = "${pusher}";

const DEFAULT_TEMPLATE: &str = include_str!("../templates/report.html.hbs");

/// Replaces every [`PUSHER_PLACEHOLDER`] entry with `pusher_email`; other
/// entries are kept verbatim and in order.
pub fn resolve_recipients(configured: &[String], pusher_email: &str) -> Vec<String> {
    configured
        .iter()
        .map(|recipient| {
            if recipient == PUSHER_PLACEHOLDER {
                pusher_email.to_string()
            } else {
                recipient.clone()
            }
        })
        .collect()
}

/// Everything a report mail is rendered from.
#[derive(Debug, Clone, Serialize)]
pub struct MailReport {
    pub payload: PushPayload,
    pub branch: String,
    pub success: bool,
    pub message: String,
    pub recipients: Vec<String>,
}

impl MailReport {
    pub fn new(payload: &PushPayload, success: bool, message: String, configured: &[String]) -> Self {
        Self {
            branch: payload.branch().to_string(),
            recipients: resolve_recipients(configured, &payload.pusher.email),
            payload: payload.clone(),
            success,
            message,
        }
    }

    pub fn for_outcome(payload: &PushPayload, outcome: &JobOutcome) -> Self {
        Self::new(
            payload,
            outcome.success,
            outcome.message(),
            &outcome.routine.mail_to,
        )
    }

    pub fn subject(&self) -> String {
        let verdict = if self.success { "successful" } else { "FAILED" };
        format!("Test {} on {}", verdict, self.payload.git_ref)
    }
}

/// Body used when the template cannot be rendered.
pub fn fallback_body(report: &MailReport) -> String {
    format!(
        "<p>{}</p>\n<pre>{}</pre>\n<pre>{}</pre>\n",
        html_escape(&report.subject()),
        html_escape(&report.message),
        html_escape(&format!("{:#?}", report.payload)),
    )
}

/// Renders `template` with the report. A template that does not parse or
/// render falls back to [`fallback_body`].
pub fn render_body(template: &str, report: &MailReport) -> String {
    let handlebars = Handlebars::new();
    match handlebars.render_template(template, report) {
        Ok(body) => body,
        Err(e) => {
            warn!("Couldn't fill email body template <{}>, defaulting to raw payload", e);
            fallback_body(report)
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no valid recipients")]
    NoRecipients,

    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Delivers a report. Implementations swallow their own errors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &MailReport);
}

/// Used when no mail transport is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &MailReport) {
        info!(
            "Mail disabled; would have sent '{}' to {}",
            report.subject(),
            report.recipients.join(",")
        );
    }
}

/// SASL mechanism offered to the relay.
pub fn auth_mechanism(auth: SmtpAuth) -> Mechanism {
    match auth {
        SmtpAuth::Login => Mechanism::Login,
        SmtpAuth::Plain => Mechanism::Plain,
    }
}

/// Sends HTML report mails through an SMTP relay.
pub struct SmtpNotifier {
    config: MailConfig,
}

impl SmtpNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    async fn body(&self, report: &MailReport) -> String {
        let template: Cow<'_, str> = match &self.config.template {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(source) => Cow::Owned(source),
                Err(e) => {
                    warn!("Error reading email template {}: {}", path.display(), e);
                    return fallback_body(report);
                }
            },
            None => Cow::Borrowed(DEFAULT_TEMPLATE),
        };
        render_body(&template, report)
    }

    fn build_message(&self, report: &MailReport, body: String) -> Result<Message, NotifyError> {
        let from: Mailbox = self.config.from.parse()?;
        let mut builder = Message::builder().from(from).subject(report.subject());

        let mut valid = 0;
        for recipient in &report.recipients {
            match recipient.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    valid += 1;
                }
                Err(e) => warn!("Skipping invalid recipient <{}>: {}", recipient, e),
            }
        }
        if valid == 0 {
            return Err(NotifyError::NoRecipients);
        }

        Ok(builder.header(ContentType::TEXT_HTML).body(body)?)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let host = &self.config.smtp_host;
        let builder = match self.config.security {
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            SmtpSecurity::Plaintext => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        Ok(builder
            .port(self.config.port())
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .authentication(vec![auth_mechanism(self.config.auth)])
            .build())
    }

    pub async fn send(&self, report: &MailReport) -> Result<(), NotifyError> {
        if report.recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let body = self.body(report).await;
        let email = self.build_message(report, body)?;

        info!("Sending mail to {}", report.recipients.join(","));
        self.transport()?.send(email).await?;
        debug!("Mail '{}' delivered", report.subject());
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, report: &MailReport) {
        if let Err(e) = self.send(report).await {
            error!("Error sending report mail <{}>", e);
        }
    }
}
