//! Per-delivery orchestration: verify, parse, route, then execute and notify
//! each matched routine in order.

use axum::body::Bytes;
use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::job::execute;
use crate::notify::{MailReport, Notifier};
use crate::routine::route;
use crate::runner::CommandRunner;
use crate::webhook::{PushPayload, parse_hook};
use crate::{HookConfig, RoutineConfig};

/// Result of intake for a verified delivery.
#[derive(Debug)]
pub enum Intake {
    /// Verified, but not an event this service processes.
    NotImplemented { event_type: String },
    /// A validated push with its matched routines.
    Push(PushJob),
}

/// A validated push ready to run.
#[derive(Debug, Clone)]
pub struct PushJob {
    pub delivery_id: String,
    pub payload: PushPayload,
    pub routines: Vec<RoutineConfig>,
}

/// What happened to one routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineResult {
    Passed,
    Failed,
    /// Workspace creation or clone failed; no test ran and no mail was sent.
    Aborted(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub results: Vec<(String, RoutineResult)>,
    /// Routines skipped because an earlier one failed under fail-fast.
    pub skipped: usize,
}

impl DispatchReport {
    pub fn executed(&self) -> usize {
        self.results.len()
    }
}

/// Runs deliveries against a fixed configuration.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<HookConfig>,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<HookConfig>,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            runner,
            notifier,
        }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// Verifies and routes a delivery without running anything.
    pub fn intake(&self, headers: &HeaderMap, body: Bytes) -> Result<Intake> {
        let event = parse_hook(self.config.webhook_secret.as_bytes(), headers, body)?;
        info!("Received event <{}> delivery {}", event.event_type, event.delivery_id);

        if !event.is_push() {
            info!("Won't process event type <{}>", event.event_type);
            return Ok(Intake::NotImplemented {
                event_type: event.event_type,
            });
        }

        if self.config.debug {
            debug!("Payload <\n{}\n>", String::from_utf8_lossy(&event.raw_body));
        }
        let payload = PushPayload::from_slice(&event.raw_body)?;
        self.prepare(payload, event.delivery_id).map(Intake::Push)
    }

    /// Validates the payload and matches routines.
    pub fn prepare(&self, payload: PushPayload, delivery_id: String) -> Result<PushJob> {
        let routines = route(&payload, &delivery_id, &self.config.routines)?
            .into_iter()
            .cloned()
            .collect();
        Ok(PushJob {
            delivery_id,
            payload,
            routines,
        })
    }

    /// Executes matched routines in order. Test failures are notified and do
    /// not stop the loop; infrastructure failures stop it when `fail_fast` is
    /// set.
    pub async fn run(&self, job: PushJob) -> DispatchReport {
        let mut report = DispatchReport::default();
        info!(
            "Will be processing delivery {} ({} matching routines)",
            job.delivery_id,
            job.routines.len()
        );

        for (index, routine) in job.routines.iter().enumerate() {
            let label = routine.label().to_string();
            let outcome =
                match execute(self.runner.as_ref(), &job.payload, routine, &job.delivery_id).await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Routine '{}' aborted: {}", label, e);
                        report.results.push((label, RoutineResult::Aborted(e.to_string())));
                        if self.config.fail_fast {
                            report.skipped = job.routines.len() - index - 1;
                            if report.skipped > 0 {
                                warn!(
                                    "Skipping {} remaining routines for delivery {}",
                                    report.skipped, job.delivery_id
                                );
                            }
                            break;
                        }
                        continue;
                    }
                };

            let mail = MailReport::for_outcome(&job.payload, &outcome);
            self.notifier.notify(&mail).await;

            let result = if outcome.success {
                RoutineResult::Passed
            } else {
                RoutineResult::Failed
            };
            outcome.finish().await;
            report.results.push((label, result));
        }

        info!(
            "Delivery {} done: {} routines executed, {} skipped",
            job.delivery_id,
            report.executed(),
            report.skipped
        );
        report
    }

    /// Replays a payload without signature verification.
    pub async fn run_payload(&self, payload: PushPayload, delivery_id: &str) -> Result<DispatchReport> {
        let job = self.prepare(payload, delivery_id.to_string())?;
        Ok(self.run(job).await)
    }
}
