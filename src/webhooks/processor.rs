//! End-to-end handling of one delivery.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::observability::metrics;
use crate::reconcile::{ItemStatusReconciler, LinkSessionCompleter, SessionOutcome, TransactionSyncTrigger};
use crate::storage::{Database, DeliveryWindows};
use crate::webhooks::event::{WebhookEnvelope, WebhookEvent};
use crate::webhooks::intake::WebhookIntake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Processed,
    Duplicate,
    Failed,
    Rejected,
    Ignored,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }
}

/// Acknowledgement body for a logged delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub status: WebhookStatus,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The delivery was not acknowledged.
#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("body is not a JSON object")]
    Malformed,

    /// Not durably logged, or hit a transient storage failure; redeliver.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),
}

/// Dispatch result before it is written to the log row.
struct Dispatched {
    status: WebhookStatus,
    error: Option<String>,
}

impl Dispatched {
    fn processed() -> Self {
        Self {
            status: WebhookStatus::Processed,
            error: None,
        }
    }
}

pub struct WebhookProcessor {
    intake: WebhookIntake,
    items: ItemStatusReconciler,
    sync_trigger: TransactionSyncTrigger,
    sessions: Arc<LinkSessionCompleter>,
}

impl WebhookProcessor {
    pub fn new(db: Database, sessions: Arc<LinkSessionCompleter>) -> Self {
        Self {
            intake: WebhookIntake::new(db.clone()),
            items: ItemStatusReconciler::new(db.clone()),
            sync_trigger: TransactionSyncTrigger::new(db),
            sessions,
        }
    }

    /// Log, deduplicate, dispatch and close out one raw delivery.
    pub async fn handle(
        &self,
        raw: &[u8],
        windows: DeliveryWindows,
    ) -> Result<WebhookOutcome, WebhookRejection> {
        let started = Instant::now();
        let envelope = WebhookEnvelope::parse(raw).ok_or(WebhookRejection::Malformed)?;

        let intake = self.intake.accept(&envelope, windows).await.map_err(|e| {
            error!(error = %e, webhook_code = %envelope.webhook_code, "Failed to log webhook");
            WebhookRejection::Unavailable(e.to_string())
        })?;

        let Some(log_id) = intake.claimed_id() else {
            info!(fingerprint = %intake.fingerprint, "Duplicate webhook delivery");
            metrics::record_webhook(&envelope.webhook_type, &envelope.webhook_code, "duplicate", started);
            return Ok(WebhookOutcome {
                status: WebhookStatus::Duplicate,
                fingerprint: intake.fingerprint,
                error: None,
            });
        };

        let result = match envelope.classify() {
            Ok(event) => self.dispatch(&event).await,
            Err(e) => Err(e),
        };

        let dispatched = match result {
            Ok(dispatched) => dispatched,
            Err(e) if e.is_retryable() => {
                warn!(fingerprint = %intake.fingerprint, error = %e, "Transient failure, leaving webhook for redelivery");
                metrics::record_webhook(&envelope.webhook_type, &envelope.webhook_code, "retry", started);
                return Err(WebhookRejection::Unavailable(e.to_string()));
            }
            Err(e @ ReconcileError::Validation(_)) => {
                warn!(fingerprint = %intake.fingerprint, error = %e, "Webhook rejected");
                Dispatched {
                    status: WebhookStatus::Rejected,
                    error: Some(e.code()),
                }
            }
            Err(e) => {
                warn!(fingerprint = %intake.fingerprint, error = %e, "Webhook processing failed");
                Dispatched {
                    status: WebhookStatus::Failed,
                    error: Some(e.code()),
                }
            }
        };

        self.intake
            .finish(log_id, dispatched.error.as_deref())
            .await
            .map_err(|e| {
                error!(fingerprint = %intake.fingerprint, error = %e, "Failed to close out webhook log row");
                WebhookRejection::Unavailable(e.to_string())
            })?;

        metrics::record_webhook(
            &envelope.webhook_type,
            &envelope.webhook_code,
            dispatched.status.as_str(),
            started,
        );
        Ok(WebhookOutcome {
            status: dispatched.status,
            fingerprint: intake.fingerprint,
            error: dispatched.error,
        })
    }

    async fn dispatch(&self, event: &WebhookEvent) -> ReconcileResult<Dispatched> {
        match event {
            WebhookEvent::Item(item_event) => {
                self.items.apply(item_event).await?;
                Ok(Dispatched::processed())
            }
            WebhookEvent::SyncUpdates(sync_event) => {
                self.sync_trigger.on_sync_updates(sync_event).await?;
                Ok(Dispatched::processed())
            }
            WebhookEvent::LinkSession(session) => {
                let outcome = self.sessions.complete(session).await?;
                let error = outcome.error_code();
                let status = match &outcome {
                    SessionOutcome::Completed { linked, .. } if linked.is_empty() && error.is_some() => {
                        WebhookStatus::Failed
                    }
                    _ => WebhookStatus::Processed,
                };
                Ok(Dispatched { status, error })
            }
            WebhookEvent::Unhandled {
                webhook_type,
                webhook_code,
            } => {
                info!(webhook_type = %webhook_type, webhook_code = %webhook_code, "Unhandled webhook, acknowledging");
                Ok(Dispatched {
                    status: WebhookStatus::Ignored,
                    error: None,
                })
            }
        }
    }
}
