//! Durable logging and deduplication of deliveries.

use tracing::debug;

use crate::storage::{ClaimOutcome, Database, DeliveryWindows, NewWebhookLog, StorageError};
use crate::webhooks::event::WebhookEnvelope;
use crate::webhooks::fingerprint::fingerprint;

/// Result of logging one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intake {
    pub fingerprint: String,
    pub claim: ClaimOutcome,
}

impl Intake {
    /// Log row id this caller now owns, if any.
    pub fn claimed_id(&self) -> Option<i64> {
        match self.claim {
            ClaimOutcome::Fresh(id) | ClaimOutcome::Reclaimed(id) => Some(id),
            ClaimOutcome::Duplicate => None,
        }
    }
}

pub struct WebhookIntake {
    db: Database,
}

impl WebhookIntake {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fingerprint and log a delivery, deciding whether this caller processes it.
    ///
    /// A storage error here means the delivery was not durably logged.
    pub async fn accept(
        &self,
        envelope: &WebhookEnvelope,
        windows: DeliveryWindows,
    ) -> Result<Intake, StorageError> {
        let fingerprint = fingerprint(&envelope.body);
        let payload = envelope.body.to_string();

        let claim = self
            .db
            .claim_webhook(
                &NewWebhookLog {
                    fingerprint: &fingerprint,
                    webhook_type: &envelope.webhook_type,
                    webhook_code: &envelope.webhook_code,
                    provider_item_id: envelope.item_id.as_deref(),
                    payload: &payload,
                },
                windows,
            )
            .await?;

        debug!(fingerprint = %fingerprint, claim = ?claim, "Webhook logged");
        Ok(Intake { fingerprint, claim })
    }

    /// Close out a claimed delivery.
    pub async fn finish(&self, log_id: i64, error_code: Option<&str>) -> Result<(), StorageError> {
        self.db.mark_webhook_processed(log_id, error_code).await
    }
}
