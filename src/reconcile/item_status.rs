//! Item status state machine driven by ITEM webhooks.
//!
//! | Event                  | New status      | Error fields |
//! |------------------------|-----------------|--------------|
//! | re-auth required       | login_required  | recorded     |
//! | generic item error     | error           | recorded     |
//! | login repaired         | active          | cleared      |
//! | pending disconnect     | login_required  | kept         |
//! | permission revoked     | archived        | kept, accounts deactivated |
//! | new accounts available | needs_update    | kept         |
//!
//! Account revocation deactivates one account and leaves the item alone.
//!
//! Archiving is terminal for webhooks: later status events for an archived
//! item are acknowledged without touching it. Only an update-mode re-auth
//! reopens an archived item.

use serde::Serialize;
use tracing::info;

use crate::error::{ReconcileError, ReconcileResult};
use crate::observability::metrics;
use crate::reconcile::best_effort::{fire_and_log, BestEffort};
use crate::storage::{Database, ErrorFields, ItemStatus};
use crate::webhooks::{ItemEvent, ItemEventKind};

/// What applying an item event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOutcome {
    StatusChanged {
        item_id: i64,
        from: ItemStatus,
        to: ItemStatus,
    },
    Archived {
        item_id: i64,
        accounts_deactivated: u64,
        transactions: BestEffort,
    },
    AccountDeactivated {
        item_id: i64,
        provider_account_id: String,
    },
    /// The item is archived; the event changed nothing.
    Unchanged { item_id: i64 },
}

/// Status column and error-field effect of an event, if it changes status.
pub fn planned_transition(kind: &ItemEventKind) -> Option<(ItemStatus, ErrorFields)> {
    match kind {
        ItemEventKind::ReauthRequired(error) => Some((
            ItemStatus::LoginRequired,
            ErrorFields::Record {
                code: error.code.clone(),
                message: error.message.clone(),
            },
        )),
        ItemEventKind::Error(error) => Some((
            ItemStatus::Error,
            ErrorFields::Record {
                code: error.code.clone(),
                message: error.message.clone(),
            },
        )),
        ItemEventKind::LoginRepaired => Some((ItemStatus::Active, ErrorFields::Clear)),
        ItemEventKind::PendingDisconnect { .. } => {
            Some((ItemStatus::LoginRequired, ErrorFields::Keep))
        }
        ItemEventKind::NewAccountsAvailable => Some((ItemStatus::NeedsUpdate, ErrorFields::Keep)),
        ItemEventKind::PermissionRevoked | ItemEventKind::AccountRevoked { .. } => None,
    }
}

pub struct ItemStatusReconciler {
    db: Database,
}

impl ItemStatusReconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Apply one item event to the item it names.
    pub async fn apply(&self, event: &ItemEvent) -> ReconcileResult<ItemOutcome> {
        let item = self
            .db
            .find_item_by_provider_id(&event.provider_item_id)
            .await?
            .ok_or_else(|| ReconcileError::not_found("item", event.provider_item_id.clone()))?;

        match &event.kind {
            ItemEventKind::PermissionRevoked => {
                let accounts_deactivated = self.db.archive_item_cascade(item.id).await?;
                let transactions = fire_and_log(
                    "archive transactions",
                    self.db.archive_transactions_for_item(item.id),
                )
                .await;
                metrics::record_status_transition(ItemStatus::Archived.as_str());
                info!(
                    item_id = item.id,
                    provider_item_id = %item.provider_item_id,
                    accounts_deactivated,
                    "Item archived after permission revocation"
                );
                Ok(ItemOutcome::Archived {
                    item_id: item.id,
                    accounts_deactivated,
                    transactions,
                })
            }
            ItemEventKind::AccountRevoked { account_id } => {
                if !self.db.deactivate_account(account_id).await? {
                    return Err(ReconcileError::not_found("account", account_id.clone()));
                }
                info!(item_id = item.id, provider_account_id = %account_id, "Account deactivated");
                Ok(ItemOutcome::AccountDeactivated {
                    item_id: item.id,
                    provider_account_id: account_id.clone(),
                })
            }
            kind if item.archived => {
                info!(
                    item_id = item.id,
                    provider_item_id = %item.provider_item_id,
                    event = kind.name(),
                    "Item archived, ignoring status event"
                );
                Ok(ItemOutcome::Unchanged { item_id: item.id })
            }
            kind => {
                let Some((status, errors)) = planned_transition(kind) else {
                    return Err(ReconcileError::validation(format!(
                        "no transition for {}",
                        kind.name()
                    )));
                };
                if let ItemEventKind::PendingDisconnect { reason } = kind {
                    info!(item_id = item.id, reason = ?reason, "Item pending disconnect");
                }

                self.db.set_item_status(item.id, status, &errors).await?;
                metrics::record_status_transition(status.as_str());
                info!(
                    item_id = item.id,
                    provider_item_id = %item.provider_item_id,
                    from = %item.status,
                    to = %status,
                    event = kind.name(),
                    "Item status updated"
                );
                Ok(ItemOutcome::StatusChanged {
                    item_id: item.id,
                    from: item.status,
                    to: status,
                })
            }
        }
    }
}
