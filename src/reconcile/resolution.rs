//! Which item a freshly exchanged provider item lands on.

use crate::error::{ConflictKind, ReconcileError, ReconcileResult};
use crate::storage::{Database, Item};

/// Outcome of item resolution; each variant carries what its branch needs.
#[derive(Debug, Clone)]
pub enum ItemResolution {
    /// Same provider item id already on file: an update-mode re-auth.
    UpdateMode { existing: Item },
    /// The client already has an open item at this institution under an
    /// older provider item id.
    ReplaceDuplicate { existing: Item },
    Create,
}

impl ItemResolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpdateMode { .. } => "update_mode",
            Self::ReplaceDuplicate { .. } => "replace_duplicate",
            Self::Create => "create",
        }
    }
}

/// Decide from the candidate rows, in priority order.
///
/// `open_at_institution` is the client's open item at the institution: for a
/// new provider item it is the duplicate candidate, for an archived match it
/// is the item that would collide if the match were reopened. Items linked by
/// earlier tokens of the same session are never replaced. Every conflict is
/// returned before anything is written.
pub fn decide(
    provider_item_id: &str,
    institution_id: Option<&str>,
    by_provider_id: Option<Item>,
    open_at_institution: Option<Item>,
    linked_in_session: &[i64],
) -> ReconcileResult<ItemResolution> {
    let conflict = |kind| ReconcileError::DuplicateConflict {
        provider_item_id: provider_item_id.to_string(),
        kind,
    };

    if let Some(existing) = by_provider_id {
        if let (Some(stored), Some(received)) = (existing.institution_id.as_deref(), institution_id)
        {
            if stored != received {
                return Err(conflict(ConflictKind::InstitutionMismatch {
                    stored: stored.to_string(),
                    received: received.to_string(),
                }));
            }
        }
        if existing.archived {
            if let Some(open) = open_at_institution.filter(|open| open.id != existing.id) {
                return Err(conflict(ConflictKind::ArchivedSuperseded {
                    open_item_id: open.id,
                }));
            }
        }
        return Ok(ItemResolution::UpdateMode { existing });
    }

    match open_at_institution {
        Some(existing) if linked_in_session.contains(&existing.id) => {
            Err(conflict(ConflictKind::LinkedInSession {
                item_id: existing.id,
            }))
        }
        Some(existing) => Ok(ItemResolution::ReplaceDuplicate { existing }),
        None => Ok(ItemResolution::Create),
    }
}

/// Load the candidates and decide.
pub async fn resolve_item(
    db: &Database,
    client_id: &str,
    provider_item_id: &str,
    institution_id: Option<&str>,
    linked_in_session: &[i64],
) -> ReconcileResult<ItemResolution> {
    let by_provider_id = db.find_item_by_provider_id(provider_item_id).await?;
    let open_at_institution = match (&by_provider_id, institution_id) {
        (None, Some(institution)) => {
            db.find_open_item_for_institution(client_id, institution)
                .await?
        }
        (Some(existing), _) if existing.archived => match existing.institution_id.as_deref() {
            Some(institution) => {
                db.find_open_item_for_institution(&existing.client_id, institution)
                    .await?
            }
            None => None,
        },
        _ => None,
    };
    decide(
        provider_item_id,
        institution_id,
        by_provider_id,
        open_at_institution,
        linked_in_session,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{millis_to_datetime, ItemStatus};

    fn item(id: i64, provider_item_id: &str, institution: Option<&str>) -> Item {
        Item {
            id,
            client_id: "c1".to_string(),
            provider_item_id: provider_item_id.to_string(),
            institution_id: institution.map(str::to_string),
            institution_name: None,
            status: ItemStatus::Active,
            last_error_code: None,
            last_error_message: None,
            last_error_at: None,
            access_token_ciphertext: Vec::new(),
            access_token_key_id: 1,
            transaction_cursor: None,
            has_sync_updates: false,
            archived: false,
            created_at: millis_to_datetime(0),
            updated_at: millis_to_datetime(0),
        }
    }

    #[test]
    fn test_provider_id_match_wins() {
        let resolution = decide(
            "it-1",
            Some("ins_1"),
            Some(item(1, "it-1", Some("ins_1"))),
            Some(item(2, "it-0", Some("ins_1"))),
            &[],
        )
        .unwrap();
        assert!(matches!(resolution, ItemResolution::UpdateMode { existing } if existing.id == 1));
    }

    #[test]
    fn test_institution_mismatch_is_conflict() {
        let err = decide("it-1", Some("ins_2"), Some(item(1, "it-1", Some("ins_1"))), None, &[])
            .unwrap_err();
        assert_eq!(err.code(), "INSTITUTION_MISMATCH");
        match err {
            ReconcileError::DuplicateConflict {
                kind: ConflictKind::InstitutionMismatch { stored, received },
                ..
            } => {
                assert_eq!(stored, "ins_1");
                assert_eq!(received, "ins_2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_institution_does_not_conflict() {
        let resolution = decide("it-1", None, Some(item(1, "it-1", Some("ins_1"))), None, &[]).unwrap();
        assert_eq!(resolution.label(), "update_mode");
    }

    #[test]
    fn test_duplicate_then_create() {
        let resolution =
            decide("it-2", Some("ins_1"), None, Some(item(1, "it-1", Some("ins_1"))), &[]).unwrap();
        assert!(matches!(resolution, ItemResolution::ReplaceDuplicate { existing } if existing.id == 1));

        let resolution = decide("it-2", Some("ins_1"), None, None, &[]).unwrap();
        assert_eq!(resolution.label(), "create");
    }

    #[test]
    fn test_item_linked_earlier_in_session_is_not_replaced() {
        let err = decide(
            "it-2",
            Some("ins_1"),
            None,
            Some(item(1, "it-1", Some("ins_1"))),
            &[1],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DuplicateConflict {
                kind: ConflictKind::LinkedInSession { item_id: 1 },
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_archived_match_with_open_sibling_is_conflict() {
        let mut archived = item(1, "it-1", Some("ins_1"));
        archived.archived = true;

        let err = decide(
            "it-1",
            Some("ins_1"),
            Some(archived.clone()),
            Some(item(2, "it-2", Some("ins_1"))),
            &[],
        )
        .unwrap_err();
        assert_eq!(err.code(), "ARCHIVED_ITEM_SUPERSEDED");

        // No open sibling: the archived item is reopened
        let resolution = decide("it-1", Some("ins_1"), Some(archived), None, &[]).unwrap();
        assert_eq!(resolution.label(), "update_mode");
    }
}
