//! Webhook envelope parsing and event classification.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ReconcileError, ReconcileResult};

/// Error sub-codes that mean the end user must re-enter credentials.
pub const REAUTH_ERROR_CODES: &[&str] = &[
    "ITEM_LOGIN_REQUIRED",
    "INVALID_CREDENTIALS",
    "INVALID_MFA",
    "ITEM_LOCKED",
];

/// A delivery that is at least a JSON object.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub webhook_type: String,
    pub webhook_code: String,
    pub item_id: Option<String>,
    pub body: Value,
}

impl WebhookEnvelope {
    /// Parse raw bytes. `None` unless the body is a JSON object.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let body: Value = serde_json::from_slice(raw).ok()?;
        let object = body.as_object()?;
        Some(Self {
            webhook_type: string_field(object, "webhook_type").unwrap_or_default(),
            webhook_code: string_field(object, "webhook_code").unwrap_or_default(),
            item_id: string_field(object, "item_id"),
            body,
        })
    }

    /// Map the envelope onto a typed event.
    pub fn classify(&self) -> ReconcileResult<WebhookEvent> {
        if self.webhook_type.is_empty() || self.webhook_code.is_empty() {
            return Err(ReconcileError::validation(
                "webhook_type and webhook_code are required",
            ));
        }

        match (self.webhook_type.as_str(), self.webhook_code.as_str()) {
            ("ITEM", code) => match self.item_kind(code)? {
                Some(kind) => Ok(WebhookEvent::Item(ItemEvent {
                    provider_item_id: self.require_item_id()?,
                    kind,
                })),
                None => Ok(self.unhandled()),
            },
            ("TRANSACTIONS", "SYNC_UPDATES_AVAILABLE") => {
                let fields: SyncFields = self.fields()?;
                Ok(WebhookEvent::SyncUpdates(SyncUpdatesEvent {
                    provider_item_id: self.require_item_id()?,
                    initial_update_complete: fields.initial_update_complete,
                    historical_update_complete: fields.historical_update_complete,
                }))
            }
            ("LINK", "SESSION_FINISHED") => {
                let fields: SessionFields = self.fields()?;
                let link_token = fields
                    .link_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ReconcileError::validation("session event without link_token"))?;

                let mut public_tokens = fields.public_tokens.unwrap_or_default();
                if let Some(single) = fields.public_token {
                    if !public_tokens.contains(&single) {
                        public_tokens.push(single);
                    }
                }
                public_tokens.retain(|t| !t.is_empty());

                Ok(WebhookEvent::LinkSession(LinkSessionEvent {
                    link_token,
                    link_session_id: fields.link_session_id,
                    status: fields.status.unwrap_or_else(|| "unknown".to_string()),
                    public_tokens,
                    error: fields.error.map(ErrorInfo::from),
                }))
            }
            _ => Ok(self.unhandled()),
        }
    }

    fn item_kind(&self, code: &str) -> ReconcileResult<Option<ItemEventKind>> {
        let kind = match code {
            "ERROR" => {
                let fields: ItemErrorFields = self.fields()?;
                let error = fields.error.map(ErrorInfo::from).unwrap_or_else(|| ErrorInfo {
                    code: "UNKNOWN_ERROR".to_string(),
                    ..Default::default()
                });
                if REAUTH_ERROR_CODES.contains(&error.code.as_str()) {
                    ItemEventKind::ReauthRequired(error)
                } else {
                    ItemEventKind::Error(error)
                }
            }
            "LOGIN_REPAIRED" => ItemEventKind::LoginRepaired,
            "PENDING_DISCONNECT" | "PENDING_EXPIRATION" => {
                let fields: PendingFields = self.fields()?;
                ItemEventKind::PendingDisconnect {
                    reason: fields.reason.or(fields.consent_expiration_time),
                }
            }
            "USER_PERMISSION_REVOKED" => ItemEventKind::PermissionRevoked,
            "USER_ACCOUNT_REVOKED" => {
                let fields: AccountFields = self.fields()?;
                let account_id = fields.account_id.filter(|a| !a.is_empty()).ok_or_else(|| {
                    ReconcileError::validation("account revocation without account_id")
                })?;
                ItemEventKind::AccountRevoked { account_id }
            }
            "NEW_ACCOUNTS_AVAILABLE" => ItemEventKind::NewAccountsAvailable,
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }

    fn require_item_id(&self) -> ReconcileResult<String> {
        self.item_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReconcileError::validation("item event without item_id"))
    }

    fn fields<T: for<'de> Deserialize<'de>>(&self) -> ReconcileResult<T> {
        T::deserialize(&self.body).map_err(|e| {
            ReconcileError::validation(format!(
                "{}/{}: {e}",
                self.webhook_type, self.webhook_code
            ))
        })
    }

    fn unhandled(&self) -> WebhookEvent {
        WebhookEvent::Unhandled {
            webhook_type: self.webhook_type.clone(),
            webhook_code: self.webhook_code.clone(),
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Item(ItemEvent),
    SyncUpdates(SyncUpdatesEvent),
    LinkSession(LinkSessionEvent),
    Unhandled {
        webhook_type: String,
        webhook_code: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemEvent {
    pub provider_item_id: String,
    pub kind: ItemEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemEventKind {
    ReauthRequired(ErrorInfo),
    Error(ErrorInfo),
    LoginRepaired,
    PendingDisconnect { reason: Option<String> },
    PermissionRevoked,
    AccountRevoked { account_id: String },
    NewAccountsAvailable,
}

impl ItemEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReauthRequired(_) => "reauth_required",
            Self::Error(_) => "error",
            Self::LoginRepaired => "login_repaired",
            Self::PendingDisconnect { .. } => "pending_disconnect",
            Self::PermissionRevoked => "permission_revoked",
            Self::AccountRevoked { .. } => "account_revoked",
            Self::NewAccountsAvailable => "new_accounts_available",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUpdatesEvent {
    pub provider_item_id: String,
    pub initial_update_complete: bool,
    pub historical_update_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSessionEvent {
    pub link_token: String,
    pub link_session_id: Option<String>,
    pub status: String,
    pub public_tokens: Vec<String>,
    pub error: Option<ErrorInfo>,
}

impl LinkSessionEvent {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// Provider error object carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub error_type: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct WireError {
    error_code: Option<String>,
    error_type: Option<String>,
    error_message: Option<String>,
}

impl From<WireError> for ErrorInfo {
    fn from(e: WireError) -> Self {
        Self {
            code: e.error_code.unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
            error_type: e.error_type,
            message: e.error_message,
        }
    }
}

#[derive(Deserialize)]
struct ItemErrorFields {
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct PendingFields {
    reason: Option<String>,
    consent_expiration_time: Option<String>,
}

#[derive(Deserialize)]
struct AccountFields {
    account_id: Option<String>,
}

#[derive(Deserialize)]
struct SyncFields {
    #[serde(default)]
    initial_update_complete: bool,
    #[serde(default)]
    historical_update_complete: bool,
}

#[derive(Deserialize)]
struct SessionFields {
    link_token: Option<String>,
    link_session_id: Option<String>,
    status: Option<String>,
    public_tokens: Option<Vec<String>>,
    public_token: Option<String>,
    error: Option<WireError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(body: Value) -> ReconcileResult<WebhookEvent> {
        let raw = serde_json::to_vec(&body).unwrap();
        WebhookEnvelope::parse(&raw).unwrap().classify()
    }

    #[test]
    fn test_non_object_bodies_rejected() {
        assert!(WebhookEnvelope::parse(b"not json").is_none());
        assert!(WebhookEnvelope::parse(b"[1,2]").is_none());
        assert!(WebhookEnvelope::parse(b"\"ITEM\"").is_none());
        assert!(WebhookEnvelope::parse(b"{}").is_some());
    }

    #[test]
    fn test_login_required_is_reauth_not_error() {
        let event = classify(json!({
            "webhook_type": "ITEM",
            "webhook_code": "ERROR",
            "item_id": "it-1",
            "error": {"error_type": "ITEM_ERROR", "error_code": "ITEM_LOGIN_REQUIRED", "error_message": "login"}
        }))
        .unwrap();
        let WebhookEvent::Item(item) = event else {
            panic!("expected item event");
        };
        assert_eq!(item.provider_item_id, "it-1");
        assert!(matches!(item.kind, ItemEventKind::ReauthRequired(ref e) if e.code == "ITEM_LOGIN_REQUIRED"));
    }

    #[test]
    fn test_other_error_codes_are_generic() {
        let event = classify(json!({
            "webhook_type": "ITEM", "webhook_code": "ERROR", "item_id": "it-1",
            "error": {"error_code": "INSTITUTION_DOWN"}
        }))
        .unwrap();
        assert!(matches!(
            event,
            WebhookEvent::Item(ItemEvent { kind: ItemEventKind::Error(_), .. })
        ));
    }

    #[test]
    fn test_error_without_error_object() {
        let event = classify(json!({
            "webhook_type": "ITEM", "webhook_code": "ERROR", "item_id": "it-1", "error": null
        }))
        .unwrap();
        let WebhookEvent::Item(ItemEvent { kind: ItemEventKind::Error(info), .. }) = event else {
            panic!("expected generic error");
        };
        assert_eq!(info.code, "UNKNOWN_ERROR");
    }

    #[test]
    fn test_item_event_without_item_id_is_validation_error() {
        let err = classify(json!({"webhook_type": "ITEM", "webhook_code": "LOGIN_REPAIRED"}))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[test]
    fn test_pending_expiration_reason() {
        let event = classify(json!({
            "webhook_type": "ITEM", "webhook_code": "PENDING_EXPIRATION", "item_id": "it-1",
            "consent_expiration_time": "2024-05-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::Item(ItemEvent {
                provider_item_id: "it-1".to_string(),
                kind: ItemEventKind::PendingDisconnect {
                    reason: Some("2024-05-01T00:00:00Z".to_string())
                },
            })
        );
    }

    #[test]
    fn test_account_revoked_requires_account_id() {
        let ok = classify(json!({
            "webhook_type": "ITEM", "webhook_code": "USER_ACCOUNT_REVOKED",
            "item_id": "it-1", "account_id": "acc-9"
        }))
        .unwrap();
        assert!(matches!(
            ok,
            WebhookEvent::Item(ItemEvent { kind: ItemEventKind::AccountRevoked { ref account_id }, .. }) if account_id == "acc-9"
        ));

        let err = classify(json!({
            "webhook_type": "ITEM", "webhook_code": "USER_ACCOUNT_REVOKED", "item_id": "it-1"
        }))
        .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[test]
    fn test_sync_updates_flags_default_false() {
        let event = classify(json!({
            "webhook_type": "TRANSACTIONS", "webhook_code": "SYNC_UPDATES_AVAILABLE",
            "item_id": "it-1", "initial_update_complete": true
        }))
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::SyncUpdates(SyncUpdatesEvent {
                provider_item_id: "it-1".to_string(),
                initial_update_complete: true,
                historical_update_complete: false,
            })
        );
    }

    #[test]
    fn test_session_tokens_both_shapes() {
        let multi = classify(json!({
            "webhook_type": "LINK", "webhook_code": "SESSION_FINISHED",
            "link_token": "link-1", "link_session_id": "s-1", "status": "SUCCESS",
            "public_tokens": ["public-a", "public-b"]
        }))
        .unwrap();
        let WebhookEvent::LinkSession(session) = multi else {
            panic!("expected session");
        };
        assert!(session.is_success());
        assert_eq!(session.public_tokens, vec!["public-a", "public-b"]);

        let legacy = classify(json!({
            "webhook_type": "LINK", "webhook_code": "SESSION_FINISHED",
            "link_token": "link-1", "status": "success", "public_token": "public-a"
        }))
        .unwrap();
        let WebhookEvent::LinkSession(session) = legacy else {
            panic!("expected session");
        };
        assert_eq!(session.public_tokens, vec!["public-a"]);
    }

    #[test]
    fn test_session_without_link_token_is_validation_error() {
        let err = classify(json!({
            "webhook_type": "LINK", "webhook_code": "SESSION_FINISHED", "status": "SUCCESS"
        }))
        .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[test]
    fn test_unknown_events_unhandled() {
        let event = classify(json!({
            "webhook_type": "HOLDINGS", "webhook_code": "DEFAULT_UPDATE", "item_id": "it-1"
        }))
        .unwrap();
        assert!(matches!(event, WebhookEvent::Unhandled { .. }));

        let event = classify(json!({
            "webhook_type": "ITEM", "webhook_code": "WEBHOOK_UPDATE_ACKNOWLEDGED", "item_id": "it-1"
        }))
        .unwrap();
        assert!(matches!(event, WebhookEvent::Unhandled { .. }));
    }

    #[test]
    fn test_missing_codes_is_validation_error() {
        let err = classify(json!({"item_id": "it-1"})).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }
}
