//! Link token and link session history persistence.

use crate::storage::error::Result;
use crate::storage::models::{LinkSessionRecord, LinkToken, LinkTokenRow, NewLinkToken};
use crate::storage::{now_millis, Database};

impl Database {
    pub async fn insert_link_token(&self, token: &NewLinkToken) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO link_tokens (token, client_id, mode, item_id, status, expires_at, created_at)
               VALUES (?, ?, ?, ?, 'pending', ?, ?)"#,
        )
        .bind(&token.token)
        .bind(&token.client_id)
        .bind(token.mode.as_str())
        .bind(token.item_id)
        .bind(token.expires_at.map(|t| t.timestamp_millis()))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_link_token(&self, token: &str) -> Result<Option<LinkToken>> {
        let row = sqlx::query_as::<_, LinkTokenRow>(
            r#"SELECT token, client_id, mode, item_id, status, last_session_status,
                      last_error_code, last_error_message, expires_at, created_at, used_at
               FROM link_tokens WHERE token = ?"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LinkToken::try_from).transpose()
    }

    /// Append a history row and mirror its outcome onto the token, if it exists.
    pub async fn record_link_session(&self, record: &LinkSessionRecord) -> Result<i64> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO link_sessions (
                   link_token, link_session_id, status, error_type, error_code, error_message,
                   created_at
               )
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.link_token)
        .bind(&record.link_session_id)
        .bind(&record.status)
        .bind(&record.error_type)
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE link_tokens
               SET last_session_status = ?, last_error_code = ?, last_error_message = ?
               WHERE token = ?"#,
        )
        .bind(&record.status)
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(&record.link_token)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.last_insert_rowid())
    }

    /// Flip `pending → used`. Returns false if the token was not pending.
    pub async fn mark_link_token_used(&self, token: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE link_tokens SET status = 'used', used_at = ? WHERE token = ? AND status = 'pending'",
        )
        .bind(now_millis())
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn link_sessions_for_token(&self, token: &str) -> Result<Vec<LinkSessionRecord>> {
        let rows = sqlx::query_as::<_, LinkSessionRecord>(
            r#"SELECT link_token, link_session_id, status, error_type, error_code, error_message
               FROM link_sessions WHERE link_token = ? ORDER BY id"#,
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{LinkMode, LinkTokenStatus};

    #[tokio::test]
    async fn test_mark_used_exactly_once() {
        let db = Database::in_memory().await.unwrap();
        db.insert_link_token(&NewLinkToken {
            token: "link-sandbox-1".to_string(),
            client_id: "c1".to_string(),
            mode: LinkMode::Create,
            item_id: None,
            expires_at: None,
        })
        .await
        .unwrap();

        assert!(db.mark_link_token_used("link-sandbox-1").await.unwrap());
        assert!(!db.mark_link_token_used("link-sandbox-1").await.unwrap());

        let token = db.get_link_token("link-sandbox-1").await.unwrap().unwrap();
        assert_eq!(token.status, LinkTokenStatus::Used);
        assert!(token.used_at.is_some());
    }

    #[tokio::test]
    async fn test_session_history_mirrors_last_outcome() {
        let db = Database::in_memory().await.unwrap();
        db.insert_link_token(&NewLinkToken {
            token: "link-sandbox-2".to_string(),
            client_id: "c1".to_string(),
            mode: LinkMode::Create,
            item_id: None,
            expires_at: None,
        })
        .await
        .unwrap();

        db.record_link_session(&LinkSessionRecord {
            link_token: "link-sandbox-2".to_string(),
            status: "exited".to_string(),
            error_code: Some("INSTITUTION_NOT_RESPONDING".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        db.record_link_session(&LinkSessionRecord {
            link_token: "link-sandbox-2".to_string(),
            status: "success".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let history = db.link_sessions_for_token("link-sandbox-2").await.unwrap();
        assert_eq!(history.len(), 2);
        let token = db.get_link_token("link-sandbox-2").await.unwrap().unwrap();
        assert_eq!(token.last_session_status.as_deref(), Some("success"));
        assert!(token.last_error_code.is_none());
    }
}
