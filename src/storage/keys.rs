//! Encryption key rows. Keys are deactivated on rotation, never deleted.

use crate::storage::error::{Result, StorageError};
use crate::storage::models::EncryptionKeyRecord;
use crate::storage::{now_millis, Database};

const KEY_COLUMNS: &str =
    "id, key_name, version, key_material, is_active, created_at, deactivated_at";

impl Database {
    /// Newest key for a name, preferring the active one.
    ///
    /// `None` means no key was ever created under this name.
    pub async fn latest_key(&self, key_name: &str) -> Result<Option<EncryptionKeyRecord>> {
        let key = sqlx::query_as::<_, EncryptionKeyRecord>(&format!(
            r#"SELECT {KEY_COLUMNS} FROM encryption_keys
               WHERE key_name = ?
               ORDER BY is_active DESC, version DESC LIMIT 1"#
        ))
        .bind(key_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    pub async fn key_by_id(&self, id: i64) -> Result<Option<EncryptionKeyRecord>> {
        let key = sqlx::query_as::<_, EncryptionKeyRecord>(&format!(
            "SELECT {KEY_COLUMNS} FROM encryption_keys WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    /// Insert the next version of a key and make it the only active one.
    pub async fn insert_key_version(
        &self,
        key_name: &str,
        key_material: &str,
    ) -> Result<EncryptionKeyRecord> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM encryption_keys WHERE key_name = ?")
                .bind(key_name)
                .fetch_one(&mut *tx)
                .await?;
        let version = current.unwrap_or(0) + 1;

        sqlx::query(
            r#"UPDATE encryption_keys SET is_active = 0, deactivated_at = ?
               WHERE key_name = ? AND is_active = 1"#,
        )
        .bind(now)
        .bind(key_name)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"INSERT INTO encryption_keys (key_name, version, key_material, is_active, created_at)
               VALUES (?, ?, ?, 1, ?)"#,
        )
        .bind(key_name)
        .bind(version)
        .bind(key_material)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let id = inserted.last_insert_rowid();
        self.key_by_id(id)
            .await?
            .ok_or_else(|| StorageError::corrupt(format!("key {id} vanished after insert")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rotation_keeps_one_active() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.latest_key("tokens").await.unwrap().is_none());

        let v1 = db.insert_key_version("tokens", "a2V5MQ==").await.unwrap();
        let v2 = db.insert_key_version("tokens", "a2V5Mg==").await.unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);

        let latest = db.latest_key("tokens").await.unwrap().unwrap();
        assert_eq!(latest.id, v2.id);
        assert!(latest.is_active);

        // Historical key still readable by id
        let old = db.key_by_id(v1.id).await.unwrap().unwrap();
        assert!(!old.is_active);
        assert!(old.deactivated_at.is_some());
    }

    #[tokio::test]
    async fn test_key_names_are_independent() {
        let db = Database::in_memory().await.unwrap();
        db.insert_key_version("a", "eA==").await.unwrap();
        let b = db.insert_key_version("b", "eQ==").await.unwrap();
        assert_eq!(b.version, 1);
        assert!(db.latest_key("a").await.unwrap().unwrap().is_active);
    }
}
