//! Account persistence. Accounts are deactivated, never deleted.

use std::collections::{HashMap, HashSet};

use crate::storage::error::Result;
use crate::storage::models::{Account, AccountSnapshot, AccountSyncSummary};
use crate::storage::{now_millis, Database};

const ACCOUNT_COLUMNS: &str = r#"
    id, item_id, provider_account_id, name, official_name, mask, account_type, subtype,
    current_balance, available_balance, iso_currency_code, active, created_at, updated_at
"#;

impl Database {
    /// Reconcile an item's accounts against the provider's current list.
    ///
    /// Known provider account ids are updated in place, unknown ones inserted
    /// as active, and locally active accounts missing from `snapshots` are
    /// deactivated. Runs in one transaction.
    pub async fn sync_item_accounts(
        &self,
        item_id: i64,
        snapshots: &[AccountSnapshot],
    ) -> Result<AccountSyncSummary> {
        let now = now_millis();
        let mut summary = AccountSyncSummary::default();
        let mut tx = self.pool.begin().await?;

        for account in snapshots {
            let updated = sqlx::query(
                r#"UPDATE accounts
                   SET item_id = ?, name = ?, official_name = ?, mask = ?, account_type = ?,
                       subtype = ?, current_balance = ?, available_balance = ?,
                       iso_currency_code = ?, active = 1, updated_at = ?
                   WHERE provider_account_id = ?"#,
            )
            .bind(item_id)
            .bind(&account.name)
            .bind(&account.official_name)
            .bind(&account.mask)
            .bind(&account.account_type)
            .bind(&account.subtype)
            .bind(account.current_balance)
            .bind(account.available_balance)
            .bind(&account.iso_currency_code)
            .bind(now)
            .bind(&account.provider_account_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() > 0 {
                summary.updated += 1;
                continue;
            }

            sqlx::query(
                r#"INSERT INTO accounts (
                       item_id, provider_account_id, name, official_name, mask, account_type,
                       subtype, current_balance, available_balance, iso_currency_code,
                       active, created_at, updated_at
                   )
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)"#,
            )
            .bind(item_id)
            .bind(&account.provider_account_id)
            .bind(&account.name)
            .bind(&account.official_name)
            .bind(&account.mask)
            .bind(&account.account_type)
            .bind(&account.subtype)
            .bind(account.current_balance)
            .bind(account.available_balance)
            .bind(&account.iso_currency_code)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            summary.inserted += 1;
        }

        let returned: HashSet<&str> = snapshots
            .iter()
            .map(|a| a.provider_account_id.as_str())
            .collect();

        let active: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, provider_account_id FROM accounts WHERE item_id = ? AND active = 1",
        )
        .bind(item_id)
        .fetch_all(&mut *tx)
        .await?;

        for (id, provider_account_id) in active {
            if returned.contains(provider_account_id.as_str()) {
                continue;
            }
            sqlx::query("UPDATE accounts SET active = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            summary.deactivated += 1;
        }

        tx.commit().await?;
        Ok(summary)
    }

    /// Deactivate one account by provider id. Returns false if unknown.
    pub async fn deactivate_account(&self, provider_account_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET active = 0, updated_at = ? WHERE provider_account_id = ?",
        )
        .bind(now_millis())
        .bind(provider_account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn accounts_for_item(&self, item_id: i64) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE item_id = ? ORDER BY id"
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    /// Provider account id → local account id, for the item's accounts.
    pub async fn account_ids_for_item(&self, item_id: i64) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT provider_account_id, id FROM accounts WHERE item_id = ?")
                .bind(item_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::NewItem;

    fn snapshot(id: &str, balance: f64) -> AccountSnapshot {
        AccountSnapshot {
            provider_account_id: id.to_string(),
            name: format!("Account {id}"),
            official_name: None,
            mask: Some("0000".to_string()),
            account_type: Some("depository".to_string()),
            subtype: Some("checking".to_string()),
            current_balance: Some(balance),
            available_balance: None,
            iso_currency_code: Some("USD".to_string()),
        }
    }

    async fn item(db: &Database) -> i64 {
        let key = db.insert_key_version("k", "bWF0ZXJpYWw=").await.unwrap();
        db.insert_item(&NewItem {
            client_id: "c1".to_string(),
            provider_item_id: "it-1".to_string(),
            institution_id: Some("ins_1".to_string()),
            institution_name: None,
            access_token_ciphertext: vec![0],
            access_token_key_id: key.id,
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_deselected_account_deactivated_not_deleted() {
        let db = Database::in_memory().await.unwrap();
        let item_id = item(&db).await;

        let first = db
            .sync_item_accounts(item_id, &[snapshot("A", 10.0), snapshot("B", 20.0)])
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);

        let second = db
            .sync_item_accounts(item_id, &[snapshot("A", 15.0)])
            .await
            .unwrap();
        assert_eq!(
            second,
            AccountSyncSummary {
                inserted: 0,
                updated: 1,
                deactivated: 1
            }
        );

        let accounts = db.accounts_for_item(item_id).await.unwrap();
        assert_eq!(accounts.len(), 2);
        let a = accounts.iter().find(|a| a.provider_account_id == "A").unwrap();
        let b = accounts.iter().find(|a| a.provider_account_id == "B").unwrap();
        assert!(a.active);
        assert_eq!(a.current_balance, Some(15.0));
        assert!(!b.active);
    }

    #[tokio::test]
    async fn test_reselected_account_reactivated() {
        let db = Database::in_memory().await.unwrap();
        let item_id = item(&db).await;

        db.sync_item_accounts(item_id, &[snapshot("A", 1.0)]).await.unwrap();
        assert!(db.deactivate_account("A").await.unwrap());
        assert!(!db.deactivate_account("missing").await.unwrap());

        db.sync_item_accounts(item_id, &[snapshot("A", 1.0)]).await.unwrap();
        let accounts = db.accounts_for_item(item_id).await.unwrap();
        assert!(accounts[0].active);
    }
}
