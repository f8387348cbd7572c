//! Account rows
//!
//! Accounts are inserted by the admin surface and mutated by the token
//! lifecycle worker. They are never deleted, only soft-deactivated.

use sqlx::FromRow;

use crate::error::AppResult;

use super::Store;

/// One upstream credential as persisted
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub email: String,
    /// Sealed password (base64 nonce||ciphertext)
    pub password: String,
    pub access_token: Option<String>,
    pub puid: Option<String>,
    pub is_active: bool,
}

impl Store {
    /// Insert a new account with an already-sealed password.
    pub async fn insert_account(&self, email: &str, sealed_password: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO accounts (email, password, is_active) VALUES (?, ?, TRUE)",
        )
        .bind(email)
        .bind(sealed_password)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All accounts still in rotation.
    pub async fn active_accounts(&self) -> AppResult<Vec<AccountRow>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT id, email, password, access_token, puid, is_active \
             FROM accounts WHERE is_active = TRUE ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Look up one account by email.
    pub async fn account(&self, email: &str) -> AppResult<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, email, password, access_token, puid, is_active \
             FROM accounts WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Persist a freshly-acquired access token. The puid belongs to the
    /// previous login and is cleared with it.
    pub async fn save_access_token(&self, email: &str, access_token: &str) -> AppResult<()> {
        sqlx::query("UPDATE accounts SET access_token = ?, puid = NULL WHERE email = ?")
            .bind(access_token)
            .bind(email)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Soft-deactivate or reinstate an account.
    pub async fn set_account_active(&self, email: &str, active: bool) -> AppResult<()> {
        sqlx::query("UPDATE accounts SET is_active = ? WHERE email = ?")
            .bind(active)
            .bind(email)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
