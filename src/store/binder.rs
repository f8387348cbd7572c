//! Conversation binder
//!
//! Remembers, per end user, which account owns their thread and where the
//! thread currently points. The anchor is updated transactionally after
//! every successful turn so a follow-up always resumes the latest
//! assistant message.

use sqlx::FromRow;
use tracing::debug;

use crate::error::AppResult;

use super::Store;

/// The resolved anchor for one end user
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChatInfo {
    /// Account that owns the thread
    pub email: String,
    pub conversation_id: String,
    /// Current node, i.e. the last assistant message id
    pub parent_id: String,
}

impl Store {
    /// Resolve the anchor for `openid`. Returns `None` when the user is
    /// unknown or their anchor has been cleared.
    pub async fn get_chat_info(&self, openid: &str) -> AppResult<Option<ChatInfo>> {
        let info = sqlx::query_as::<_, ChatInfo>(
            "SELECT c.owner_email AS email, c.conversation_id, c.current_node AS parent_id \
             FROM users u \
             JOIN conversations c ON c.conversation_id = u.conversation_id \
             WHERE u.openid = ?",
        )
        .bind(openid)
        .fetch_optional(self.pool())
        .await?;
        Ok(info)
    }

    /// Record the anchor after a successful turn.
    ///
    /// First turn creates the user and the conversation row; a follow-up
    /// on the same thread advances `current_node`; a new thread gets its
    /// own conversation row and the user is repointed.
    pub async fn record_turn(
        &self,
        email: &str,
        openid: &str,
        conversation_id: &str,
        current_node: &str,
    ) -> AppResult<()> {
        let mut tx = self.pool().begin().await?;

        let user: Option<(i64, String)> =
            sqlx::query_as("SELECT id, conversation_id FROM users WHERE openid = ? FOR UPDATE")
                .bind(openid)
                .fetch_optional(&mut *tx)
                .await?;

        match user {
            None => {
                let result = sqlx::query("INSERT INTO users (openid, conversation_id) VALUES (?, ?)")
                    .bind(openid)
                    .bind(conversation_id)
                    .execute(&mut *tx)
                    .await?;
                let user_id = result.last_insert_id();

                sqlx::query(
                    "INSERT INTO conversations \
                     (conversation_id, current_node, owner_email, user_id) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(conversation_id)
                .bind(current_node)
                .bind(email)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                debug!(openid = %openid, conversation_id = %conversation_id, "anchor created");
            }
            Some((user_id, anchored_id)) => {
                let updated = sqlx::query(
                    "UPDATE conversations SET current_node = ?, update_time = NOW() \
                     WHERE conversation_id = ?",
                )
                .bind(current_node)
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if updated == 0 {
                    sqlx::query(
                        "INSERT INTO conversations \
                         (conversation_id, current_node, owner_email, user_id) \
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(conversation_id)
                    .bind(current_node)
                    .bind(email)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                }

                if anchored_id != conversation_id {
                    sqlx::query("UPDATE users SET conversation_id = ? WHERE id = ?")
                        .bind(conversation_id)
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?;
                    debug!(openid = %openid, conversation_id = %conversation_id, "anchor repointed");
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Forget the user's thread so the next turn starts fresh. Unknown
    /// users are a no-op.
    pub async fn new_conversation(&self, openid: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET conversation_id = '' WHERE openid = ?")
            .bind(openid)
            .execute(self.pool())
            .await?;
        debug!(openid = %openid, "anchor cleared");
        Ok(())
    }
}

// The binder is exercised end-to-end against a real database; these stay
// out of the default run.
#[cfg(test)]
mod tests {
    use super::*;

    async fn store_from_env() -> Option<Store> {
        let uri = std::env::var("mysql_uri").ok()?;
        Store::connect(&uri).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires mysql_uri pointing at a scratch database"]
    async fn test_anchor_roundtrip() {
        let store = store_from_env().await.expect("mysql_uri must be set");
        let openid = format!("it-{}", uuid::Uuid::new_v4());
        let cid = uuid::Uuid::new_v4().to_string();
        let node1 = uuid::Uuid::new_v4().to_string();
        let node2 = uuid::Uuid::new_v4().to_string();

        assert_eq!(store.get_chat_info(&openid).await.unwrap(), None);

        store
            .record_turn("a@x", &openid, &cid, &node1)
            .await
            .unwrap();
        let info = store.get_chat_info(&openid).await.unwrap().unwrap();
        assert_eq!(info.email, "a@x");
        assert_eq!(info.conversation_id, cid);
        assert_eq!(info.parent_id, node1);

        // Follow-up on the same thread advances the node only.
        store
            .record_turn("a@x", &openid, &cid, &node2)
            .await
            .unwrap();
        let info = store.get_chat_info(&openid).await.unwrap().unwrap();
        assert_eq!(info.parent_id, node2);
    }

    #[tokio::test]
    #[ignore = "requires mysql_uri pointing at a scratch database"]
    async fn test_new_conversation_clears_anchor() {
        let store = store_from_env().await.expect("mysql_uri must be set");
        let openid = format!("it-{}", uuid::Uuid::new_v4());
        let cid = uuid::Uuid::new_v4().to_string();
        let node = uuid::Uuid::new_v4().to_string();

        store
            .record_turn("a@x", &openid, &cid, &node)
            .await
            .unwrap();
        store.new_conversation(&openid).await.unwrap();
        assert_eq!(store.get_chat_info(&openid).await.unwrap(), None);
    }
}
