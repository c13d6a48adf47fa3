//! Message Log (C3): durable, append-only message storage used both as a
//! store-and-forward spool and as conversation history.

use chat_core::{conversation_id, HistoryEntry, SpooledMessage};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database,
}

/// Durable record of every message, indexed for per-recipient undelivered
/// lookups and per-conversation range scans.
#[derive(Clone)]
pub struct MessageLog {
    pool: SqlitePool,
}

impl MessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a row. `conversation_id` is derived here, never accepted from callers.
    pub async fn append(&self, sender: &str, recipient: &str, body: &str, delivered: bool) -> Result<(), StoreError> {
        let conv = conversation_id(sender, recipient);
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO messages (sender, recipient, body, timestamp, conversation_id, delivered) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sender)
        .bind(recipient)
        .bind(body)
        .bind(now)
        .bind(conv)
        .bind(delivered)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "append failed");
            StoreError::Database
        })?;
        Ok(())
    }

    /// All rows with `recipient = U ∧ delivered = false`, oldest first.
    pub async fn drain_undelivered(&self, recipient: &str) -> Result<Vec<SpooledMessage>, StoreError> {
        let rows: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT sender, body, timestamp FROM messages \
             WHERE recipient = ? AND delivered = 0 ORDER BY timestamp ASC, id ASC",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "drain_undelivered failed");
            StoreError::Database
        })?;
        Ok(rows
            .into_iter()
            .map(|(sender, body, timestamp)| SpooledMessage { sender, body, timestamp })
            .collect())
    }

    /// Flags every undelivered row for `recipient` as delivered.
    pub async fn mark_delivered(&self, recipient: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET delivered = 1 WHERE recipient = ? AND delivered = 0")
            .bind(recipient)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "mark_delivered failed");
                StoreError::Database
            })?;
        Ok(())
    }

    /// `drain_undelivered` and `mark_delivered` composed into one serializable
    /// transaction, so a concurrent `append` for the same recipient either commits
    /// entirely before the `SELECT` (and is included here) or entirely after
    /// (and is left for the next drain) — no message is ever drained twice nor
    /// flagged delivered without having been read back. This is the only
    /// entry point the Connection Broker uses; `drain_undelivered`/`mark_delivered`
    /// remain available individually as the spec's public vocabulary.
    pub async fn drain_and_mark(&self, recipient: &str) -> Result<Vec<SpooledMessage>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!(error = %e, "drain_and_mark: failed to start transaction");
            StoreError::Database
        })?;

        let rows: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT sender, body, timestamp FROM messages \
             WHERE recipient = ? AND delivered = 0 ORDER BY timestamp ASC, id ASC",
        )
        .bind(recipient)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, "drain_and_mark: select failed");
            StoreError::Database
        })?;

        sqlx::query("UPDATE messages SET delivered = 1 WHERE recipient = ? AND delivered = 0")
            .bind(recipient)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(error = %e, "drain_and_mark: update failed");
                StoreError::Database
            })?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, "drain_and_mark: commit failed");
            StoreError::Database
        })?;

        Ok(rows
            .into_iter()
            .map(|(sender, body, timestamp)| SpooledMessage { sender, body, timestamp })
            .collect())
    }

    /// All rows for the pair `(a, b)` in either direction, oldest first.
    pub async fn history(&self, a: &str, b: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let conv = conversation_id(a, b);
        let rows: Vec<(String, String, String, DateTime<Utc>, bool)> = sqlx::query_as(
            "SELECT sender, recipient, body, timestamp, delivered FROM messages \
             WHERE conversation_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(conv)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "history failed");
            StoreError::Database
        })?;
        Ok(rows
            .into_iter()
            .map(|(sender, recipient, body, timestamp, delivered)| HistoryEntry {
                sender,
                recipient,
                body,
                timestamp,
                delivered,
            })
            .collect())
    }

    /// Distinct counterparties for `user`, sorted ascending.
    pub async fn contacts(&self, user: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT other FROM ( \
                 SELECT recipient AS other FROM messages WHERE sender = ? \
                 UNION \
                 SELECT sender AS other FROM messages WHERE recipient = ? \
             ) ORDER BY other ASC",
        )
        .bind(user)
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "contacts failed");
            StoreError::Database
        })?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }
}
