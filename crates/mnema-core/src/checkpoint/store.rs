use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::db::{format_utc, parse_utc};
use crate::error::MnemaError;

/// The single short-term context slot a user holds.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a save: when a prior slot was displaced, its creation instant
/// is reported so the caller can surface the overwrite.
#[derive(Debug, Clone)]
pub struct SavedCheckpoint {
    pub id: String,
    pub overwrote: bool,
    pub previous_created_at: Option<DateTime<Utc>>,
}

/// At-most-one conversation checkpoint per user (`short_term_memories`).
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(
        &self,
        user_id: &str,
        content: &str,
        title: Option<&str>,
    ) -> Result<SavedCheckpoint, MnemaError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MnemaError::validation("checkpoint text must not be empty"));
        }

        let previous: Option<String> =
            sqlx::query("SELECT created_at FROM short_term_memories WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.try_get("created_at"))
                .transpose()?;

        let now = Utc::now();
        let id = format!("stm_{}", now.timestamp_millis());
        sqlx::query(
            "INSERT INTO short_term_memories (user_id, id, title, content, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (user_id) DO UPDATE SET \
               id = excluded.id, title = excluded.title, \
               content = excluded.content, created_at = excluded.created_at",
        )
        .bind(user_id)
        .bind(&id)
        .bind(title)
        .bind(content)
        .bind(format_utc(now))
        .execute(&self.pool)
        .await?;

        let previous_created_at = previous.as_deref().map(parse_utc).transpose()?;
        debug!(user_id, overwrote = previous_created_at.is_some(), "checkpoint saved");
        Ok(SavedCheckpoint {
            id,
            overwrote: previous_created_at.is_some(),
            previous_created_at,
        })
    }

    pub async fn load(&self, user_id: &str) -> Result<Option<Checkpoint>, MnemaError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, content, created_at \
             FROM short_term_memories WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let created_at: String = row.try_get("created_at")?;
            Ok(Checkpoint {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                title: row.try_get("title")?,
                content: row.try_get("content")?,
                created_at: parse_utc(&created_at)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    async fn store() -> (CheckpointStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("ckpt.db")).await.unwrap();
        (CheckpointStore::new(pool), dir)
    }

    #[tokio::test]
    async fn first_save_does_not_report_an_overwrite() {
        let (store, _dir) = store().await;
        let saved = store.save("user_a", "context v1", None).await.unwrap();
        assert!(!saved.overwrote);
        assert!(saved.previous_created_at.is_none());

        let loaded = store.load("user_a").await.unwrap().unwrap();
        assert_eq!(loaded.content, "context v1");
        assert!(loaded.title.is_none());
    }

    #[tokio::test]
    async fn second_save_overwrites_and_names_the_displaced_instant() {
        let (store, _dir) = store().await;
        store.save("user_a", "context v1", Some("draft")).await.unwrap();
        let first = store.load("user_a").await.unwrap().unwrap();

        let saved = store.save("user_a", "context v2", None).await.unwrap();
        assert!(saved.overwrote);
        assert_eq!(
            saved.previous_created_at.unwrap().timestamp_micros(),
            first.created_at.timestamp_micros()
        );

        let loaded = store.load("user_a").await.unwrap().unwrap();
        assert_eq!(loaded.content, "context v2");
        assert!(loaded.title.is_none(), "title is replaced, not merged");
    }

    #[tokio::test]
    async fn slots_are_per_user() {
        let (store, _dir) = store().await;
        store.save("user_a", "alice context", None).await.unwrap();
        store.save("user_b", "bob context", None).await.unwrap();

        assert_eq!(store.load("user_a").await.unwrap().unwrap().content, "alice context");
        assert_eq!(store.load("user_b").await.unwrap().unwrap().content, "bob context");
    }

    #[tokio::test]
    async fn missing_slot_is_none() {
        let (store, _dir) = store().await;
        assert!(store.load("user_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.save("user_a", "   ", None).await,
            Err(MnemaError::Validation(_))
        ));
    }
}
