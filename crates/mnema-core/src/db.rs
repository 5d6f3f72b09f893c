use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
pub use sqlx::SqlitePool;

use crate::error::MnemaError;

// ── Schema ────────────────────────────────────────────────────────────────────

const MIGRATE: &str = r#"
CREATE TABLE IF NOT EXISTS auth_tokens (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    token      TEXT    UNIQUE NOT NULL,
    user_id    TEXT    NOT NULL,
    user_name  TEXT,
    created_at TEXT    NOT NULL,
    last_used  TEXT    NOT NULL,
    is_active  INTEGER NOT NULL DEFAULT 1,
    is_admin   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS memories (
    id             TEXT    PRIMARY KEY,
    user_id        TEXT    NOT NULL,
    text           TEXT    NOT NULL,
    tag            TEXT    NOT NULL,
    embedding      BLOB    NOT NULL,
    created_at     TEXT    NOT NULL,
    last_accessed  TEXT    NOT NULL,
    exact_hash     TEXT    NOT NULL,
    has_conflicts  INTEGER NOT NULL DEFAULT 0,
    conflict_ids   TEXT    NOT NULL DEFAULT '[]',
    archived       INTEGER NOT NULL DEFAULT 0,
    archive_reason TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_user_hash
    ON memories (user_id, exact_hash);

CREATE INDEX IF NOT EXISTS idx_memories_user_tag
    ON memories (user_id, tag);

CREATE TABLE IF NOT EXISTS short_term_memories (
    user_id    TEXT PRIMARY KEY,
    id         TEXT NOT NULL,
    title      TEXT,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS waitlist_emails (
    email          TEXT PRIMARY KEY,
    created_at     TEXT NOT NULL,
    referrer_token TEXT
);
"#;

/// Open (or create) the service database and ensure the schema exists.
pub async fn connect(db_path: &Path) -> Result<SqlitePool, MnemaError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&url).await?;
    sqlx::query(MIGRATE).execute(&pool).await?;
    Ok(pool)
}

// ── Timestamp encoding ────────────────────────────────────────────────────────
//
// All instants are stored as ISO-8601 text with a trailing `Z` and microsecond
// precision. The fixed width keeps lexicographic and chronological order in
// agreement, which the `created_at DESC` queries rely on.

pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, MnemaError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| MnemaError::Internal(format!("corrupt timestamp {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_with_trailing_z() {
        let now = Utc::now();
        let encoded = format_utc(now);
        assert!(encoded.ends_with('Z'), "expected trailing Z: {encoded}");
        let decoded = parse_utc(&encoded).unwrap();
        assert_eq!(decoded.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn timestamp_order_matches_string_order() {
        let earlier = format_utc(Utc::now() - chrono::Duration::days(2));
        let later = format_utc(Utc::now());
        assert!(earlier < later);
    }

    #[tokio::test]
    async fn schema_is_created_on_connect() {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("mnema.db")).await.unwrap();
        sqlx::query("SELECT COUNT(*) FROM memories")
            .fetch_one(&pool)
            .await
            .unwrap();
        sqlx::query("SELECT COUNT(*) FROM auth_tokens")
            .fetch_one(&pool)
            .await
            .unwrap();
    }
}
