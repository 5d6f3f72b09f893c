use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::db::{format_utc, parse_utc};
use crate::embedding::cosine_distance;
use crate::error::MnemaError;
use crate::memory::record::{MemoryRecord, Tag};

const RECORD_COLUMNS: &str = "id, user_id, text, tag, embedding, created_at, last_accessed, \
                              exact_hash, has_conflicts, conflict_ids, archived, archive_reason";

/// Outcome of an insert attempt: the unique `(user_id, exact_hash)` index
/// is the authoritative exact-duplicate check, not the in-process cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateHash,
}

/// Durable per-user memory collection over the `memories` table.
///
/// Nearest-neighbour lookups scan the `(user_id, tag)` scope and rank by
/// cosine distance in-process; the scope is small by construction (quota),
/// and the `MemoryStore` surface is the seam where an ANN-indexed backend
/// would slot in.
#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Insert a record and add the reverse conflict edges in one
    /// transaction, so no record is ever visible without its symmetric
    /// edges. `back_edges` carries each neighbour's full replacement list.
    pub async fn insert_with_back_edges(
        &self,
        record: &MemoryRecord,
        back_edges: &[(String, Vec<String>)],
    ) -> Result<InsertOutcome, MnemaError> {
        let mut tx = self.pool.begin().await?;

        let conflict_ids = serde_json::to_string(&record.conflict_ids)
            .map_err(|err| MnemaError::Internal(err.to_string()))?;
        let inserted = sqlx::query(
            "INSERT INTO memories \
             (id, user_id, text, tag, embedding, created_at, last_accessed, \
              exact_hash, has_conflicts, conflict_ids, archived, archive_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.text)
        .bind(record.tag.as_str())
        .bind(encode_embedding(&record.embedding))
        .bind(format_utc(record.created_at))
        .bind(format_utc(record.last_accessed))
        .bind(&record.exact_hash)
        .bind(record.has_conflicts as i64)
        .bind(&conflict_ids)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Ok(InsertOutcome::DuplicateHash);
            }
            return Err(err.into());
        }

        for (neighbour_id, ids) in back_edges {
            let encoded = serde_json::to_string(ids)
                .map_err(|err| MnemaError::Internal(err.to_string()))?;
            sqlx::query(
                "UPDATE memories SET conflict_ids = ?, has_conflicts = 1 \
                 WHERE id = ? AND user_id = ?",
            )
            .bind(&encoded)
            .bind(neighbour_id)
            .bind(&record.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    /// Delete a record after rewriting each neighbour's edge list, all in
    /// one transaction. `repairs` carries each neighbour's replacement
    /// list with the deleted id already removed.
    pub async fn delete_with_edge_repairs(
        &self,
        user_id: &str,
        id: &str,
        repairs: &[(String, Vec<String>)],
    ) -> Result<(), MnemaError> {
        let mut tx = self.pool.begin().await?;

        for (neighbour_id, ids) in repairs {
            let encoded = serde_json::to_string(ids)
                .map_err(|err| MnemaError::Internal(err.to_string()))?;
            sqlx::query(
                "UPDATE memories SET conflict_ids = ?, has_conflicts = ? \
                 WHERE id = ? AND user_id = ?",
            )
            .bind(&encoded)
            .bind(!ids.is_empty() as i64)
            .bind(neighbour_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM memories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn touch_last_accessed(
        &self,
        user_id: &str,
        ids: &[String],
        instant: DateTime<Utc>,
    ) -> Result<(), MnemaError> {
        let encoded = format_utc(instant);
        for id in ids {
            sqlx::query("UPDATE memories SET last_accessed = ? WHERE id = ? AND user_id = ?")
                .bind(&encoded)
                .bind(id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn mark_archived(
        &self,
        user_id: &str,
        id: &str,
        reason: &str,
    ) -> Result<(), MnemaError> {
        sqlx::query(
            "UPDATE memories SET archived = 1, archive_reason = ? WHERE id = ? AND user_id = ?",
        )
        .bind(reason)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn count(&self, user_id: &str) -> Result<usize, MnemaError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM memories WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as usize)
    }

    pub async fn get(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>, MnemaError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM memories WHERE id = ? AND user_id = ?"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn get_many(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<MemoryRecord>, MnemaError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(user_id, id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Up to `k` records in the user's (optionally tag-scoped) collection,
    /// nearest first by cosine distance to `embedding`.
    pub async fn nearest(
        &self,
        user_id: &str,
        tag: Option<Tag>,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, MnemaError> {
        let rows = match tag {
            Some(tag) => {
                sqlx::query(&format!(
                    "SELECT {RECORD_COLUMNS} FROM memories WHERE user_id = ? AND tag = ?"
                ))
                .bind(user_id)
                .bind(tag.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {RECORD_COLUMNS} FROM memories WHERE user_id = ?"
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row_to_record(row)?;
            let distance = cosine_distance(&record.embedding, embedding);
            scored.push((record, distance));
        }
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        debug!(user_id, k, found = scored.len(), "nearest-neighbour scan");
        Ok(scored)
    }

    /// Case-insensitive substring top-up for short semantic result sets.
    /// `tokens` are pre-filtered by the engine; rows already in `exclude`
    /// are skipped. Most recent first.
    pub async fn keyword_search(
        &self,
        user_id: &str,
        tag: Option<Tag>,
        tokens: &[String],
        exclude: &HashSet<String>,
        k: usize,
    ) -> Result<Vec<MemoryRecord>, MnemaError> {
        if tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM memories WHERE user_id = ?");
        if tag.is_some() {
            sql.push_str(" AND tag = ?");
        }
        let clauses: Vec<&str> = tokens.iter().map(|_| "text LIKE ?").collect();
        sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql).bind(user_id);
        if let Some(tag) = tag {
            query = query.bind(tag.as_str());
        }
        for token in tokens {
            query = query.bind(format!("%{token}%"));
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut records = Vec::new();
        for row in rows {
            let record = row_to_record(row)?;
            if exclude.contains(&record.id) {
                continue;
            }
            records.push(record);
            if records.len() == k {
                break;
            }
        }
        Ok(records)
    }

    /// Listing for `what_do_you_know`: newest first, no scoring.
    pub async fn list(
        &self,
        user_id: &str,
        tag: Option<Tag>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MnemaError> {
        let rows = match tag {
            Some(tag) => {
                sqlx::query(&format!(
                    "SELECT {RECORD_COLUMNS} FROM memories \
                     WHERE user_id = ? AND tag = ? ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(user_id)
                .bind(tag.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {RECORD_COLUMNS} FROM memories \
                     WHERE user_id = ? ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(user_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn all_for_user(&self, user_id: &str) -> Result<Vec<MemoryRecord>, MnemaError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM memories WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// `user_id:exact_hash` keys for warming the engine's fast-reject cache.
    pub async fn load_hash_keys(&self) -> Result<Vec<String>, MnemaError> {
        let rows = sqlx::query("SELECT user_id, exact_hash FROM memories")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let user_id: String = row.try_get("user_id")?;
                let hash: String = row.try_get("exact_hash")?;
                Ok(format!("{user_id}:{hash}"))
            })
            .collect()
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<MemoryRecord, MnemaError> {
    let tag: String = row.try_get("tag")?;
    let created_at: String = row.try_get("created_at")?;
    let last_accessed: String = row.try_get("last_accessed")?;
    let conflict_ids: String = row.try_get("conflict_ids")?;
    let embedding: Vec<u8> = row.try_get("embedding")?;

    Ok(MemoryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        text: row.try_get("text")?,
        tag: Tag::parse(&tag)?,
        embedding: decode_embedding(&embedding),
        created_at: parse_utc(&created_at)?,
        last_accessed: parse_utc(&last_accessed)?,
        exact_hash: row.try_get("exact_hash")?,
        has_conflicts: row.try_get::<i64, _>("has_conflicts")? != 0,
        conflict_ids: serde_json::from_str(&conflict_ids)
            .map_err(|err| MnemaError::Internal(format!("corrupt conflict_ids: {err}")))?,
        archived: row.try_get::<i64, _>("archived")? != 0,
        archive_reason: row.try_get("archive_reason")?,
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
