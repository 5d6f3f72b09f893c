use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MnemaError;

// ── Tags ──────────────────────────────────────────────────────────────────────

/// Closed category set. Callers supply one of these; nothing is inferred
/// from the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Goal,
    Routine,
    Preference,
    Constraint,
    Habit,
    Project,
    Tool,
    Identity,
    Value,
}

impl Tag {
    pub const ALL: [Tag; 9] = [
        Tag::Goal,
        Tag::Routine,
        Tag::Preference,
        Tag::Constraint,
        Tag::Habit,
        Tag::Project,
        Tag::Tool,
        Tag::Identity,
        Tag::Value,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Goal => "goal",
            Tag::Routine => "routine",
            Tag::Preference => "preference",
            Tag::Constraint => "constraint",
            Tag::Habit => "habit",
            Tag::Project => "project",
            Tag::Tool => "tool",
            Tag::Identity => "identity",
            Tag::Value => "value",
        }
    }

    pub fn parse(raw: &str) -> Result<Tag, MnemaError> {
        Tag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == raw)
            .ok_or_else(|| {
                MnemaError::Validation(format!(
                    "invalid category '{raw}'. Must be one of: {}",
                    Tag::ALL.map(Tag::as_str).join(", ")
                ))
            })
    }

    /// Core tags are permanently excluded from pruning.
    pub fn is_core(self) -> bool {
        matches!(self, Tag::Identity | Tag::Value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub tag: Tag,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub exact_hash: String,
    pub has_conflicts: bool,
    pub conflict_ids: Vec<String>,
    pub archived: bool,
    pub archive_reason: Option<String>,
}

/// The slice of a record that leaves the engine: no embedding, no hash.
#[derive(Debug, Clone)]
pub struct MemoryProjection {
    pub id: String,
    pub text: String,
    pub tag: Tag,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub similarity: Option<f32>,
}

impl MemoryProjection {
    pub fn from_record(record: &MemoryRecord, similarity: Option<f32>) -> Self {
        Self {
            id: record.id.clone(),
            text: record.text.clone(),
            tag: record.tag,
            created_at: record.created_at,
            last_accessed: record.last_accessed,
            similarity,
        }
    }

    /// `YYYY-MM-DD` slice for compact display.
    pub fn created_date(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }
}

/// Equality key for exact duplicates: SHA-256 of the lowercased, trimmed
/// text joined with the tag. Scoped per user by the store's unique index.
pub fn exact_hash(text: &str, tag: Tag) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(tag.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Id issuance ───────────────────────────────────────────────────────────────

static LAST_ISSUED_MS: AtomicI64 = AtomicI64::new(0);

/// `mem_<ms-since-epoch>`, strictly increasing within this process even
/// when two ingests land on the same millisecond.
pub fn next_memory_id(now: DateTime<Utc>) -> String {
    let now_ms = now.timestamp_millis();
    let prev = LAST_ISSUED_MS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(last.max(now_ms - 1) + 1)
        })
        .unwrap_or(now_ms - 1);
    let assigned = prev.max(now_ms - 1) + 1;
    format!("mem_{assigned}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parse_round_trips_every_member() {
        for tag in Tag::ALL {
            assert_eq!(Tag::parse(tag.as_str()).unwrap(), tag);
        }
    }

    #[test]
    fn tag_parse_failure_lists_accepted_values() {
        let err = Tag::parse("mood").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("goal"));
        assert!(msg.contains("value"));
    }

    #[test]
    fn only_identity_and_value_are_core() {
        let core: Vec<Tag> = Tag::ALL.into_iter().filter(|t| t.is_core()).collect();
        assert_eq!(core, vec![Tag::Identity, Tag::Value]);
    }

    #[test]
    fn exact_hash_ignores_case_and_surrounding_whitespace() {
        assert_eq!(
            exact_hash("  I Like Coffee ", Tag::Preference),
            exact_hash("i like coffee", Tag::Preference)
        );
    }

    #[test]
    fn exact_hash_distinguishes_tags() {
        assert_ne!(
            exact_hash("ship the release", Tag::Goal),
            exact_hash("ship the release", Tag::Project)
        );
    }

    #[test]
    fn memory_ids_are_strictly_increasing() {
        let now = Utc::now();
        let a = next_memory_id(now);
        let b = next_memory_id(now);
        let c = next_memory_id(now);
        let num = |id: &str| id.trim_start_matches("mem_").parse::<i64>().unwrap();
        assert!(num(&a) < num(&b));
        assert!(num(&b) < num(&c));
    }
}
