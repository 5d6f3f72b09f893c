use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::Principal;
use crate::config::MnemaConfig;
use crate::embedding::{similarity_from_distance, EmbeddingProvider};
use crate::error::MnemaError;
use crate::memory::conflicts::{dedup_near_duplicates, UnionFind};
use crate::memory::locks::UserLocks;
use crate::memory::record::{
    exact_hash, next_memory_id, MemoryProjection, MemoryRecord, Tag,
};
use crate::memory::store::{InsertOutcome, MemoryStore};

/// Neighbours inspected for the semantic-duplicate guard.
const DUPLICATE_SCAN_K: usize = 3;
/// Neighbours inspected for the conflict scan.
const CONFLICT_SCAN_K: usize = 5;
/// Synthetic similarity assigned to the best keyword-fallback hit.
const KEYWORD_BASE_SIMILARITY: f32 = 0.70;
/// Per-rank decay of keyword-fallback similarities.
const KEYWORD_SIMILARITY_STEP: f32 = 0.03;

/// Stop words removed from keyword-fallback queries.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

#[derive(Debug, Clone)]
pub struct EngineTuning {
    pub semantic_duplicate_threshold: f32,
    pub conflict_threshold: f32,
    pub quota: usize,
    pub upgrade_url: String,
    pub prune_age_days: i64,
    pub prune_access_days: i64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            semantic_duplicate_threshold: 0.95,
            conflict_threshold: 0.65,
            quota: 25,
            upgrade_url: "https://mnema.dev/upgrade".to_string(),
            prune_age_days: 90,
            prune_access_days: 30,
        }
    }
}

impl From<&MnemaConfig> for EngineTuning {
    fn from(config: &MnemaConfig) -> Self {
        Self {
            semantic_duplicate_threshold: config.semantic_duplicate_threshold,
            conflict_threshold: config.conflict_threshold,
            quota: config.memory_quota,
            upgrade_url: config.upgrade_url.clone(),
            prune_age_days: config.prune_age_days,
            prune_access_days: config.prune_access_days,
        }
    }
}

/// Structured result of `remember`. Duplicates and quota refusals are
/// ordinary outcomes, not errors; the agent relays them to the user.
#[derive(Debug)]
pub enum RememberOutcome {
    Stored {
        id: String,
        conflicts: Vec<MemoryProjection>,
    },
    DuplicateExact,
    DuplicateSemantic {
        id: String,
        similarity: f32,
    },
    QuotaExceeded {
        used: usize,
        limit: usize,
        upgrade_url: String,
    },
}

#[derive(Debug)]
pub struct RecallResult {
    pub items: Vec<MemoryProjection>,
    pub conflict_groups: Vec<Vec<MemoryProjection>>,
}

/// Classification-only pruning report; nothing is deleted.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub archived: Vec<String>,
    pub kept: usize,
}

/// The memory engine: ingestion with exact and semantic deduplication,
/// conflict-graph maintenance, hybrid retrieval, and pruning
/// classification. The store owns the authoritative state; the only
/// in-process replica is a best-effort exact-hash reject cache.
pub struct MemoryEngine {
    store: MemoryStore,
    embedder: Arc<dyn EmbeddingProvider>,
    locks: UserLocks,
    hash_cache: Mutex<HashSet<String>>,
    tuning: EngineTuning,
}

impl MemoryEngine {
    pub fn new(
        store: MemoryStore,
        embedder: Arc<dyn EmbeddingProvider>,
        tuning: EngineTuning,
    ) -> Self {
        Self {
            store,
            embedder,
            locks: UserLocks::new(),
            hash_cache: Mutex::new(HashSet::new()),
            tuning,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Seed the fast-reject cache from the store. Staleness is harmless;
    /// the unique index remains authoritative.
    pub async fn warm_hash_cache(&self) -> Result<usize, MnemaError> {
        let keys = self.store.load_hash_keys().await?;
        let mut cache = self.hash_cache.lock().await;
        let count = keys.len();
        cache.extend(keys);
        Ok(count)
    }

    // ── remember ──────────────────────────────────────────────────────────────

    pub async fn remember(
        &self,
        principal: &Principal,
        text: &str,
        tag: Tag,
    ) -> Result<RememberOutcome, MnemaError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MnemaError::validation("text must not be empty"));
        }

        let hash = exact_hash(text, tag);
        let cache_key = format!("{}:{hash}", principal.user_id);
        if self.hash_cache.lock().await.contains(&cache_key) {
            debug!(user_id = %principal.user_id, "exact duplicate rejected from cache");
            return Ok(RememberOutcome::DuplicateExact);
        }

        // Embed before taking the user lock; the provider may block and the
        // lock must never be held across it.
        let embedding = self.embedder.embed(text).await?;

        let _guard = self.locks.acquire(&principal.user_id).await;

        if !principal.is_admin {
            let used = self.store.count(&principal.user_id).await?;
            if used >= self.tuning.quota {
                info!(user_id = %principal.user_id, used, "memory quota reached");
                return Ok(RememberOutcome::QuotaExceeded {
                    used,
                    limit: self.tuning.quota,
                    upgrade_url: self.tuning.upgrade_url.clone(),
                });
            }
        }

        let neighbours = self
            .store
            .nearest(&principal.user_id, Some(tag), &embedding, CONFLICT_SCAN_K)
            .await?;

        for (record, distance) in neighbours.iter().take(DUPLICATE_SCAN_K) {
            let similarity = similarity_from_distance(*distance);
            if similarity > self.tuning.semantic_duplicate_threshold {
                info!(
                    user_id = %principal.user_id,
                    existing = %record.id,
                    similarity,
                    "semantic duplicate rejected"
                );
                return Ok(RememberOutcome::DuplicateSemantic {
                    id: record.id.clone(),
                    similarity,
                });
            }
        }

        let candidates: Vec<(&MemoryRecord, f32)> = neighbours
            .iter()
            .map(|(record, distance)| (record, similarity_from_distance(*distance)))
            .filter(|(_, similarity)| *similarity >= self.tuning.conflict_threshold)
            .collect();

        let now = Utc::now();
        let id = next_memory_id(now);
        let conflict_ids: Vec<String> =
            candidates.iter().map(|(r, _)| r.id.clone()).collect();

        let record = MemoryRecord {
            id: id.clone(),
            user_id: principal.user_id.clone(),
            text: text.to_string(),
            tag,
            embedding,
            created_at: now,
            last_accessed: now,
            exact_hash: hash,
            has_conflicts: !conflict_ids.is_empty(),
            conflict_ids: conflict_ids.clone(),
            archived: false,
            archive_reason: None,
        };

        // Reverse edges are written in the same transaction as the insert,
        // added idempotently to each neighbour's existing list.
        let back_edges: Vec<(String, Vec<String>)> = candidates
            .iter()
            .map(|(neighbour, _)| {
                let mut ids = neighbour.conflict_ids.clone();
                if !ids.iter().any(|existing| existing == &id) {
                    ids.push(id.clone());
                }
                (neighbour.id.clone(), ids)
            })
            .collect();

        match self.store.insert_with_back_edges(&record, &back_edges).await? {
            InsertOutcome::DuplicateHash => {
                // Lost a race against the unique index; adopt its verdict.
                self.hash_cache.lock().await.insert(cache_key);
                return Ok(RememberOutcome::DuplicateExact);
            }
            InsertOutcome::Inserted => {}
        }
        self.hash_cache.lock().await.insert(cache_key);

        if !candidates.is_empty() {
            info!(
                user_id = %principal.user_id,
                id = %id,
                conflicts = candidates.len(),
                "memory stored with conflicts"
            );
        } else {
            debug!(user_id = %principal.user_id, id = %id, "memory stored");
        }

        let conflicts = candidates
            .iter()
            .map(|(record, similarity)| MemoryProjection::from_record(record, Some(*similarity)))
            .collect();
        Ok(RememberOutcome::Stored { id, conflicts })
    }

    // ── recall ────────────────────────────────────────────────────────────────

    pub async fn recall(
        &self,
        principal: &Principal,
        query: &str,
        limit: usize,
        tag_filter: Option<Tag>,
    ) -> Result<RecallResult, MnemaError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MnemaError::validation("query must not be empty"));
        }
        if limit == 0 {
            return Err(MnemaError::validation("limit must be at least 1"));
        }

        let query_embedding = self.embedder.embed(query).await?;
        let semantic = self
            .store
            .nearest(&principal.user_id, tag_filter, &query_embedding, limit)
            .await?;

        let mut pool: HashMap<String, MemoryRecord> = HashMap::new();
        let mut scored: Vec<(String, f32)> = Vec::with_capacity(semantic.len());
        for (record, distance) in semantic {
            let similarity = similarity_from_distance(distance);
            scored.push((record.id.clone(), similarity));
            pool.insert(record.id.clone(), record);
        }

        // Keyword fallback only tops up a short semantic result set; strong
        // semantic hits always outrank it.
        if scored.len() < limit {
            let tokens = keyword_tokens(query);
            if !tokens.is_empty() {
                let exclude: HashSet<String> = scored.iter().map(|(id, _)| id.clone()).collect();
                let extra = self
                    .store
                    .keyword_search(
                        &principal.user_id,
                        tag_filter,
                        &tokens,
                        &exclude,
                        limit - scored.len(),
                    )
                    .await?;
                for (rank, record) in extra.into_iter().enumerate() {
                    let similarity =
                        KEYWORD_BASE_SIMILARITY - KEYWORD_SIMILARITY_STEP * rank as f32;
                    scored.push((record.id.clone(), similarity.max(0.0)));
                    pool.insert(record.id.clone(), record);
                }
            }
        }

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1).then_with(|| {
                let ca = pool.get(&a.0).map(|r| r.created_at);
                let cb = pool.get(&b.0).map(|r| r.created_at);
                cb.cmp(&ca)
            })
        });

        let returned_ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        self.store
            .touch_last_accessed(&principal.user_id, &returned_ids, Utc::now())
            .await?;

        let conflict_groups = self
            .assemble_conflict_groups(&principal.user_id, &returned_ids, &mut pool)
            .await?;

        let items = scored
            .iter()
            .filter_map(|(id, similarity)| {
                pool.get(id)
                    .map(|record| MemoryProjection::from_record(record, Some(*similarity)))
            })
            .collect();

        Ok(RecallResult {
            items,
            conflict_groups,
        })
    }

    /// Build transitive conflict groups for the returned records: raw sets
    /// keyed by each conflicted anchor, merged via union-find, singletons
    /// discarded, members most-recent-first, near-restatements collapsed.
    async fn assemble_conflict_groups(
        &self,
        user_id: &str,
        returned_ids: &[String],
        pool: &mut HashMap<String, MemoryRecord>,
    ) -> Result<Vec<Vec<MemoryProjection>>, MnemaError> {
        let mut uf = UnionFind::new();
        let mut any_set = false;

        for id in returned_ids {
            let Some(record) = pool.get(id) else { continue };
            if !record.has_conflicts {
                continue;
            }
            let mut set = vec![record.id.clone()];
            set.extend(record.conflict_ids.iter().cloned());

            // Pull in referenced records that the search itself didn't return.
            let missing: Vec<String> = set
                .iter()
                .filter(|member| !pool.contains_key(*member))
                .cloned()
                .collect();
            if !missing.is_empty() {
                for fetched in self.store.get_many(user_id, &missing).await? {
                    pool.insert(fetched.id.clone(), fetched);
                }
            }

            // Union only ids that actually resolved to records.
            let resolved: Vec<String> = set
                .into_iter()
                .filter(|member| pool.contains_key(member))
                .collect();
            if resolved.len() >= 2 {
                uf.union_all(&resolved);
                any_set = true;
            }
        }

        if !any_set {
            return Ok(Vec::new());
        }

        let mut groups: Vec<Vec<MemoryProjection>> = Vec::new();
        for component in uf.groups() {
            if component.len() < 2 {
                continue;
            }
            let mut members: Vec<&MemoryRecord> =
                component.iter().filter_map(|id| pool.get(id)).collect();
            members.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let deduped =
                dedup_near_duplicates(members, self.tuning.semantic_duplicate_threshold);
            if deduped.len() < 2 {
                continue;
            }
            groups.push(
                deduped
                    .into_iter()
                    .map(|record| MemoryProjection::from_record(record, None))
                    .collect(),
            );
        }
        debug!(user_id, groups = groups.len(), "conflict groups assembled");
        Ok(groups)
    }

    // ── forget ────────────────────────────────────────────────────────────────

    /// Delete one record and repair the conflict graph around it. A record
    /// owned by someone else is indistinguishable from a missing one.
    pub async fn forget(&self, principal: &Principal, id: &str) -> Result<(), MnemaError> {
        let _guard = self.locks.acquire(&principal.user_id).await;

        let Some(record) = self.store.get(&principal.user_id, id).await? else {
            return Err(MnemaError::NotFound);
        };

        let neighbours = self
            .store
            .get_many(&principal.user_id, &record.conflict_ids)
            .await?;
        let repairs: Vec<(String, Vec<String>)> = neighbours
            .into_iter()
            .map(|neighbour| {
                let ids: Vec<String> = neighbour
                    .conflict_ids
                    .into_iter()
                    .filter(|cid| cid != id)
                    .collect();
                (neighbour.id, ids)
            })
            .collect();

        self.store
            .delete_with_edge_repairs(&principal.user_id, id, &repairs)
            .await?;

        let cache_key = format!("{}:{}", principal.user_id, record.exact_hash);
        self.hash_cache.lock().await.remove(&cache_key);

        info!(user_id = %principal.user_id, id, repaired = repairs.len(), "memory forgotten");
        Ok(())
    }

    // ── inventory ─────────────────────────────────────────────────────────────

    pub async fn inventory(
        &self,
        principal: &Principal,
        tag: Option<Tag>,
        limit: usize,
    ) -> Result<Vec<MemoryProjection>, MnemaError> {
        if limit == 0 {
            return Err(MnemaError::validation("limit must be at least 1"));
        }
        let records = self.store.list(&principal.user_id, tag, limit).await?;
        Ok(records
            .iter()
            .map(|record| MemoryProjection::from_record(record, None))
            .collect())
    }

    // ── pruning ───────────────────────────────────────────────────────────────

    /// Classify stale records as archived. Core tags (`identity`, `value`)
    /// are permanently excluded. Deleting anything is a caller decision.
    pub async fn prune(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PruneReport, MnemaError> {
        let age_cutoff = now - Duration::days(self.tuning.prune_age_days);
        let access_cutoff = now - Duration::days(self.tuning.prune_access_days);

        let mut report = PruneReport::default();
        for record in self.store.all_for_user(user_id).await? {
            let stale = !record.tag.is_core()
                && record.created_at < age_cutoff
                && record.last_accessed < access_cutoff;
            if stale {
                self.store
                    .mark_archived(user_id, &record.id, "age_and_access")
                    .await?;
                report.archived.push(record.id);
            } else {
                report.kept += 1;
            }
        }
        if !report.archived.is_empty() {
            warn!(
                user_id,
                archived = report.archived.len(),
                "pruning pass classified stale memories"
            );
        }
        Ok(report)
    }
}

fn keyword_tokens(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|ch: char| !ch.is_alphanumeric())
        .map(|token| token.to_lowercase())
        .filter(|token| token.len() > 2 && !STOP_WORDS.contains(&token.as_str()))
        .filter(|token| seen.insert(token.clone()))
        .collect()
}
