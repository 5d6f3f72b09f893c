use std::collections::HashMap;

use crate::embedding::{cosine_distance, similarity_from_distance};
use crate::memory::record::MemoryRecord;

/// Union-find over record ids, used to merge overlapping conflict sets
/// into transitive groups. The conflict graph is cyclic (triangles are
/// common), so grouping works on co-occurrence rather than edge shape.
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: HashMap<String, String>,
    rank: HashMap<String, u32>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&mut self, id: &str) {
        if !self.parent.contains_key(id) {
            self.parent.insert(id.to_string(), id.to_string());
            self.rank.insert(id.to_string(), 0);
        }
    }

    pub fn find(&mut self, id: &str) -> String {
        self.ensure(id);
        // Walk to the root, then compress the visited chain.
        let mut root = id.to_string();
        while self.parent[&root] != root {
            root = self.parent[&root].clone();
        }
        let mut cursor = id.to_string();
        while self.parent[&cursor] != root {
            let next = self.parent[&cursor].clone();
            self.parent.insert(cursor, root.clone());
            cursor = next;
        }
        root
    }

    pub fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (mut high, mut low) = (ra, rb);
        if self.rank[&high] < self.rank[&low] {
            std::mem::swap(&mut high, &mut low);
        }
        self.parent.insert(low.clone(), high.clone());
        if self.rank[&high] == self.rank[&low] {
            *self.rank.entry(high).or_insert(0) += 1;
        }
    }

    /// Union every pair of ids in `set`.
    pub fn union_all(&mut self, set: &[String]) {
        for pair in set.windows(2) {
            self.union(&pair[0], &pair[1]);
        }
    }

    /// Connected components, unordered.
    pub fn groups(&mut self) -> Vec<Vec<String>> {
        let ids: Vec<String> = self.parent.keys().cloned().collect();
        let mut by_root: HashMap<String, Vec<String>> = HashMap::new();
        for id in ids {
            let root = self.find(&id);
            by_root.entry(root).or_default().push(id);
        }
        by_root.into_values().collect()
    }
}

/// Collapse near-restatements within one conflict group: any pair above
/// `threshold` keeps only the more recent member. Quadratic, but groups
/// are tiny (a handful of contested memories).
pub fn dedup_near_duplicates<'a>(
    members: Vec<&'a MemoryRecord>,
    threshold: f32,
) -> Vec<&'a MemoryRecord> {
    let mut kept: Vec<&MemoryRecord> = Vec::with_capacity(members.len());
    for candidate in members {
        let mut duplicate = false;
        for slot in kept.iter_mut() {
            let sim = similarity_from_distance(cosine_distance(
                &candidate.embedding,
                &slot.embedding,
            ));
            if sim > threshold {
                duplicate = true;
                if candidate.created_at > slot.created_at {
                    *slot = candidate;
                }
                break;
            }
        }
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::memory::record::Tag;

    #[test]
    fn separate_sets_stay_separate() {
        let mut uf = UnionFind::new();
        uf.union_all(&["a".into(), "b".into()]);
        uf.union_all(&["c".into(), "d".into()]);
        let mut groups = uf.groups();
        groups.iter_mut().for_each(|g| g.sort());
        groups.sort();
        assert_eq!(groups, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn overlapping_sets_merge_transitively() {
        // a-b and b-c share b, so a, b, c become one component even though
        // a and c were never directly linked.
        let mut uf = UnionFind::new();
        uf.union_all(&["a".into(), "b".into()]);
        uf.union_all(&["b".into(), "c".into()]);
        let mut groups = uf.groups();
        assert_eq!(groups.len(), 1);
        groups[0].sort();
        assert_eq!(groups[0], vec!["a", "b", "c"]);
    }

    #[test]
    fn singleton_ids_form_singleton_components() {
        let mut uf = UnionFind::new();
        let _ = uf.find("lonely");
        uf.union_all(&["a".into(), "b".into()]);
        let groups = uf.groups();
        assert!(groups.iter().any(|g| g.len() == 1));
        assert!(groups.iter().any(|g| g.len() == 2));
    }

    fn record(id: &str, embedding: Vec<f32>, age_minutes: i64) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            user_id: "user_test".to_string(),
            text: id.to_string(),
            tag: Tag::Preference,
            embedding,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            last_accessed: Utc::now(),
            exact_hash: id.to_string(),
            has_conflicts: false,
            conflict_ids: Vec::new(),
            archived: false,
            archive_reason: None,
        }
    }

    #[test]
    fn near_duplicates_keep_the_more_recent_member() {
        let older = record("older", vec![1.0, 0.0], 60);
        let newer = record("newer", vec![1.0, 0.001], 1);
        let distinct = record("distinct", vec![0.0, 1.0], 5);

        let kept = dedup_near_duplicates(vec![&older, &newer, &distinct], 0.95);
        let ids: Vec<&str> = kept.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"newer"));
        assert!(!ids.contains(&"older"));
        assert!(ids.contains(&"distinct"));
    }
}
