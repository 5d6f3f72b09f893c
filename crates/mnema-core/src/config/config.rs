use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::hosts::HostPolicy;

/// Remote embedding backend settings. When `base_url` is unset the service
/// falls back to the deterministic local embedder, which keeps the engine
/// functional (and tests reproducible) without a model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_base_url")]
    pub base_url: Option<String>,
    #[serde(default = "default_embed_model")]
    pub model: String,
}

fn default_embed_base_url() -> Option<String> {
    std::env::var("MNEMA_EMBED_URL").ok()
}

fn default_embed_model() -> String {
    std::env::var("MNEMA_EMBED_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string())
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embed_base_url(),
            model: default_embed_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnemaConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Public base URL of the gateway, used in issued-token connection URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Upstream tool-server URL the gateway proxies to.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Similarity above which a new memory is a semantic restatement.
    #[serde(default = "default_semantic_duplicate_threshold")]
    pub semantic_duplicate_threshold: f32,
    /// Similarity at which two same-tag memories are flagged as a conflict.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: f32,
    /// Active-record cap for non-admin users.
    #[serde(default = "default_memory_quota")]
    pub memory_quota: usize,
    #[serde(default = "default_upgrade_url")]
    pub upgrade_url: String,
    /// Pruning: minimum record age in days.
    #[serde(default = "default_prune_age_days")]
    pub prune_age_days: i64,
    /// Pruning: minimum days since last access.
    #[serde(default = "default_prune_access_days")]
    pub prune_access_days: i64,
    #[serde(default)]
    pub hosts: HostPolicy,
    /// CORS origin allow-list for the gateway. Closed: unlisted origins get
    /// no `Access-Control-Allow-Origin` at all.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_db_path() -> PathBuf {
    std::env::var("MNEMA_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| MnemaConfig::resolve_path("mnema.db"))
}

fn default_public_base_url() -> String {
    std::env::var("MNEMA_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}

fn default_upstream_url() -> String {
    std::env::var("MNEMA_UPSTREAM_URL").unwrap_or_else(|_| "http://localhost:9000".to_string())
}

fn default_semantic_duplicate_threshold() -> f32 {
    0.95
}

fn default_conflict_threshold() -> f32 {
    0.65
}

fn default_memory_quota() -> usize {
    25
}

fn default_upgrade_url() -> String {
    std::env::var("MNEMA_UPGRADE_URL").unwrap_or_else(|_| "https://mnema.dev/upgrade".to_string())
}

fn default_prune_age_days() -> i64 {
    90
}

fn default_prune_access_days() -> i64 {
    30
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://claude.ai".to_string(),
        "https://app.mnema.dev".to_string(),
    ]
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            public_base_url: default_public_base_url(),
            upstream_url: default_upstream_url(),
            embedding: EmbeddingConfig::default(),
            semantic_duplicate_threshold: default_semantic_duplicate_threshold(),
            conflict_threshold: default_conflict_threshold(),
            memory_quota: default_memory_quota(),
            upgrade_url: default_upgrade_url(),
            prune_age_days: default_prune_age_days(),
            prune_access_days: default_prune_access_days(),
            hosts: HostPolicy::default(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl MnemaConfig {
    /// Load `~/.mnema/config.json`, then merge any `.mnema.json` found in the
    /// working directory over it (shallow key-by-key override).
    pub fn load() -> Result<Self> {
        let config_path = Self::resolve_path("config.json");

        let mut config = if config_path.exists() {
            let data = std::fs::read_to_string(&config_path)?;
            serde_json::from_str::<MnemaConfig>(&data)?
        } else {
            MnemaConfig::default()
        };

        let local_path = std::env::current_dir()
            .ok()
            .map(|d| d.join(".mnema.json"))
            .filter(|p| p.exists());

        if let Some(local) = local_path {
            let data = std::fs::read_to_string(local)?;
            let override_val: serde_json::Value = serde_json::from_str(&data)?;
            let mut base = serde_json::to_value(&config)?;
            if let (Some(base_obj), Some(over_obj)) =
                (base.as_object_mut(), override_val.as_object())
            {
                for (k, v) in over_obj {
                    base_obj.insert(k.clone(), v.clone());
                }
            }
            config = serde_json::from_value(base)?;
        }

        Ok(config)
    }

    pub fn resolve_path(relative: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnema")
            .join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let cfg = MnemaConfig::default();
        assert_eq!(cfg.semantic_duplicate_threshold, 0.95);
        assert_eq!(cfg.conflict_threshold, 0.65);
        assert_eq!(cfg.memory_quota, 25);
        assert_eq!(cfg.prune_age_days, 90);
        assert_eq!(cfg.prune_access_days, 30);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: MnemaConfig = serde_json::from_str(r#"{"memory_quota": 3}"#).unwrap();
        assert_eq!(cfg.memory_quota, 3);
        assert_eq!(cfg.conflict_threshold, 0.65);
    }
}
