use chrono::Utc;
use rand::RngCore;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::format_utc;
use crate::error::MnemaError;

/// Identity resolved from a bearer token. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub user_id: String,
}

/// Credential store over the `auth_tokens` table.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Single indexed lookup; bumps `last_used` on success. Unknown,
    /// inactive, and empty tokens are all the same `Unauthenticated`.
    pub async fn validate(&self, token: &str) -> Result<Principal, MnemaError> {
        if token.is_empty() {
            return Err(MnemaError::Unauthenticated);
        }

        let row = sqlx::query(
            "SELECT user_id, is_admin FROM auth_tokens WHERE token = ? AND is_active = 1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            warn!(token = %token_prefix(token), "rejected unknown or inactive token");
            return Err(MnemaError::Unauthenticated);
        };

        sqlx::query("UPDATE auth_tokens SET last_used = ? WHERE token = ?")
            .bind(format_utc(Utc::now()))
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(Principal {
            user_id: row.try_get("user_id")?,
            is_admin: row.try_get::<i64, _>("is_admin")? != 0,
        })
    }

    /// Mint a fresh principal with a 256-bit random token.
    pub async fn issue(&self, user_name: Option<&str>) -> Result<IssuedToken, MnemaError> {
        self.issue_with(user_name, false).await
    }

    pub async fn issue_with(
        &self,
        user_name: Option<&str>,
        is_admin: bool,
    ) -> Result<IssuedToken, MnemaError> {
        let mut material = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut material);
        let token = hex::encode(material);
        let user_id = format!("user_{}", Uuid::new_v4().simple());
        let now = format_utc(Utc::now());

        sqlx::query(
            "INSERT INTO auth_tokens (token, user_id, user_name, created_at, last_used, is_active, is_admin) \
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&token)
        .bind(&user_id)
        .bind(user_name)
        .bind(&now)
        .bind(&now)
        .bind(is_admin as i64)
        .execute(&self.pool)
        .await?;

        info!(user_id = %user_id, token = %token_prefix(&token), "token issued");
        Ok(IssuedToken { token, user_id })
    }

    /// First-run convenience: when the token table is empty, mint one so an
    /// operator can connect immediately. Returns `None` when tokens exist.
    pub async fn ensure_bootstrap_token(&self) -> Result<Option<IssuedToken>, MnemaError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM auth_tokens WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        let active: i64 = row.try_get("n")?;
        if active > 0 {
            return Ok(None);
        }
        let issued = self.issue_with(Some("bootstrap"), true).await?;
        Ok(Some(issued))
    }

    /// Idempotent waitlist insert.
    pub async fn waitlist_add(
        &self,
        email: &str,
        referrer_token: Option<&str>,
    ) -> Result<(), MnemaError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(MnemaError::validation("a valid email address is required"));
        }
        sqlx::query(
            "INSERT OR IGNORE INTO waitlist_emails (email, created_at, referrer_token) VALUES (?, ?, ?)",
        )
        .bind(&email)
        .bind(format_utc(Utc::now()))
        .bind(referrer_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// First ten characters for logging. Char-based: rejected tokens are
/// arbitrary caller input and may not break cleanly on byte 10.
fn token_prefix(token: &str) -> String {
    token.chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;

    async fn store() -> (TokenStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect(&dir.path().join("auth.db")).await.unwrap();
        (TokenStore::new(pool), dir)
    }

    #[tokio::test]
    async fn issued_token_validates_to_its_principal() {
        let (store, _dir) = store().await;
        let issued = store.issue(Some("Alice")).await.unwrap();
        assert_eq!(issued.token.len(), 64);

        let principal = store.validate(&issued.token).await.unwrap();
        assert_eq!(principal.user_id, issued.user_id);
        assert!(!principal.is_admin);
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens_are_unauthenticated() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.validate("deadbeef").await,
            Err(MnemaError::Unauthenticated)
        ));
        assert!(matches!(
            store.validate("").await,
            Err(MnemaError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn multibyte_garbage_tokens_are_rejected_without_panicking() {
        let (store, _dir) = store().await;
        // Byte 10 of this token falls inside a character.
        assert!(matches!(
            store.validate("€€€€").await,
            Err(MnemaError::Unauthenticated)
        ));
    }

    #[test]
    fn token_prefix_counts_chars_not_bytes() {
        assert_eq!(token_prefix("€€€€"), "€€€€");
        assert_eq!(token_prefix("abcdefghijkl"), "abcdefghij");
    }

    #[tokio::test]
    async fn validation_bumps_last_used() {
        let (store, _dir) = store().await;
        let issued = store.issue(None).await.unwrap();

        let before: String = sqlx::query("SELECT last_used FROM auth_tokens WHERE token = ?")
            .bind(&issued.token)
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .try_get("last_used")
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.validate(&issued.token).await.unwrap();

        let after: String = sqlx::query("SELECT last_used FROM auth_tokens WHERE token = ?")
            .bind(&issued.token)
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .try_get("last_used")
            .unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn bootstrap_token_is_minted_once() {
        let (store, _dir) = store().await;
        let first = store.ensure_bootstrap_token().await.unwrap();
        assert!(first.is_some());
        let second = store.ensure_bootstrap_token().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn waitlist_is_idempotent_on_email() {
        let (store, _dir) = store().await;
        store.waitlist_add("A@Example.com", None).await.unwrap();
        store.waitlist_add("a@example.com", None).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM waitlist_emails")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let n: i64 = row.try_get("n").unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn waitlist_rejects_garbage() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.waitlist_add("not-an-email", None).await,
            Err(MnemaError::Validation(_))
        ));
    }
}
