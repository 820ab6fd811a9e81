// SQLite BatchStore Implementation
//
// Each key lives in exactly one of kv_hash / kv_set / kv_list. Every method
// is a single statement (or a single transaction), so SQLite's write lock
// gives the per-key atomicity the engine relies on. Expired keys read as
// absent and are purged on first touch.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::error::{AppError, Result};
use tally_core::port::{BatchStore, TimeProvider};
use tracing::debug;

const DATA_TABLES: [&str; 3] = ["kv_hash", "kv_set", "kv_list"];

pub struct SqliteBatchStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteBatchStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Delete every expired key now; returns how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv_expiry WHERE expires_at <= ?")
                .bind(now)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for key in &keys {
            remove_key(&mut tx, key).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        if !keys.is_empty() {
            debug!(count = keys.len(), "Purged expired batch keys");
        }
        Ok(keys.len() as u64)
    }

    /// Drop `key` if its TTL has passed
    async fn purge_if_expired(&self, key: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let expired: Option<i64> =
            sqlx::query_scalar("SELECT expires_at FROM kv_expiry WHERE key = ? AND expires_at <= ?")
                .bind(key)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        if expired.is_some() {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            remove_key(&mut tx, key).await?;
            tx.commit().await.map_err(map_sqlx_error)?;
            debug!(key, "Expired batch key purged");
        }
        Ok(())
    }
}

/// Remove every trace of `key`; returns true if it held data
async fn remove_key(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<bool> {
    let mut removed = 0;
    for table in DATA_TABLES {
        removed += sqlx::query(&format!("DELETE FROM {} WHERE key = ?", table))
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
    }
    sqlx::query("DELETE FROM kv_expiry WHERE key = ?")
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(removed > 0)
}

#[async_trait]
impl BatchStore for SqliteBatchStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.purge_if_expired(key).await?;
        sqlx::query_scalar("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
            .bind(key)
            .bind(field)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.purge_if_expired(key).await?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT field, value FROM kv_hash WHERE key = ?")
                .bind(key)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().collect())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.purge_if_expired(key).await?;
        sqlx::query(
            r#"
            INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
            ON CONFLICT(key, field) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.purge_if_expired(key).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
            ON CONFLICT(key, field) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_hash WHERE key = ? AND field = ?")
            .bind(key)
            .bind(field)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.purge_if_expired(key).await?;
        let value: String = sqlx::query_scalar(
            r#"
            INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
            ON CONFLICT(key, field) DO UPDATE
                SET value = CAST(CAST(kv_hash.value AS INTEGER) + ? AS TEXT)
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(delta.to_string())
        .bind(delta)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        value.parse::<i64>().map_err(|_| {
            AppError::Store(format!(
                "hash field {}.{} is not an integer: {}",
                key, field, value
            ))
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.purge_if_expired(key).await?;
        let result = sqlx::query(
            "INSERT INTO kv_set (key, member) VALUES (?, ?) ON CONFLICT(key, member) DO NOTHING",
        )
        .bind(key)
        .bind(member)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.purge_if_expired(key).await?;
        sqlx::query_scalar("SELECT member FROM kv_set WHERE key = ? ORDER BY member")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn set_len(&self, key: &str) -> Result<u64> {
        self.purge_if_expired(key).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_set WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count as u64)
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<()> {
        self.purge_if_expired(key).await?;
        sqlx::query(
            r#"
            INSERT INTO kv_list (key, position, value)
            SELECT ?, COALESCE(MIN(position), 0) - 1, ? FROM kv_list WHERE key = ?
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.purge_if_expired(key).await?;
        sqlx::query_scalar("SELECT value FROM kv_list WHERE key = ? ORDER BY position ASC")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.purge_if_expired(key).await?;
        let found: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ?1)
                OR EXISTS(SELECT 1 FROM kv_set WHERE key = ?1)
                OR EXISTS(SELECT 1 FROM kv_list WHERE key = ?1)
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(found != 0)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut removed = 0;
        for key in keys {
            if remove_key(&mut tx, key).await? {
                removed += 1;
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if !self.exists(key).await? {
            return Ok(());
        }
        let expires_at = self.time_provider.now_millis() + ttl.as_millis() as i64;
        sqlx::query(
            r#"
            INSERT INTO kv_expiry (key, expires_at) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock the tests can move forward
    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn advance(&self, millis: i64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl TimeProvider for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn setup() -> (SqliteBatchStore, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000_000)));
        (SqliteBatchStore::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_hash_set_get_and_get_all() {
        let (store, _) = setup().await;
        store.hash_set("BID-a", "description", "first").await.unwrap();
        store.hash_set("BID-a", "description", "second").await.unwrap();
        store.hash_set("BID-a", "callback_queue", "default").await.unwrap();

        assert_eq!(
            store.hash_get("BID-a", "description").await.unwrap().as_deref(),
            Some("second")
        );
        assert!(store.hash_get("BID-a", "missing").await.unwrap().is_none());

        let all = store.hash_get_all("BID-a").await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(store.hash_get_all("BID-none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hash_set_nx_only_first_wins() {
        let (store, _) = setup().await;
        assert!(store.hash_set_nx("BID-a", "complete", "true").await.unwrap());
        assert!(!store.hash_set_nx("BID-a", "complete", "true").await.unwrap());

        store.hash_delete("BID-a", "complete").await.unwrap();
        assert!(store.hash_set_nx("BID-a", "complete", "true").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_incr_by_goes_negative() {
        let (store, _) = setup().await;
        assert_eq!(store.hash_incr_by("BID-a", "pending", 1).await.unwrap(), 1);
        assert_eq!(store.hash_incr_by("BID-a", "pending", 1).await.unwrap(), 2);
        assert_eq!(store.hash_incr_by("BID-a", "pending", -3).await.unwrap(), -1);
        assert_eq!(
            store.hash_get("BID-a", "pending").await.unwrap().as_deref(),
            Some("-1")
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_atomic() {
        let (store, _) = setup().await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.hash_incr_by("BID-a", "total", 1).await })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.hash_incr_by("BID-a", "total", 0).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_set_is_deduplicated() {
        let (store, _) = setup().await;
        assert!(store.set_add("BID-a-failed", "j1").await.unwrap());
        assert!(!store.set_add("BID-a-failed", "j1").await.unwrap());
        assert!(store.set_add("BID-a-failed", "j2").await.unwrap());

        assert_eq!(store.set_len("BID-a-failed").await.unwrap(), 2);
        assert_eq!(
            store.set_members("BID-a-failed").await.unwrap(),
            vec!["j1", "j2"]
        );
    }

    #[tokio::test]
    async fn test_list_push_front_is_lifo() {
        let (store, _) = setup().await;
        store.list_push_front("BID-a-callbacks-complete", "A").await.unwrap();
        store.list_push_front("BID-a-callbacks-complete", "B").await.unwrap();
        store.list_push_front("BID-a-callbacks-complete", "C").await.unwrap();

        assert_eq!(
            store.list_range("BID-a-callbacks-complete").await.unwrap(),
            vec!["C", "B", "A"]
        );
        assert!(store.list_range("BID-b-callbacks-complete").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys() {
        let (store, _) = setup().await;
        store.hash_set("BID-a", "description", "x").await.unwrap();
        store.set_add("BID-a-failed", "j1").await.unwrap();

        let keys = vec![
            "BID-a".to_string(),
            "BID-a-failed".to_string(),
            "BID-a-callbacks-complete".to_string(),
        ];
        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert!(!store.exists("BID-a").await.unwrap());
        assert!(!store.exists("BID-a-failed").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_keys_read_as_absent() {
        let (store, clock) = setup().await;
        store.hash_set("BID-a", "pending", "1").await.unwrap();
        store.expire("BID-a", Duration::from_secs(60)).await.unwrap();

        clock.advance(59_000);
        assert!(store.exists("BID-a").await.unwrap());

        clock.advance(2_000);
        assert!(!store.exists("BID-a").await.unwrap());
        assert!(store.hash_get_all("BID-a").await.unwrap().is_empty());

        // A recreated key starts without the old TTL
        store.hash_set("BID-a", "pending", "1").await.unwrap();
        clock.advance(120_000);
        assert!(store.exists("BID-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_noop() {
        let (store, clock) = setup().await;
        store.expire("BID-ghost", Duration::from_secs(1)).await.unwrap();
        store.hash_set("BID-ghost", "pending", "1").await.unwrap();
        clock.advance(10_000);
        assert!(store.exists("BID-ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_sweeps_all_keys() {
        let (store, clock) = setup().await;
        for key in ["BID-a", "BID-b"] {
            store.hash_set(key, "pending", "1").await.unwrap();
            store.expire(key, Duration::from_secs(1)).await.unwrap();
        }
        store.hash_set("BID-c", "pending", "1").await.unwrap();

        clock.advance(1_000);
        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(store.exists("BID-c").await.unwrap());
    }
}
