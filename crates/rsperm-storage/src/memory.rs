//! In-memory storage implementation.
//!
//! Rows live in a `DashMap` keyed by `(platform_id, permission)`, which gives
//! the same one-row-per-pair guarantee as the SQL primary key.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rsperm_domain::{is_expired, Clock, Grant, PlatformId, SystemClock};
use tracing::instrument;

use crate::error::StorageResult;
use crate::traits::{validate_permission, PermissionStore, StoredGrant};

/// In-memory implementation of PermissionStore.
///
/// # Performance Characteristics
///
/// - **Upsert / delete**: O(1) average (DashMap entry)
/// - **Load active**: O(N) over all rows (linear scan by user)
/// - **Sweep**: O(N)
#[derive(Debug)]
pub struct MemoryPermissionStore {
    rows: DashMap<(PlatformId, String), StoredGrant>,
    /// Source of `granted_at` / `updated_at`.
    clock: Arc<dyn Clock>,
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPermissionStore {
    /// Creates a new in-memory store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a new in-memory store stamping rows with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: DashMap::new(),
            clock,
        }
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored rows, expired ones included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn ensure_schema(&self) -> StorageResult<()> {
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upsert(
        &self,
        platform_id: PlatformId,
        permission: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        validate_permission(permission)?;
        let now = self.clock.now();

        // Entry API keeps the check-and-insert atomic per key
        use dashmap::mapref::entry::Entry;
        match self.rows.entry((platform_id, permission.to_string())) {
            Entry::Occupied(mut entry) => {
                let row = entry.get_mut();
                row.grant.expires_at = expires_at;
                row.updated_at = now;
            }
            Entry::Vacant(entry) => {
                entry.insert(StoredGrant {
                    grant: Grant::new(platform_id, permission, expires_at),
                    granted_at: now,
                    updated_at: now,
                });
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, platform_id: PlatformId, permission: &str) -> StorageResult<()> {
        self.rows.remove(&(platform_id, permission.to_string()));
        Ok(())
    }

    async fn load_active(
        &self,
        platform_id: PlatformId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Grant>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.key().0 == platform_id && !row.grant.is_expired(now))
            .map(|row| row.grant.clone())
            .collect())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let mut removed = 0u64;
        self.rows.retain(|_, row| {
            let expired = is_expired(row.grant.expires_at, now);
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }

    async fn get_grant(
        &self,
        platform_id: PlatformId,
        permission: &str,
    ) -> StorageResult<Option<StoredGrant>> {
        Ok(self
            .rows
            .get(&(platform_id, permission.to_string()))
            .map(|row| row.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rsperm_domain::ManualClock;

    use crate::error::StorageError;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn store_at(start: DateTime<Utc>) -> (MemoryPermissionStore, ManualClock) {
        let clock = ManualClock::new(start);
        (
            MemoryPermissionStore::with_clock(Arc::new(clock.clone())),
            clock,
        )
    }

    // Test: Store can be created empty
    #[tokio::test]
    async fn test_memory_store_can_be_created() {
        let store = MemoryPermissionStore::new();
        store.ensure_schema().await.unwrap();
        assert!(store.is_empty());
        assert!(store.load_active(1, Utc::now()).await.unwrap().is_empty());
    }

    // Test: Upsert keeps one row per pair and preserves granted_at
    #[tokio::test]
    async fn test_upsert_preserves_granted_at() {
        let (store, clock) = store_at(t0());
        store.upsert(7, "fly", None).await.unwrap();

        clock.advance(Duration::minutes(10));
        let expiry = t0() + Duration::hours(1);
        store.upsert(7, "fly", Some(expiry)).await.unwrap();

        assert_eq!(store.len(), 1);
        let row = store.get_grant(7, "fly").await.unwrap().unwrap();
        assert_eq!(row.grant.expires_at, Some(expiry));
        assert_eq!(row.granted_at, t0());
        assert_eq!(row.updated_at, t0() + Duration::minutes(10));
    }

    // Test: Delete is idempotent
    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryPermissionStore::new();
        assert!(store.delete(1, "fly").await.is_ok());

        store.upsert(1, "fly", None).await.unwrap();
        store.delete(1, "fly").await.unwrap();
        assert!(store.delete(1, "fly").await.is_ok());
        assert!(store.get_grant(1, "fly").await.unwrap().is_none());
    }

    // Test: load_active filters by user and expiry
    #[tokio::test]
    async fn test_load_active_filters_expired_and_other_users() {
        let (store, _clock) = store_at(t0());
        store.upsert(1, "fly", None).await.unwrap();
        store
            .upsert(1, "kick", Some(t0() + Duration::seconds(30)))
            .await
            .unwrap();
        store
            .upsert(1, "ban", Some(t0() - Duration::seconds(1)))
            .await
            .unwrap();
        store.upsert(2, "fly", None).await.unwrap();

        let mut names: Vec<String> = store
            .load_active(1, t0())
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.permission)
            .collect();
        names.sort();
        assert_eq!(names, vec!["fly", "kick"]);

        let later = store
            .load_active(1, t0() + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].permission, "fly");
    }

    // Test: Sweep deletes only expired rows across users
    #[tokio::test]
    async fn test_sweep_expired() {
        let (store, _clock) = store_at(t0());
        store.upsert(1, "fly", None).await.unwrap();
        store.upsert(1, "kick", Some(t0())).await.unwrap();
        store
            .upsert(2, "kick", Some(t0() - Duration::days(1)))
            .await
            .unwrap();
        store
            .upsert(3, "kick", Some(t0() + Duration::days(1)))
            .await
            .unwrap();

        let removed = store.sweep_expired(t0()).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 2);
        assert!(store.get_grant(3, "kick").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_rejects_oversized_permission() {
        let store = MemoryPermissionStore::new();
        let result = store.upsert(1, &"x".repeat(33), None).await;
        assert!(matches!(result, Err(StorageError::InvalidInput { .. })));
        assert!(store.is_empty());
    }

    // Test: Concurrent upserts don't lose data
    #[tokio::test]
    async fn test_concurrent_upserts_dont_lose_data() {
        let store = MemoryPermissionStore::new_shared();
        let num_tasks = 100;
        let mut handles = Vec::with_capacity(num_tasks);

        for i in 0..num_tasks {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .upsert(i as u64 % 10, &format!("perm{i}"), None)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), num_tasks, "All concurrent writes should be preserved");
    }

    // Test: Sweep count reflects only expired rows while live rows are inserted concurrently
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_count_with_concurrent_upserts() {
        let store = MemoryPermissionStore::new_shared();
        let past = Utc::now() - Duration::days(1);
        for user in 0..50u64 {
            store.upsert(user, "old", Some(past)).await.unwrap();
        }

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for user in 0..200u64 {
                    store.upsert(user, "live", None).await.unwrap();
                }
            })
        };
        let removed = store.sweep_expired(Utc::now()).await.unwrap();
        writer.await.unwrap();

        assert_eq!(removed, 50);
        assert_eq!(store.len(), 200);
    }
}
