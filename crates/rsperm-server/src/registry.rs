//! Per-user permission cache over a [`PermissionStore`].
//!
//! Each user is either *unloaded* (no entry in `users`) or *loaded* (an entry,
//! possibly empty). The first read or write touching a user loads its live
//! grants from the store; later calls are served from the cache until
//! [`PermissionRegistry::refresh`] or [`PermissionRegistry::refresh_all`]
//! drops the entry again.
//!
//! The registry is not internally synchronized. Every method takes
//! `&mut self`, and the owning service keeps it behind a single mutex so a
//! read-then-write sequence for one user can never interleave with another.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rsperm_domain::{is_expired, Clock, PermissionMap, PlatformId};
use rsperm_storage::PermissionStore;
use tracing::{debug, instrument, warn};

use crate::error::AuthzResult;

/// In-memory view of users' grants, backed by durable storage.
pub struct PermissionRegistry {
    store: Arc<dyn PermissionStore>,
    clock: Arc<dyn Clock>,
    users: HashMap<PlatformId, PermissionMap>,
}

impl std::fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRegistry")
            .field("clock", &self.clock)
            .field("cached_users", &self.users.len())
            .finish_non_exhaustive()
    }
}

impl PermissionRegistry {
    pub fn new(store: Arc<dyn PermissionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            users: HashMap::new(),
        }
    }

    /// The clock used for every expiry decision.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Number of users currently loaded.
    pub fn cached_users(&self) -> usize {
        self.users.len()
    }

    /// Returns true if `platform_id` is currently loaded.
    pub fn is_loaded(&self, platform_id: PlatformId) -> bool {
        self.users.contains_key(&platform_id)
    }

    /// Loads the user's live grants on first touch.
    ///
    /// A failed load leaves the user unloaded, so the next call retries.
    async fn ensure_loaded(&mut self, platform_id: PlatformId) -> AuthzResult<&mut PermissionMap> {
        if !self.users.contains_key(&platform_id) {
            debug!(platform_id, "loading permissions");
            let grants = self
                .store
                .load_active(platform_id, self.clock.now())
                .await?;
            let permissions: PermissionMap = grants
                .into_iter()
                .map(|grant| (grant.permission, grant.expires_at))
                .collect();
            debug!(platform_id, count = permissions.len(), "permissions loaded");
            self.users.insert(platform_id, permissions);
        }
        Ok(self.users.entry(platform_id).or_default())
    }

    /// Returns true if the user holds a live grant for `permission`.
    ///
    /// An expired entry is dropped from the cache on the way out.
    pub async fn has(&mut self, platform_id: PlatformId, permission: &str) -> AuthzResult<bool> {
        let now = self.clock.now();
        let permissions = self.ensure_loaded(platform_id).await?;

        let expires_at = match permissions.get(permission) {
            Some(expires_at) => *expires_at,
            None => return Ok(false),
        };
        if is_expired(expires_at, now) {
            permissions.remove(permission);
            return Ok(false);
        }
        Ok(true)
    }

    /// Prunes expired entries and returns the user's live grants.
    pub async fn get_all(&mut self, platform_id: PlatformId) -> AuthzResult<&PermissionMap> {
        let now = self.clock.now();
        let permissions = self.ensure_loaded(platform_id).await?;
        permissions.retain(|_, expires_at| !is_expired(*expires_at, now));
        Ok(permissions)
    }

    /// Writes a grant through to the store, then to the cache.
    ///
    /// If the store write fails the user's entry is dropped so the next
    /// access re-reads whatever the store actually holds.
    #[instrument(skip(self))]
    pub async fn upsert(
        &mut self,
        platform_id: PlatformId,
        permission: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthzResult<()> {
        self.ensure_loaded(platform_id).await?;

        if let Err(e) = self.store.upsert(platform_id, permission, expires_at).await {
            warn!(platform_id, permission, "store write failed, invalidating cached user");
            self.users.remove(&platform_id);
            return Err(e.into());
        }

        self.users
            .entry(platform_id)
            .or_default()
            .insert(permission.to_string(), expires_at);
        Ok(())
    }

    /// Removes a grant from the cache, then from the store.
    ///
    /// The cache entry is gone even when the store call fails.
    #[instrument(skip(self))]
    pub async fn delete(&mut self, platform_id: PlatformId, permission: &str) -> AuthzResult<()> {
        self.ensure_loaded(platform_id).await?.remove(permission);
        self.store.delete(platform_id, permission).await?;
        Ok(())
    }

    /// Computes the expiry for a new grant.
    ///
    /// `None` duration means permanent. When `additive` is set and the user
    /// already holds a grant expiring in the future, the duration stacks on
    /// top of that expiry; otherwise it counts from now.
    pub async fn compute_expiry(
        &mut self,
        platform_id: PlatformId,
        permission: &str,
        duration: Option<Duration>,
        additive: bool,
    ) -> AuthzResult<Option<DateTime<Utc>>> {
        let Some(duration) = duration else {
            return Ok(None);
        };
        let now = self.clock.now();
        let permissions = self.ensure_loaded(platform_id).await?;

        if additive {
            if let Some(Some(existing)) = permissions.get(permission) {
                if *existing > now {
                    return Ok(Some(*existing + duration));
                }
            }
        }
        Ok(Some(now + duration))
    }

    /// Forgets one user's cached grants without touching the store.
    pub fn refresh(&mut self, platform_id: PlatformId) {
        debug!(platform_id, "refreshing cached permissions");
        self.users.remove(&platform_id);
    }

    /// Forgets every cached user.
    pub fn refresh_all(&mut self) {
        debug!(users = self.users.len(), "refreshing all cached permissions");
        self.users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rsperm_domain::ManualClock;
    use rsperm_storage::MemoryPermissionStore;

    use crate::error::AuthzError;
    use crate::tests::mocks::FailingStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn registry_with(store: Arc<dyn PermissionStore>) -> (PermissionRegistry, ManualClock) {
        let clock = ManualClock::new(t0());
        (PermissionRegistry::new(store, Arc::new(clock.clone())), clock)
    }

    fn memory_registry() -> (PermissionRegistry, Arc<MemoryPermissionStore>, ManualClock) {
        let clock = ManualClock::new(t0());
        let store = Arc::new(MemoryPermissionStore::with_clock(Arc::new(clock.clone())));
        (
            PermissionRegistry::new(store.clone(), Arc::new(clock.clone())),
            store,
            clock,
        )
    }

    // Test: First touch loads from the store, even when empty
    #[tokio::test]
    async fn test_lazy_load_seeds_empty_entry() {
        let (mut registry, _store, _clock) = memory_registry();
        assert!(!registry.is_loaded(1));

        assert!(!registry.has(1, "fly").await.unwrap());
        assert!(registry.is_loaded(1));
        assert_eq!(registry.cached_users(), 1);
    }

    // Test: Loaded users are served from cache until refreshed
    #[tokio::test]
    async fn test_cache_is_not_reread_until_refresh() {
        let (mut registry, store, _clock) = memory_registry();
        assert!(!registry.has(1, "fly").await.unwrap());

        // Written behind the registry's back
        store.upsert(1, "fly", None).await.unwrap();
        assert!(!registry.has(1, "fly").await.unwrap());

        registry.refresh(1);
        assert!(!registry.is_loaded(1));
        assert!(registry.has(1, "fly").await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_all_clears_every_user() {
        let (mut registry, _store, _clock) = memory_registry();
        registry.upsert(1, "fly", None).await.unwrap();
        registry.upsert(2, "fly", None).await.unwrap();
        assert_eq!(registry.cached_users(), 2);

        registry.refresh_all();
        assert_eq!(registry.cached_users(), 0);
        assert!(registry.has(2, "fly").await.unwrap());
    }

    // Test: Expired entries read as false and are pruned from cache
    #[tokio::test]
    async fn test_has_prunes_expired_entry() {
        let (mut registry, _store, clock) = memory_registry();
        registry
            .upsert(1, "fly", Some(t0() + Duration::seconds(10)))
            .await
            .unwrap();
        assert!(registry.has(1, "fly").await.unwrap());

        clock.advance(Duration::seconds(10));
        assert!(!registry.has(1, "fly").await.unwrap());
        assert!(registry.get_all(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_returns_only_live_grants() {
        let (mut registry, _store, clock) = memory_registry();
        registry.upsert(1, "fly", None).await.unwrap();
        registry
            .upsert(1, "kick", Some(t0() + Duration::minutes(1)))
            .await
            .unwrap();
        registry
            .upsert(1, "ban", Some(t0() + Duration::minutes(5)))
            .await
            .unwrap();

        clock.advance(Duration::minutes(2));
        let all = registry.get_all(1).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("fly"), Some(&None));
        assert_eq!(all.get("ban"), Some(&Some(t0() + Duration::minutes(5))));
    }

    // Test: Rows expired in the store are never loaded
    #[tokio::test]
    async fn test_load_skips_rows_expired_in_store() {
        let (mut registry, store, _clock) = memory_registry();
        store.upsert(1, "fly", Some(t0())).await.unwrap();
        store.upsert(1, "kick", None).await.unwrap();

        let all = registry.get_all(1).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("kick"));
    }

    #[tokio::test]
    async fn test_compute_expiry() {
        let (mut registry, _store, clock) = memory_registry();
        let hour = Duration::hours(1);

        assert_eq!(registry.compute_expiry(1, "fly", None, true).await.unwrap(), None);
        assert_eq!(
            registry.compute_expiry(1, "fly", Some(hour), true).await.unwrap(),
            Some(t0() + hour)
        );

        registry.upsert(1, "fly", Some(t0() + hour)).await.unwrap();
        assert_eq!(
            registry.compute_expiry(1, "fly", Some(hour), true).await.unwrap(),
            Some(t0() + hour * 2)
        );
        assert_eq!(
            registry.compute_expiry(1, "fly", Some(hour), false).await.unwrap(),
            Some(t0() + hour)
        );

        // Expired grants don't stack
        clock.advance(hour * 2);
        assert_eq!(
            registry.compute_expiry(1, "fly", Some(hour), true).await.unwrap(),
            Some(t0() + hour * 3)
        );

        // Permanent grants don't stack either
        registry.upsert(1, "kick", None).await.unwrap();
        assert_eq!(
            registry.compute_expiry(1, "kick", Some(hour), true).await.unwrap(),
            Some(t0() + hour * 3)
        );
    }

    // Test: Failed load propagates and leaves the user unloaded
    #[tokio::test]
    async fn test_failed_load_caches_nothing() {
        let store = Arc::new(FailingStore::new());
        store.fail_loads(true).await;
        let (mut registry, _clock) = registry_with(store.clone());

        let result = registry.has(1, "fly").await;
        assert!(matches!(result, Err(AuthzError::StoreUnavailable(_))));
        assert!(!registry.is_loaded(1));

        store.fail_loads(false).await;
        assert!(!registry.has(1, "fly").await.unwrap());
        assert!(registry.is_loaded(1));
    }

    // Test: Failed upsert leaves no trace in cache
    #[tokio::test]
    async fn test_failed_upsert_invalidates_user() {
        let store = Arc::new(FailingStore::new());
        let (mut registry, _clock) = registry_with(store.clone());
        registry.upsert(1, "kick", None).await.unwrap();

        store.fail_writes(true).await;
        let result = registry.upsert(1, "fly", None).await;
        assert!(matches!(result, Err(AuthzError::StoreUnavailable(_))));
        assert!(!registry.is_loaded(1));

        store.fail_writes(false).await;
        assert!(!registry.has(1, "fly").await.unwrap());
        assert!(registry.has(1, "kick").await.unwrap());
    }

    // Test: Failed delete still removes the cache entry
    #[tokio::test]
    async fn test_failed_delete_still_removes_from_cache() {
        let store = Arc::new(FailingStore::new());
        let (mut registry, _clock) = registry_with(store.clone());
        registry.upsert(1, "fly", None).await.unwrap();

        store.fail_writes(true).await;
        assert!(registry.delete(1, "fly").await.is_err());
        assert!(!registry.has(1, "fly").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_absent_permission_is_ok() {
        let (mut registry, _store, _clock) = memory_registry();
        assert!(registry.delete(1, "fly").await.is_ok());
        assert!(registry.get_all(1).await.unwrap().is_empty());
    }
}
