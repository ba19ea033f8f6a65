//! Authorization façade.
//!
//! [`AuthorizationService`] combines the current [`AuthConfig`] with the
//! [`PermissionRegistry`] and answers every question collaborators ask:
//! grants, group membership and delegated access.
//!
//! # Locking
//!
//! The registry sits behind one `tokio::sync::Mutex`. Each public operation
//! takes it once, so a read-then-write sequence (compute expiry, then upsert)
//! is atomic with respect to every other operation.
//!
//! The config is an `Arc<AuthConfig>` behind a `RwLock` that is only held long
//! enough to clone the `Arc`. A reload swaps in a new `Arc`; operations already
//! holding the old one finish against it.
//!
//! # Errors
//!
//! The `try_*` methods return [`AuthzResult`]. The plain methods fold every
//! error into `false`: validation problems are logged at `warn`, store
//! failures at `error`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use rsperm_domain::{AuthConfig, Clock, ConfigResult, PermissionMap, PlatformId};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AuthzError, AuthzResult};
use crate::registry::PermissionRegistry;

/// Public entry point for permission and group queries.
pub struct AuthorizationService {
    config: RwLock<Arc<AuthConfig>>,
    registry: Mutex<PermissionRegistry>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl AuthorizationService {
    pub fn new(config: AuthConfig, registry: PermissionRegistry) -> Self {
        let clock = Arc::clone(registry.clock());
        Self {
            config: RwLock::new(Arc::new(config)),
            registry: Mutex::new(registry),
            clock,
        }
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> Arc<AuthConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// The clock used for expiry decisions.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ---- grants -------------------------------------------------------

    /// Grants `permission`, stacking `duration` on a live timed grant.
    pub async fn add_permission(
        &self,
        platform_id: PlatformId,
        permission: &str,
        duration: Option<Duration>,
    ) -> bool {
        fold(
            self.try_add_permission(platform_id, permission, duration).await,
            platform_id,
            "add permission",
        )
    }

    /// Grants `permission` with an expiry counted from now.
    pub async fn set_permission(
        &self,
        platform_id: PlatformId,
        permission: &str,
        duration: Option<Duration>,
    ) -> bool {
        fold(
            self.try_set_permission(platform_id, permission, duration).await,
            platform_id,
            "set permission",
        )
    }

    /// Revokes `permission`. Succeeds if the user never held it.
    pub async fn remove_permission(&self, platform_id: PlatformId, permission: &str) -> bool {
        fold(
            self.try_remove_permission(platform_id, permission).await,
            platform_id,
            "remove permission",
        )
    }

    pub async fn try_add_permission(
        &self,
        platform_id: PlatformId,
        permission: &str,
        duration: Option<Duration>,
    ) -> AuthzResult<()> {
        self.grant(platform_id, permission, duration, true).await
    }

    pub async fn try_set_permission(
        &self,
        platform_id: PlatformId,
        permission: &str,
        duration: Option<Duration>,
    ) -> AuthzResult<()> {
        self.grant(platform_id, permission, duration, false).await
    }

    /// Undeclared names are accepted so rows left behind by an older config
    /// can still be revoked.
    #[instrument(skip(self))]
    pub async fn try_remove_permission(
        &self,
        platform_id: PlatformId,
        permission: &str,
    ) -> AuthzResult<()> {
        self.registry
            .lock()
            .await
            .delete(platform_id, permission)
            .await
    }

    #[instrument(skip(self))]
    async fn grant(
        &self,
        platform_id: PlatformId,
        permission: &str,
        duration: Option<Duration>,
        additive: bool,
    ) -> AuthzResult<()> {
        let config = self.config().await;
        if !config.is_permission(permission) {
            return Err(AuthzError::ValidationFailed {
                reason: format!("no permission with name \"{permission}\""),
            });
        }

        let mut registry = self.registry.lock().await;
        let expires_at = registry
            .compute_expiry(platform_id, permission, duration, additive)
            .await?;
        registry.upsert(platform_id, permission, expires_at).await
    }

    // ---- queries ------------------------------------------------------

    /// Returns true if the user holds a live grant for `permission`.
    pub async fn has_permission(&self, platform_id: PlatformId, permission: &str) -> bool {
        match self.registry.lock().await.has(platform_id, permission).await {
            Ok(held) => held,
            Err(e) => {
                error!(platform_id, permission, error = %e, "permission check failed");
                false
            }
        }
    }

    /// Returns true if the user holds every one of `permissions`.
    ///
    /// All names are checked against one snapshot of the user's grants.
    pub async fn has_all_permissions(&self, platform_id: PlatformId, permissions: &[&str]) -> bool {
        self.with_live_grants(platform_id, |held| {
            permissions.iter().all(|p| held.contains_key(*p))
        })
        .await
    }

    /// Returns true if the user holds at least one of `permissions`.
    pub async fn has_any_permission(&self, platform_id: PlatformId, permissions: &[&str]) -> bool {
        self.with_live_grants(platform_id, |held| {
            permissions.iter().any(|p| held.contains_key(*p))
        })
        .await
    }

    /// Copy of the user's live grants, or `None` if the store failed.
    pub async fn get_permissions(&self, platform_id: PlatformId) -> Option<PermissionMap> {
        let mut registry = self.registry.lock().await;
        match registry.get_all(platform_id).await {
            Ok(permissions) => Some(permissions.clone()),
            Err(e) => {
                error!(platform_id, error = %e, "failed to read permissions");
                None
            }
        }
    }

    /// Runs `check` against the user's pruned grants under the registry lock.
    async fn with_live_grants<F>(&self, platform_id: PlatformId, check: F) -> bool
    where
        F: FnOnce(&PermissionMap) -> bool,
    {
        let mut registry = self.registry.lock().await;
        match registry.get_all(platform_id).await {
            Ok(held) => check(held),
            Err(e) => {
                error!(platform_id, error = %e, "failed to read permissions");
                false
            }
        }
    }

    // ---- groups -------------------------------------------------------

    /// Grants every permission of `group` with an expiry counted from now.
    pub async fn add_to_group(
        &self,
        platform_id: PlatformId,
        group: &str,
        duration: Option<Duration>,
    ) -> bool {
        fold(
            self.try_add_to_group(platform_id, group, duration).await,
            platform_id,
            "add to group",
        )
    }

    /// Revokes every permission of `group`.
    pub async fn remove_from_group(&self, platform_id: PlatformId, group: &str) -> bool {
        fold(
            self.try_remove_from_group(platform_id, group).await,
            platform_id,
            "remove from group",
        )
    }

    /// Best effort: permissions applied before a store failure stay applied.
    #[instrument(skip(self))]
    pub async fn try_add_to_group(
        &self,
        platform_id: PlatformId,
        group: &str,
        duration: Option<Duration>,
    ) -> AuthzResult<()> {
        let config = self.config().await;
        let permissions = sorted_group(&config, group)?;

        let mut registry = self.registry.lock().await;
        for permission in permissions {
            let expires_at = registry
                .compute_expiry(platform_id, permission, duration, false)
                .await?;
            registry.upsert(platform_id, permission, expires_at).await?;
        }
        debug!(platform_id, group, "group granted");
        Ok(())
    }

    /// Best effort: permissions removed before a store failure stay removed.
    #[instrument(skip(self))]
    pub async fn try_remove_from_group(&self, platform_id: PlatformId, group: &str) -> AuthzResult<()> {
        let config = self.config().await;
        let permissions = sorted_group(&config, group)?;

        let mut registry = self.registry.lock().await;
        for permission in permissions {
            registry.delete(platform_id, permission).await?;
        }
        debug!(platform_id, group, "group revoked");
        Ok(())
    }

    /// Returns true if the user holds every permission of `group`.
    pub async fn is_in_group(&self, platform_id: PlatformId, group: &str) -> bool {
        self.is_in_groups(platform_id, &[group]).await
    }

    /// Returns true if the user holds every permission in the union of `groups`.
    ///
    /// Any unknown group name makes the answer false.
    pub async fn is_in_groups(&self, platform_id: PlatformId, groups: &[&str]) -> bool {
        let config = self.config().await;
        let mut required: HashSet<&str> = HashSet::new();
        for group in groups {
            match config.group(group) {
                Some(permissions) => required.extend(permissions.iter().map(String::as_str)),
                None => {
                    warn!(platform_id, group, "membership check for unknown group");
                    return false;
                }
            }
        }

        self.with_live_grants(platform_id, |held| {
            required.iter().all(|p| held.contains_key(*p))
        })
        .await
    }

    // ---- delegation ---------------------------------------------------

    /// Returns true if `caller` holds a permission that delegates `target`.
    pub async fn has_access(&self, caller: PlatformId, target: &str) -> bool {
        let config = self.config().await;
        self.with_live_grants(caller, |held| {
            config.grants_access(held.keys().map(String::as_str), target)
        })
        .await
    }

    /// Returns true if `caller` has access to every permission of `group`.
    ///
    /// Unknown groups yield false.
    pub async fn has_access_to_group(&self, caller: PlatformId, group: &str) -> bool {
        let config = self.config().await;
        let Some(permissions) = config.group(group) else {
            warn!(platform_id = caller, group, "access check for unknown group");
            return false;
        };

        self.with_live_grants(caller, |held| {
            permissions
                .iter()
                .all(|gp| config.grants_access(held.keys().map(String::as_str), gp))
        })
        .await
    }

    // ---- authentication events ---------------------------------------

    /// Grants the configured admin group to a freshly authenticated admin.
    ///
    /// Returns false if no admin group is configured or the grant failed.
    pub async fn on_admin_authenticated(&self, platform_id: PlatformId) -> bool {
        let config = self.config().await;
        let Some(group) = config.admin_auth_group() else {
            debug!(platform_id, "admin authenticated, no admin group configured");
            return false;
        };
        info!(platform_id, group, "granting admin group");
        self.add_to_group(platform_id, group, None).await
    }

    // ---- config and cache management ----------------------------------

    /// Copy of the declared permission names.
    pub async fn registered_permissions(&self) -> HashSet<String> {
        self.config().await.permissions().clone()
    }

    /// Copy of the declared groups.
    pub async fn registered_groups(&self) -> HashMap<String, HashSet<String>> {
        self.config().await.groups().clone()
    }

    /// Replaces the configuration. Granted state is untouched.
    pub async fn reload_config(&self, config: AuthConfig) {
        *self.config.write().await = Arc::new(config);
        info!("authorization config reloaded");
    }

    /// Loads the document at `path` and swaps it in.
    ///
    /// On error the current configuration stays in place.
    pub async fn reload_from_path<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let config = AuthConfig::load(path)?;
        self.reload_config(config).await;
        Ok(())
    }

    /// Drops cached grants for one user, or for everyone.
    pub async fn refresh_permissions(&self, platform_id: Option<PlatformId>) {
        let mut registry = self.registry.lock().await;
        match platform_id {
            Some(id) => registry.refresh(id),
            None => registry.refresh_all(),
        }
    }

    /// Number of users currently cached.
    pub async fn cached_users(&self) -> usize {
        self.registry.lock().await.cached_users()
    }
}

/// Resolves a group to its permissions in a stable order.
fn sorted_group<'a>(config: &'a AuthConfig, group: &str) -> AuthzResult<Vec<&'a str>> {
    let permissions = config.group(group).ok_or_else(|| AuthzError::UnknownGroup {
        group: group.to_string(),
    })?;
    let mut sorted: Vec<&str> = permissions.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    Ok(sorted)
}

fn fold(result: AuthzResult<()>, platform_id: PlatformId, operation: &'static str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_validation() => {
            warn!(platform_id, error = %e, "{operation} rejected");
            false
        }
        Err(e) => {
            error!(platform_id, error = %e, "{operation} failed");
            false
        }
    }
}
