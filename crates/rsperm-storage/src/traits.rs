//! PermissionStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsperm_domain::{Grant, PlatformId};
pub use rsperm_domain::MAX_PERMISSION_LENGTH;

use crate::error::{StorageError, StorageResult};

/// A persisted grant with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGrant {
    pub grant: Grant,
    /// Set on first insert, never changed by later upserts.
    pub granted_at: DateTime<Utc>,
    /// Bumped by every upsert.
    pub updated_at: DateTime<Utc>,
}

/// Validates a permission name against the storage schema.
pub fn validate_permission(permission: &str) -> StorageResult<()> {
    if permission.is_empty() {
        return Err(StorageError::InvalidInput {
            message: "permission cannot be empty".to_string(),
        });
    }
    if permission.len() > MAX_PERMISSION_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!(
                "permission exceeds maximum length of {MAX_PERMISSION_LENGTH} bytes: {permission}"
            ),
        });
    }
    Ok(())
}

/// Durable storage for grants keyed by `(platform_id, permission)`.
///
/// Implementations must be thread-safe (Send + Sync). Expiry filtering
/// always uses the `now` supplied by the caller.
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    /// Creates the backing table if it does not exist. Idempotent.
    async fn ensure_schema(&self) -> StorageResult<()>;

    /// Inserts or updates a grant.
    ///
    /// `updated_at` is bumped on every call; `granted_at` is only set on insert.
    async fn upsert(
        &self,
        platform_id: PlatformId,
        permission: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    /// Deletes a grant. Deleting a missing grant is not an error.
    async fn delete(&self, platform_id: PlatformId, permission: &str) -> StorageResult<()>;

    /// Loads every grant for a user that is still live at `now`.
    async fn load_active(
        &self,
        platform_id: PlatformId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Grant>>;

    /// Deletes every grant across all users that is expired at `now`.
    ///
    /// Returns the number of deleted rows.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> StorageResult<u64>;

    /// Reads one grant with its timestamps, expired or not.
    async fn get_grant(
        &self,
        platform_id: PlatformId,
        permission: &str,
    ) -> StorageResult<Option<StoredGrant>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_permission() {
        assert!(validate_permission("fly").is_ok());
        assert!(validate_permission(&"a".repeat(MAX_PERMISSION_LENGTH)).is_ok());
        assert!(matches!(
            validate_permission(""),
            Err(StorageError::InvalidInput { .. })
        ));
        assert!(matches!(
            validate_permission(&"a".repeat(MAX_PERMISSION_LENGTH + 1)),
            Err(StorageError::InvalidInput { .. })
        ));
    }
}
