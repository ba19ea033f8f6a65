//! Grant and expiry types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Longest permission name that can be declared and stored, in bytes.
pub const MAX_PERMISSION_LENGTH: usize = 32;

/// 64-bit platform user identifier.
pub type PlatformId = u64;

/// One user's permissions mapped to their expiry (`None` = permanent).
pub type PermissionMap = HashMap<String, Option<DateTime<Utc>>>;

/// Returns true if a grant with this expiry is no longer live at `now`.
///
/// Permanent grants never expire; timed grants expire at exactly `expires_at`.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(at) if now >= at)
}

/// A single permission held by a single user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub platform_id: PlatformId,
    pub permission: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Grant {
    /// Creates a new grant.
    pub fn new(
        platform_id: PlatformId,
        permission: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            platform_id,
            permission: permission.into(),
            expires_at,
        }
    }

    /// Creates a grant that never expires.
    pub fn permanent(platform_id: PlatformId, permission: impl Into<String>) -> Self {
        Self::new(platform_id, permission, None)
    }

    /// Returns true if this grant is expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_permanent_grant_never_expires() {
        let grant = Grant::permanent(1, "fly");
        assert!(!grant.is_expired(t0()));
        assert!(!grant.is_expired(t0() + Duration::days(365 * 100)));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let at = t0() + Duration::seconds(10);
        assert!(!is_expired(Some(at), at - Duration::milliseconds(1)));
        assert!(is_expired(Some(at), at));
        assert!(is_expired(Some(at), at + Duration::seconds(1)));
    }
}
