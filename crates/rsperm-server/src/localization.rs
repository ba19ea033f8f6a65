//! Localization seam for human-readable permission listings.
//!
//! Decision logic never goes through here; only the `ShowPermissions`
//! command renders text. Hosts plug their own [`Localizer`] in, or use
//! [`StaticLocalizer`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rsperm_domain::{PermissionMap, PlatformId};

/// Template wrapping the whole listing. Placeholder: `{permissions}`.
pub const SHOW_PERMISSIONS_FORMAT: &str = "ShowPermissionsFormat";
/// Separator between rendered permissions.
pub const PERMISSIONS_DELIMITER: &str = "PermissionsDelimiter";
/// Template for a permanent grant. Placeholder: `{name}`.
pub const PERMISSION_FORMAT: &str = "PermissionFormat";
/// Template for a timed grant. Placeholders: `{name}`, `{time}`.
pub const PERMISSION_FINITE_FORMAT: &str = "PermissionFiniteFormat";
/// Template for the remaining time. Placeholder: `{time}`.
pub const TIME_FORMAT: &str = "TimeFormat";
/// Prefix of per-permission display names, e.g. `PermissionName_fly`.
pub const PERMISSION_NAME_PREFIX: &str = "PermissionName_";

/// Per-user string lookup.
pub trait Localizer: Send + Sync {
    /// Returns the localized string for `key`, or `key` itself if there is none.
    fn get(&self, platform_id: PlatformId, key: &str) -> String;

    /// Renders a remaining-time span.
    fn format_duration(&self, platform_id: PlatformId, duration: Duration) -> String;
}

/// Renders a user's grants for display, sorted by permission name.
pub fn render_permissions(
    localizer: &dyn Localizer,
    platform_id: PlatformId,
    permissions: &PermissionMap,
    now: DateTime<Utc>,
) -> String {
    let mut entries: Vec<_> = permissions.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let rendered: Vec<String> = entries
        .into_iter()
        .map(|(permission, expires_at)| {
            let key = format!("{PERMISSION_NAME_PREFIX}{permission}");
            let mut name = localizer.get(platform_id, &key);
            if name == key {
                name = permission.clone();
            }

            match expires_at {
                Some(at) => {
                    let remaining = (*at - now).max(Duration::zero());
                    let time = localizer
                        .get(platform_id, TIME_FORMAT)
                        .replace("{time}", &localizer.format_duration(platform_id, remaining));
                    localizer
                        .get(platform_id, PERMISSION_FINITE_FORMAT)
                        .replace("{name}", &name)
                        .replace("{time}", &time)
                }
                None => localizer
                    .get(platform_id, PERMISSION_FORMAT)
                    .replace("{name}", &name),
            }
        })
        .collect();

    let delimiter = localizer.get(platform_id, PERMISSIONS_DELIMITER);
    localizer
        .get(platform_id, SHOW_PERMISSIONS_FORMAT)
        .replace("{permissions}", &rendered.join(&delimiter))
}

/// Fixed table of templates shared by all users.
#[derive(Debug, Clone, Default)]
pub struct StaticLocalizer {
    strings: HashMap<String, String>,
}

impl StaticLocalizer {
    /// Empty table: every lookup returns its key.
    pub fn new() -> Self {
        Self::default()
    }

    /// English templates for every listing key.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(SHOW_PERMISSIONS_FORMAT, "Permissions: {permissions}")
            .with(PERMISSIONS_DELIMITER, ", ")
            .with(PERMISSION_FORMAT, "{name}")
            .with(PERMISSION_FINITE_FORMAT, "{name} ({time})")
            .with(TIME_FORMAT, "{time} left")
    }

    /// Adds or replaces one template.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(key.into(), value.into());
        self
    }
}

impl Localizer for StaticLocalizer {
    fn get(&self, _platform_id: PlatformId, key: &str) -> String {
        self.strings
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn format_duration(&self, _platform_id: PlatformId, duration: Duration) -> String {
        format_compact(duration)
    }
}

/// `1d 2h 3m 4s`, skipping zero units. Negative spans render as `0s`.
pub fn format_compact(duration: Duration) -> String {
    let mut secs = duration.num_seconds().max(0);
    if secs == 0 {
        return "0s".to_string();
    }

    let mut parts = Vec::with_capacity(4);
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        let count = secs / size;
        if count > 0 {
            parts.push(format!("{count}{unit}"));
            secs %= size;
        }
    }
    parts.join(" ")
}
