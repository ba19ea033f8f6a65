//! Authorization document loading and validation.
//!
//! The on-disk document is JSON:
//!
//! ```json
//! {
//!   "Permissions": ["fly", "kill", "kick"],
//!   "Groups": { "mod": ["fly", "kick"] },
//!   "AdminAuthGroup": "mod",
//!   "PermissionAccess": { "fly": "*, kill", "kick": "kick" },
//!   "Commands": { "AddPermission": { "Name": "perm add" } }
//! }
//! ```
//!
//! [`AuthDocument`] is the raw serde shape; [`AuthConfig`] is the validated,
//! immutable result. A reload builds a new `AuthConfig` and swaps it in whole.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::model::MAX_PERMISSION_LENGTH;

/// Delegation entry token meaning "every declared permission".
pub const WILDCARD: &str = "*";

/// Raw authorization document as it appears in JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthDocument {
    pub permissions: Vec<String>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub admin_auth_group: Option<String>,
    /// Permission name -> comma-separated managed permissions, `*` allowed.
    #[serde(default)]
    pub permission_access: BTreeMap<String, String>,
    /// Command name -> command block. A present block enables the command.
    #[serde(default)]
    pub commands: BTreeMap<String, serde_json::Value>,
}

/// Validated authorization configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthConfig {
    permissions: HashSet<String>,
    groups: HashMap<String, HashSet<String>>,
    delegation: HashMap<String, HashSet<String>>,
    admin_auth_group: Option<String>,
    commands: BTreeMap<String, serde_json::Value>,
}

impl AuthConfig {
    /// Reads and validates the document at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let document: AuthDocument =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse {
                message: e.to_string(),
            })?;
        Self::from_document(document)
    }

    /// Validates a raw document.
    pub fn from_document(document: AuthDocument) -> ConfigResult<Self> {
        for permission in &document.permissions {
            check_permission_name(permission)?;
        }
        let permissions: HashSet<String> = document.permissions.into_iter().collect();

        let mut groups = HashMap::with_capacity(document.groups.len());
        for (group, members) in document.groups {
            let mut set = HashSet::with_capacity(members.len());
            for permission in members {
                if !permissions.contains(&permission) {
                    return Err(ConfigError::UnknownGroupPermission { group, permission });
                }
                set.insert(permission);
            }
            groups.insert(group, set);
        }

        // A dangling admin group is downgraded to a warning.
        let admin_auth_group = match document.admin_auth_group {
            Some(group) if groups.contains_key(&group) => Some(group),
            Some(group) => {
                warn!(
                    group = %group,
                    "AdminAuthGroup points to invalid group; admin-authenticated users will not receive any groups"
                );
                None
            }
            None => None,
        };

        let mut delegation = HashMap::with_capacity(document.permission_access.len());
        for (permission, raw) in document.permission_access {
            if !permissions.contains(&permission) {
                return Err(ConfigError::UnknownAccessPermission { permission });
            }
            let managed = parse_access_entry(&permission, &raw, &permissions)?;
            delegation.insert(permission, managed);
        }

        Ok(Self {
            permissions,
            groups,
            delegation,
            admin_auth_group,
            commands: document.commands,
        })
    }

    /// All declared permission names.
    pub fn permissions(&self) -> &HashSet<String> {
        &self.permissions
    }

    /// All groups by name.
    pub fn groups(&self) -> &HashMap<String, HashSet<String>> {
        &self.groups
    }

    /// The expanded delegation table.
    pub fn delegation(&self) -> &HashMap<String, HashSet<String>> {
        &self.delegation
    }

    /// Group granted on admin authentication, if valid.
    pub fn admin_auth_group(&self) -> Option<&str> {
        self.admin_auth_group.as_deref()
    }

    /// Returns true if `permission` is declared.
    pub fn is_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Looks up a group's permission set.
    pub fn group(&self, name: &str) -> Option<&HashSet<String>> {
        self.groups.get(name)
    }

    /// Permissions whose holders may manage `permission`'s target set.
    pub fn managed_by(&self, permission: &str) -> Option<&HashSet<String>> {
        self.delegation.get(permission)
    }

    /// Returns true if any of `held` delegates management of `target`.
    pub fn grants_access<'a, I>(&self, held: I, target: &str) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        held.into_iter().any(|p| {
            self.managed_by(p)
                .map(|managed| managed.contains(target))
                .unwrap_or(false)
        })
    }

    /// The config block for a command, if the command is enabled.
    pub fn command_block(&self, name: &str) -> Option<&serde_json::Value> {
        self.commands.get(name)
    }

    /// Names of all command blocks present in the document.
    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

/// Declared names must fit the grant store's `Permission` column.
fn check_permission_name(permission: &str) -> ConfigResult<()> {
    let reason = if permission.is_empty() {
        "name cannot be empty".to_string()
    } else if permission.len() > MAX_PERMISSION_LENGTH {
        format!("name exceeds {MAX_PERMISSION_LENGTH} bytes")
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidPermissionName {
        permission: permission.to_string(),
        reason,
    })
}

/// Expands one `PermissionAccess` value.
///
/// Without `*` the listed names are the managed set. With `*` the set starts
/// as every declared permission and the other listed names are removed.
fn parse_access_entry(
    permission: &str,
    raw: &str,
    declared: &HashSet<String>,
) -> ConfigResult<HashSet<String>> {
    let items: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let wildcard = items.iter().any(|s| *s == WILDCARD);

    let mut managed = if wildcard {
        declared.clone()
    } else {
        HashSet::with_capacity(items.len())
    };

    for item in items.into_iter().filter(|s| *s != WILDCARD) {
        if !declared.contains(item) {
            return Err(ConfigError::UnknownAccessTarget {
                permission: permission.to_string(),
                target: item.to_string(),
            });
        }
        if wildcard {
            managed.remove(item);
        } else {
            managed.insert(item.to_string());
        }
    }

    Ok(managed)
}
