//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading the authorization document.
///
/// Any of these aborts the load; no partially validated config is installed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be read from disk.
    #[error("couldn't read config at {path}: {message}")]
    Io { path: String, message: String },

    /// The document is not valid JSON or has the wrong shape.
    #[error("couldn't parse config: {message}")]
    Parse { message: String },

    /// A declared permission name is empty or too long to be stored.
    #[error("invalid permission name \"{permission}\": {reason}")]
    InvalidPermissionName { permission: String, reason: String },

    /// A group lists a permission missing from `Permissions`.
    #[error("group {group} has permission {permission} that doesn't exist in Permissions")]
    UnknownGroupPermission { group: String, permission: String },

    /// A `PermissionAccess` key is not a declared permission.
    #[error("[PermissionAccess] permission is not registered: {permission}")]
    UnknownAccessPermission { permission: String },

    /// A `PermissionAccess` value lists an undeclared permission.
    #[error("[PermissionAccess] contains invalid permission \"{target}\" for \"{permission}\"")]
    UnknownAccessTarget { permission: String, target: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
