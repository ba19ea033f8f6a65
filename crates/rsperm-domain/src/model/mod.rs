//! Permission model: the validated authorization document and grant types.

mod config;
mod types;

#[cfg(test)]
mod config_proptest;

pub use config::{AuthConfig, AuthDocument, WILDCARD};
pub use types::{is_expired, Grant, PermissionMap, PlatformId, MAX_PERMISSION_LENGTH};
