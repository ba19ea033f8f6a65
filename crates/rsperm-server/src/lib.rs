//! rsperm-server: permission registry, authorization façade and command layer
//!
//! This crate contains the runtime layer including:
//! - Per-user permission cache over a grant store
//! - Authorization service (grants, groups, delegated access)
//! - Command handlers for a host dispatcher
//! - Localization seam for permission listings
//! - Service settings, logging setup and startup wiring
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rsperm-server                 │
//! ├─────────────────────────────────────────────┤
//! │  commands.rs      - Command handlers        │
//! │  localization.rs  - Listing rendering       │
//! │  service.rs       - Authorization façade    │
//! │  registry.rs      - Per-user grant cache    │
//! │  startup.rs       - Wiring from settings    │
//! │  config.rs        - Service settings        │
//! │  observability.rs - Logging setup           │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//!       rsperm-storage (PermissionStore)
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod localization;
pub mod observability;
pub mod registry;
pub mod service;
pub mod startup;

#[cfg(test)]
mod tests;

pub use commands::{
    CommandContext, CommandName, CommandRegistrar, CommandRequest, PermissionCommands,
};
pub use config::{ConfigLoadError, LoggingSettings, ServerConfig};
pub use error::{AuthzError, AuthzResult};
pub use localization::{Localizer, StaticLocalizer};
pub use observability::init_logging;
pub use registry::PermissionRegistry;
pub use service::AuthorizationService;
pub use startup::{start, StartupError};
