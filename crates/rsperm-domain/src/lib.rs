//! rsperm-domain: Core permission domain model
//!
//! This crate contains the storage-independent parts of the permission system:
//! - Authorization document parsing and validation (permissions, groups, delegation)
//! - Grant and expiry types
//! - Clock abstraction used for every expiry decision
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                rsperm-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  model/      - AuthConfig & grant types     │
//! │  clock.rs    - System and manual clocks     │
//! │  error.rs    - Configuration errors         │
//! └─────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod error;
pub mod model;

// Re-export commonly used types at the crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, ConfigResult};
pub use model::{
    is_expired, AuthConfig, AuthDocument, Grant, PermissionMap, PlatformId, MAX_PERMISSION_LENGTH,
};
