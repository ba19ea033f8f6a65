//! rsperm-storage: Grant persistence layer
//!
//! This crate provides durable storage for `(user, permission) -> expiry`
//! rows, including:
//! - PermissionStore trait for storage operations
//! - In-memory implementation for testing and embedding
//! - SQLite implementation (sqlx) for production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rsperm-storage                 │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - PermissionStore definition   │
//! │  memory.rs   - In-memory implementation     │
//! │  sqlite.rs   - SQLite implementation        │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryPermissionStore;
pub use sqlite::{SqliteConfig, SqlitePermissionStore};
pub use traits::{validate_permission, PermissionStore, StoredGrant, MAX_PERMISSION_LENGTH};
