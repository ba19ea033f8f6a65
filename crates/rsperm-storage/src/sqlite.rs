//! SQLite storage implementation.
//!
//! Grants live in a single `Permissions` table keyed by
//! `(PlatformId, Permission)`. Timestamps are stored as INTEGER unix
//! milliseconds so range filters compare numerically.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rsperm_domain::{Clock, Grant, PlatformId, SystemClock};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};
use tracing::{debug, error, instrument};

use crate::error::{StorageError, StorageResult};
use crate::traits::{validate_permission, PermissionStore, StoredGrant};

/// Default pool acquire timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// SQLite configuration options.
#[derive(Clone)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://permissions.db` or `sqlite::memory:`.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Pool acquire timeout in seconds.
    pub connect_timeout_secs: u64,
}

// Custom Debug implementation to keep file paths and credentials out of logs
impl std::fmt::Debug for SqliteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://rsperm.db".to_string(),
            max_connections: 5,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// SQLite implementation of PermissionStore.
pub struct SqlitePermissionStore {
    pool: SqlitePool,
    /// Source of `GrantedAt` / `UpdatedAt`.
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqlitePermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePermissionStore")
            .field("pool_size", &self.pool.size())
            .field("clock", &self.clock)
            .finish()
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> StorageResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StorageError::QueryError {
            message: format!("timestamp out of range: {millis}"),
        })
}

/// SQLite stores signed 64-bit integers; ids round-trip bit-for-bit.
fn to_db_id(platform_id: PlatformId) -> i64 {
    platform_id as i64
}

fn from_db_id(value: i64) -> PlatformId {
    value as PlatformId
}

fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::QueryError {
        message: e.to_string(),
    }
}

impl SqlitePermissionStore {
    /// Creates a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for row timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates a new SQLite store with the given configuration.
    ///
    /// The database file is created if missing.
    #[instrument(skip(config))]
    pub async fn from_config(config: &SqliteConfig) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self::new(pool))
    }

    /// Creates a private in-memory database.
    ///
    /// Each SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::ConnectionError {
                message: e.to_string(),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self::new(pool))
    }

    /// Acquires a scoped connection; it returns to the pool when dropped.
    async fn acquire(&self) -> StorageResult<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })
    }

    /// Runs a storage operation and records its duration.
    ///
    /// # Metrics
    /// - `rsperm_storage_query_duration_seconds` - Histogram of query durations
    async fn execute_with_metrics<T, F>(&self, operation: &'static str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = Instant::now();
        let result = future.await;
        let status = if result.is_ok() { "success" } else { "error" };

        metrics::histogram!(
            "rsperm_storage_query_duration_seconds",
            "operation" => operation,
            "backend" => "sqlite",
            "status" => status
        )
        .record(start.elapsed().as_secs_f64());

        result
    }

    async fn create_schema(&self) -> StorageResult<()> {
        let mut conn = self.acquire().await?;
        debug!("Creating Permissions table");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS Permissions (
                PlatformId INTEGER NOT NULL,
                Permission VARCHAR(32) NOT NULL,
                ExpiresAt INTEGER DEFAULT NULL,
                GrantedAt INTEGER NOT NULL,
                UpdatedAt INTEGER NOT NULL,
                PRIMARY KEY (PlatformId, Permission)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::SchemaError {
            message: format!("Failed to create Permissions table: {e}"),
        })?;

        // Supports the startup sweep
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_permissions_expires_at ON Permissions (ExpiresAt)")
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::SchemaError {
                message: format!("Failed to create ExpiresAt index: {e}"),
            })?;

        Ok(())
    }

    async fn upsert_row(
        &self,
        platform_id: PlatformId,
        permission: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut conn = self.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO Permissions (PlatformId, Permission, ExpiresAt, GrantedAt, UpdatedAt)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (PlatformId, Permission)
            DO UPDATE SET ExpiresAt = excluded.ExpiresAt, UpdatedAt = excluded.UpdatedAt
            "#,
        )
        .bind(to_db_id(platform_id))
        .bind(permission)
        .bind(expires_at.map(to_millis))
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn delete_row(&self, platform_id: PlatformId, permission: &str) -> StorageResult<()> {
        let mut conn = self.acquire().await?;
        sqlx::query("DELETE FROM Permissions WHERE PlatformId = ? AND Permission = ?")
            .bind(to_db_id(platform_id))
            .bind(permission)
            .execute(&mut *conn)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn select_active(
        &self,
        platform_id: PlatformId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Grant>> {
        let mut conn = self.acquire().await?;
        let rows = sqlx::query(
            r#"
            SELECT Permission, ExpiresAt FROM Permissions
            WHERE PlatformId = ? AND (ExpiresAt IS NULL OR ExpiresAt > ?)
            "#,
        )
        .bind(to_db_id(platform_id))
        .bind(to_millis(now))
        .fetch_all(&mut *conn)
        .await
        .map_err(query_error)?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in rows {
            let permission: String = row.try_get("Permission").map_err(query_error)?;
            let expires_at: Option<i64> = row.try_get("ExpiresAt").map_err(query_error)?;
            grants.push(Grant::new(
                platform_id,
                permission,
                expires_at.map(from_millis).transpose()?,
            ));
        }
        Ok(grants)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let mut conn = self.acquire().await?;
        let result =
            sqlx::query("DELETE FROM Permissions WHERE ExpiresAt IS NOT NULL AND ExpiresAt <= ?")
                .bind(to_millis(now))
                .execute(&mut *conn)
                .await
                .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn select_grant(
        &self,
        platform_id: PlatformId,
        permission: &str,
    ) -> StorageResult<Option<StoredGrant>> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query(
            r#"
            SELECT PlatformId, Permission, ExpiresAt, GrantedAt, UpdatedAt FROM Permissions
            WHERE PlatformId = ? AND Permission = ?
            "#,
        )
        .bind(to_db_id(platform_id))
        .bind(permission)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("PlatformId").map_err(query_error)?;
        let name: String = row.try_get("Permission").map_err(query_error)?;
        let expires_at: Option<i64> = row.try_get("ExpiresAt").map_err(query_error)?;
        let granted_at: i64 = row.try_get("GrantedAt").map_err(query_error)?;
        let updated_at: i64 = row.try_get("UpdatedAt").map_err(query_error)?;

        Ok(Some(StoredGrant {
            grant: Grant::new(
                from_db_id(id),
                name,
                expires_at.map(from_millis).transpose()?,
            ),
            granted_at: from_millis(granted_at)?,
            updated_at: from_millis(updated_at)?,
        }))
    }
}

#[async_trait]
impl PermissionStore for SqlitePermissionStore {
    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> StorageResult<()> {
        self.execute_with_metrics("ensure_schema", self.create_schema())
            .await
            .inspect_err(|e| error!(error = %e, "Couldn't create Permissions table"))
    }

    #[instrument(skip(self))]
    async fn upsert(
        &self,
        platform_id: PlatformId,
        permission: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        validate_permission(permission)?;
        let now = self.clock.now();

        self.execute_with_metrics(
            "upsert",
            self.upsert_row(platform_id, permission, expires_at, now),
        )
        .await
        .inspect_err(|e| {
            error!(platform_id, permission, error = %e, "Couldn't UPSERT permission");
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, platform_id: PlatformId, permission: &str) -> StorageResult<()> {
        self.execute_with_metrics("delete", self.delete_row(platform_id, permission))
            .await
            .inspect_err(|e| {
                error!(platform_id, permission, error = %e, "Couldn't DELETE permission");
            })
    }

    #[instrument(skip(self))]
    async fn load_active(
        &self,
        platform_id: PlatformId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Grant>> {
        self.execute_with_metrics("load_active", self.select_active(platform_id, now))
            .await
            .inspect_err(|e| error!(platform_id, error = %e, "Couldn't load permissions"))
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        self.execute_with_metrics("sweep_expired", self.delete_expired(now))
            .await
            .inspect_err(|e| error!(error = %e, "Couldn't DELETE expired permissions"))
    }

    async fn get_grant(
        &self,
        platform_id: PlatformId,
        permission: &str,
    ) -> StorageResult<Option<StoredGrant>> {
        self.execute_with_metrics("get_grant", self.select_grant(platform_id, permission))
            .await
    }
}
