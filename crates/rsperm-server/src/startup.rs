//! Wiring an [`AuthorizationService`] from service settings.
//!
//! Startup order:
//! 1. Load the authorization document (fatal on error)
//! 2. Build the storage backend
//! 3. Create the schema (fatal on error)
//! 4. Sweep expired grants (logged, never fatal)

use std::sync::Arc;

use rsperm_domain::{AuthConfig, Clock, ConfigError, SystemClock};
use rsperm_storage::{
    MemoryPermissionStore, PermissionStore, SqliteConfig, SqlitePermissionStore, StorageError,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigLoadError, ServerConfig, StorageSettings};
use crate::registry::PermissionRegistry;
use crate::service::AuthorizationService;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Settings(#[from] ConfigLoadError),

    #[error("failed to load authorization config: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialize storage: {0}")]
    Storage(#[from] StorageError),
}

/// Builds a service from `settings` using the system clock.
pub async fn start(settings: &ServerConfig) -> Result<AuthorizationService, StartupError> {
    start_with_clock(settings, Arc::new(SystemClock)).await
}

/// Builds a service from `settings` with an explicit clock.
pub async fn start_with_clock(
    settings: &ServerConfig,
    clock: Arc<dyn Clock>,
) -> Result<AuthorizationService, StartupError> {
    settings.validate()?;

    let config = AuthConfig::load(&settings.auth.config_path).inspect_err(|e| {
        error!(path = %settings.auth.config_path, error = %e, "cannot load authorization config");
    })?;
    info!(
        permissions = config.permissions().len(),
        groups = config.groups().len(),
        "authorization config loaded"
    );

    let store = build_store(&settings.storage, Arc::clone(&clock)).await?;
    start_with_store(config, store, clock).await
}

/// Creates the backend named by `storage.backend`.
pub async fn build_store(
    settings: &StorageSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn PermissionStore>, StartupError> {
    match settings.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage backend");
            Ok(Arc::new(MemoryPermissionStore::with_clock(clock)))
        }
        "sqlite" => {
            let database_url = settings
                .database_url
                .as_ref()
                .ok_or_else(|| ConfigLoadError::Invalid {
                    message: "storage.database_url is required for sqlite backend".to_string(),
                })?;

            info!("Connecting to SQLite database");
            let sqlite_config = SqliteConfig {
                database_url: database_url.clone(),
                max_connections: settings.pool_size,
                connect_timeout_secs: settings.connection_timeout_secs,
            };
            let store = SqlitePermissionStore::from_config(&sqlite_config)
                .await?
                .with_clock(clock);
            Ok(Arc::new(store))
        }
        other => Err(ConfigLoadError::Invalid {
            message: format!("unknown storage backend: {other}"),
        }
        .into()),
    }
}

/// Prepares `store` and builds the service around it.
pub async fn start_with_store(
    config: AuthConfig,
    store: Arc<dyn PermissionStore>,
    clock: Arc<dyn Clock>,
) -> Result<AuthorizationService, StartupError> {
    store.ensure_schema().await.inspect_err(|e| {
        error!(error = %e, "cannot create permissions table");
    })?;

    match store.sweep_expired(clock.now()).await {
        Ok(removed) => info!(removed, "expired grants swept"),
        Err(e) => warn!(error = %e, "expired grant sweep failed, continuing"),
    }

    let registry = PermissionRegistry::new(store, clock);
    Ok(AuthorizationService::new(config, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rsperm_domain::ManualClock;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::tests::mocks::FailingStore;

    const DOCUMENT: &str = r#"{
        "Permissions": ["fly", "kill"],
        "Groups": { "mod": ["fly"] },
        "PermissionAccess": { "fly": "*" }
    }"#;

    fn document_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{DOCUMENT}").unwrap();
        file
    }

    fn settings_for(path: &std::path::Path) -> ServerConfig {
        let mut settings = ServerConfig::default();
        settings.auth.config_path = path.display().to_string();
        settings
    }

    #[tokio::test]
    async fn test_start_with_memory_backend() {
        let file = document_file();
        let service = start(&settings_for(file.path())).await.unwrap();

        assert!(service.add_permission(1, "fly", None).await);
        assert!(service.is_in_group(1, "mod").await);
    }

    // Test: A missing authorization document aborts startup
    #[tokio::test]
    async fn test_missing_config_is_fatal() {
        let settings = settings_for(std::path::Path::new("/nonexistent/permissions.json"));
        let result = start(&settings).await;
        assert!(matches!(result, Err(StartupError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let file = document_file();
        let mut settings = settings_for(file.path());
        settings.storage.backend = "rocks".to_string();
        let result = start(&settings).await;
        assert!(matches!(result, Err(StartupError::Settings(_))));
    }

    // Test: Schema failure is fatal, sweep failure is not
    #[tokio::test]
    async fn test_schema_failure_is_fatal_sweep_failure_is_not() {
        let config = AuthConfig::from_json_str(DOCUMENT).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store = Arc::new(FailingStore::new());
        store.fail_schema(true).await;
        let result = start_with_store(config.clone(), store, Arc::clone(&clock)).await;
        assert!(matches!(result, Err(StartupError::Storage(_))));

        let store = Arc::new(FailingStore::new());
        store.fail_sweep(true).await;
        let service = start_with_store(config, store, clock).await.unwrap();
        assert!(service.set_permission(1, "kill", None).await);
    }

    // Test: Startup sweep removes rows that expired while offline
    #[tokio::test]
    async fn test_startup_sweeps_expired_rows() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(t0);
        let store = Arc::new(MemoryPermissionStore::with_clock(Arc::new(clock.clone())));
        store
            .upsert(1, "fly", Some(t0 + Duration::minutes(1)))
            .await
            .unwrap();
        store.upsert(1, "kill", None).await.unwrap();

        clock.advance(Duration::minutes(2));
        let config = AuthConfig::from_json_str(DOCUMENT).unwrap();
        start_with_store(config, store.clone(), Arc::new(clock))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get_grant(1, "fly").await.unwrap().is_none());
    }

    // Test: SQLite grants survive a restart
    #[tokio::test]
    async fn test_sqlite_backend_persists_across_restarts() {
        let file = document_file();
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(file.path());
        settings.storage.backend = "sqlite".to_string();
        settings.storage.database_url =
            Some(format!("sqlite://{}", dir.path().join("rsperm.db").display()));

        let service = start(&settings).await.unwrap();
        assert!(service.add_permission(7, "kill", None).await);
        drop(service);

        let service = start(&settings).await.unwrap();
        assert!(service.has_permission(7, "kill").await);
    }
}
