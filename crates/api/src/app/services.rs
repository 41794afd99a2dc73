//! Store and service construction.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use modgate_infra::{
    CatalogService, EntitlementService, FsIconStorage, IconStorage, InMemoryEntitlementStore, InMemoryModuleCatalog,
    InMemoryUserDirectory, PostgresEntitlementStore, PostgresModuleCatalog, PostgresUserDirectory, UserDirectory,
    ensure_schema,
};

use crate::config::ApiConfig;

/// Everything the handlers need, shared behind one `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: CatalogService,
    pub entitlements: EntitlementService,
    pub users: Arc<dyn UserDirectory>,
}

impl AppServices {
    /// Services over process-local stores. Nothing survives a restart.
    pub fn in_memory(icons: Arc<dyn IconStorage>) -> Self {
        let users: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
        let modules = Arc::new(InMemoryModuleCatalog::new());
        let records = Arc::new(InMemoryEntitlementStore::new());

        Self {
            catalog: CatalogService::new(modules.clone(), icons),
            entitlements: EntitlementService::new(users.clone(), modules, records),
            users,
        }
    }

    /// Services over Postgres. The schema is created if missing.
    pub async fn persistent(database_url: &str, icon_dir: &Path) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connecting to DATABASE_URL")?;
        ensure_schema(&pool).await.context("creating schema")?;

        let users: Arc<dyn UserDirectory> = Arc::new(PostgresUserDirectory::new(pool.clone()));
        let modules = Arc::new(PostgresModuleCatalog::new(pool.clone()));
        let records = Arc::new(PostgresEntitlementStore::new(pool));
        let icons = Arc::new(FsIconStorage::new(icon_dir));

        Ok(Self {
            catalog: CatalogService::new(modules.clone(), icons),
            entitlements: EntitlementService::new(users.clone(), modules, records),
            users,
        })
    }
}

pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    match config.database_url.as_deref() {
        Some(url) if config.use_persistent_stores => {
            tracing::info!("using postgres stores");
            AppServices::persistent(url, &config.icon_dir).await
        }
        _ => {
            tracing::info!(icon_dir = %config.icon_dir.display(), "using in-memory stores");
            Ok(AppServices::in_memory(Arc::new(FsIconStorage::new(&config.icon_dir))))
        }
    }
}
