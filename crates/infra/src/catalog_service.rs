//! Module catalog operations.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use modgate_catalog::{Module, ModulePatch, NewModule};
use modgate_core::ModuleId;
use modgate_entitlements::{EntitlementError, EntitlementResult};

use crate::icons::IconStorage;
use crate::store::ModuleCatalogStore;

#[derive(Clone)]
pub struct CatalogService {
    modules: Arc<dyn ModuleCatalogStore>,
    icons: Arc<dyn IconStorage>,
}

impl CatalogService {
    pub fn new(modules: Arc<dyn ModuleCatalogStore>, icons: Arc<dyn IconStorage>) -> Self {
        Self { modules, icons }
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    pub async fn create(&self, input: NewModule) -> EntitlementResult<Module> {
        let module = input.into_module(ModuleId::new(), Utc::now())?;
        self.modules.insert(module.clone()).await?;
        tracing::info!(module_id = %module.id, "module created");
        Ok(module)
    }

    /// All modules, ascending by display order.
    pub async fn list(&self) -> EntitlementResult<Vec<Module>> {
        Ok(self.modules.list().await?)
    }

    pub async fn get(&self, id: ModuleId) -> EntitlementResult<Module> {
        self.modules
            .get(id)
            .await?
            .ok_or(EntitlementError::ModuleNotFound(id))
    }

    #[instrument(skip(self, patch), fields(module_id = %id), err)]
    pub async fn update(&self, id: ModuleId, patch: ModulePatch) -> EntitlementResult<Module> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(EntitlementError::Validation("module name must not be empty".to_string()));
        }
        if patch.is_empty() {
            return self.get(id).await;
        }

        let module = self
            .modules
            .apply_patch(id, &patch, Utc::now())
            .await?
            .ok_or(EntitlementError::ModuleNotFound(id))?;
        tracing::info!(module_id = %id, "module updated");
        Ok(module)
    }

    /// Remove a module, then its icon asset. A failed icon removal is logged and
    /// does not fail the delete.
    #[instrument(skip(self), fields(module_id = %id), err)]
    pub async fn delete(&self, id: ModuleId) -> EntitlementResult<()> {
        let removed = self
            .modules
            .delete(id)
            .await?
            .ok_or(EntitlementError::ModuleNotFound(id))?;

        if let Some(icon) = removed.icon.as_deref() {
            if let Err(e) = self.icons.remove(icon).await {
                tracing::warn!(module_id = %id, icon, error = %e, "failed to remove module icon");
            }
        }

        tracing::info!(module_id = %id, "module deleted");
        Ok(())
    }
}
