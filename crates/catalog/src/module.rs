use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modgate_core::{DomainError, Entity, ModuleId};

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    /// Menu target / route the module opens.
    pub path: String,
    pub active: bool,
    /// Display order (`urutan`); lists are sorted ascending on this.
    pub order: i32,
    /// Reference to the icon asset in icon storage.
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Module {
    type Id = ModuleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Module {
    /// Apply a partial update. Absent fields are left untouched.
    pub fn apply_patch(&mut self, patch: ModulePatch, now: DateTime<Utc>) -> Result<(), DomainError> {
        if let Some(name) = patch.name {
            self.name = validate_name(&name)?;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(path) = patch.path {
            self.path = path;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
        if let Some(icon) = patch.icon {
            self.icon = Some(icon).filter(|i| !i.trim().is_empty());
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Input for creating a module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewModule {
    #[serde(alias = "nm_modul")]
    pub name: String,
    #[serde(default, alias = "ket_modul")]
    pub description: String,
    #[serde(default, alias = "alamat")]
    pub path: String,
    #[serde(default, alias = "is_aktif")]
    pub active: bool,
    #[serde(default, alias = "urutan")]
    pub order: i32,
    #[serde(default, alias = "gbr_icon")]
    pub icon: Option<String>,
}

impl NewModule {
    pub fn into_module(self, id: ModuleId, now: DateTime<Utc>) -> Result<Module, DomainError> {
        Ok(Module {
            id,
            name: validate_name(&self.name)?,
            description: self.description,
            path: self.path,
            active: self.active,
            order: self.order,
            icon: self.icon.filter(|i| !i.trim().is_empty()),
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update for a module.
///
/// This is the complete list of updatable fields; unknown keys are rejected at
/// deserialization time rather than being written through to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModulePatch {
    #[serde(default, alias = "nm_modul")]
    pub name: Option<String>,
    #[serde(default, alias = "ket_modul")]
    pub description: Option<String>,
    #[serde(default, alias = "alamat")]
    pub path: Option<String>,
    #[serde(default, alias = "is_aktif")]
    pub active: Option<bool>,
    #[serde(default, alias = "urutan")]
    pub order: Option<i32>,
    /// A new icon reference. An empty string clears the icon.
    #[serde(default, alias = "gbr_icon")]
    pub icon: Option<String>,
}

impl ModulePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn validate_name(name: &str) -> Result<String, DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("module name must not be empty"));
    }
    Ok(trimmed.to_string())
}
