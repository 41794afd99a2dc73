//! Bulk grant vocabulary and name-resolution output.

use core::str::FromStr;

use serde::Serialize;

use modgate_core::UserId;

use crate::EntitlementError;

/// Action selector for the bulk grant endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    /// Give each user the modules, creating a per-user record if needed.
    Create,
    /// Add the modules to every record containing any of the users.
    Update,
    /// Pull the modules from every record containing any of the users.
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for BulkAction {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(EntitlementError::InvalidAction(s.to_string())),
        }
    }
}

impl core::fmt::Display for BulkAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts reported by a bulk grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub action: BulkAction,
    pub records_matched: u64,
    pub records_modified: u64,
    pub records_created: u64,
}

impl BulkOutcome {
    pub fn empty(action: BulkAction) -> Self {
        Self {
            action,
            records_matched: 0,
            records_modified: 0,
            records_created: 0,
        }
    }
}

/// Names of every module a user can reach, de-duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleNames {
    pub user_id: UserId,
    pub modules: Vec<String>,
    pub total_count: usize,
}

impl ModuleNames {
    pub fn new(user_id: UserId, modules: Vec<String>) -> Self {
        let total_count = modules.len();
        Self {
            user_id,
            modules,
            total_count,
        }
    }
}
