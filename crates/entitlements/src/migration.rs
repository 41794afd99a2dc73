//! Category migration vocabulary.
//!
//! Moving a user to another category detaches them from other categories,
//! attaches them to the new one and then updates their category label. Each
//! step commits on its own; a failure after the first leaves earlier steps in
//! place and is reported with the last phase that completed.

use serde::Serialize;

use modgate_core::{Category, RecordId, UserId};

/// How the requested modules apply when the user already has a record in the
/// target category. A newly created target is always seeded with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// The existing record keeps its modules.
    #[default]
    Merge,
    /// The user ends up with exactly the requested modules. A shared record
    /// is left for a new one rather than overwritten.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// User removed from every record outside the target category.
    Detached,
    /// User present in a target-category record.
    Attached,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Attached => "attached",
        }
    }
}

impl core::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub user_id: UserId,
    pub previous_category: Category,
    pub new_category: Category,
    /// Number of records outside the target category the user was pulled from.
    pub detached_from: u64,
    pub target_record_id: RecordId,
    /// `true` when no target-category record existed and one was created.
    pub target_created: bool,
    pub mode: MigrationMode,
}
