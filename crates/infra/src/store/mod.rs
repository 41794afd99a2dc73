//! Persistence abstractions for users, the module catalog and entitlement
//! records.
//!
//! Every mutating method is a single self-contained operation: implementations
//! must apply it atomically with respect to other calls on the same store
//! (one write guard in memory, one statement or one transaction in Postgres).
//! Services compose these calls and never hold a store-level lock across them.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use modgate_auth::User;
use modgate_catalog::{Module, ModulePatch};
use modgate_core::{Category, ModuleId, RecordId, UserId};
use modgate_entitlements::{EntitlementError, EntitlementRecord, MigrationMode, ModuleSet, NewRecord};

pub use in_memory::{InMemoryEntitlementStore, InMemoryModuleCatalog, InMemoryUserDirectory};
pub use postgres::{PostgresEntitlementStore, PostgresModuleCatalog, PostgresUserDirectory, ensure_schema};

/// Store operation error.
///
/// These are infrastructure failures. Business outcomes such as "not found" are
/// expressed through `Option`/`bool` return values instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable, pool closed or lock poisoned.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// A stored row could not be turned back into a domain value.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// The store refused the input (e.g. an unsafe icon path).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<StoreError> for EntitlementError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Rejected(msg) => EntitlementError::Validation(msg),
            other => EntitlementError::PersistenceFailure(other.to_string()),
        }
    }
}

/// Counts reported by a multi-record update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCounts {
    /// Records selected by the filter.
    pub matched: u64,
    /// Records whose contents actually changed.
    pub modified: u64,
}

/// Result of an upsert into the records of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub record_id: RecordId,
    pub created: bool,
    /// `true` when an existing record's contents changed.
    pub modified: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn insert(&self, user: User) -> Result<(), StoreError>;

    /// Overwrite the user's category label. Returns `false` if the user is gone.
    async fn set_category(&self, id: UserId, category: &Category) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ModuleCatalogStore: Send + Sync {
    async fn insert(&self, module: Module) -> Result<(), StoreError>;

    async fn get(&self, id: ModuleId) -> Result<Option<Module>, StoreError>;

    /// All modules, ascending by display order then creation time.
    async fn list(&self) -> Result<Vec<Module>, StoreError>;

    /// Apply a patch in place and return the updated module.
    async fn apply_patch(
        &self,
        id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError>;

    /// Remove a module, returning what was removed.
    async fn delete(&self, id: ModuleId) -> Result<Option<Module>, StoreError>;

    /// Look up names for the given ids. Unknown ids are absent from the result.
    async fn names(&self, ids: &[ModuleId]) -> Result<Vec<(ModuleId, String)>, StoreError>;
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn insert(&self, record: EntitlementRecord) -> Result<(), StoreError>;

    async fn get(&self, id: RecordId) -> Result<Option<EntitlementRecord>, StoreError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<EntitlementRecord>, StoreError>;

    /// Full replacement of a record's contents; `created_at` is kept.
    async fn replace(&self, id: RecordId, new: NewRecord) -> Result<Option<EntitlementRecord>, StoreError>;

    async fn delete(&self, id: RecordId) -> Result<bool, StoreError>;

    /// Oldest record containing the user, optionally restricted to one category.
    async fn first_record_containing(
        &self,
        user_id: UserId,
        category: Option<&Category>,
    ) -> Result<Option<EntitlementRecord>, StoreError>;

    /// Every record containing the user, oldest first.
    async fn records_containing(&self, user_id: UserId) -> Result<Vec<EntitlementRecord>, StoreError>;

    /// Write `new` only if the record's module set still equals `expected`.
    ///
    /// Returns `false` when the record is gone or its module set changed.
    async fn compare_and_set_modules(
        &self,
        id: RecordId,
        expected: &ModuleSet,
        new: &ModuleSet,
    ) -> Result<bool, StoreError>;

    /// Add-to-set `modules` on the oldest record of `category` containing the
    /// user, or insert a per-user record when there is none.
    async fn upsert_grant(
        &self,
        category: &Category,
        user_id: UserId,
        modules: &ModuleSet,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Add-to-set `modules` on every record whose user set intersects `users`.
    async fn add_modules_for_users(&self, users: &[UserId], modules: &[ModuleId]) -> Result<UpdateCounts, StoreError>;

    /// Pull `modules` from every record whose user set intersects `users`.
    async fn pull_modules_for_users(&self, users: &[UserId], modules: &[ModuleId]) -> Result<UpdateCounts, StoreError>;

    /// Remove the user from every record whose category differs from `keep`.
    /// Returns the number of records touched.
    async fn pull_user_outside_category(&self, user_id: UserId, keep: &Category) -> Result<u64, StoreError>;

    /// Make sure a record of `category` contains the user.
    ///
    /// Only a record of the category that already contains the user is
    /// reused; otherwise a new record holding just the user and `modules` is
    /// created. Records of other users are never joined. With
    /// [`MigrationMode::Replace`] the user ends up with exactly `modules`: a
    /// record they own alone is overwritten, a shared one is left and a new
    /// record is created.
    async fn attach_user_to_category(
        &self,
        user_id: UserId,
        category: &Category,
        modules: &ModuleSet,
        mode: MigrationMode,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;
}
