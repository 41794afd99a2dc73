//! Entitlement protocol: singular grants, bulk grants, record maintenance,
//! name resolution and category migration.
//!
//! ## Write paths
//!
//! - **Singular** (`assign` / `revoke` / `replace`): read the oldest record
//!   containing the user, edit its module set locally, then write it back with
//!   [`EntitlementStore::compare_and_set_modules`]. A concurrent writer makes
//!   the swap fail; the operation re-reads and retries a bounded number of
//!   times before reporting [`EntitlementError::ConcurrentModification`].
//! - **Bulk** (`bulk_manage`): every id is validated up front, then each
//!   action maps onto store operators that are atomic per call.
//! - **Migration**: three store calls in phase order. There is no rollback; a
//!   failure after the first phase is reported as
//!   [`EntitlementError::PartialMigration`] naming the last committed phase.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use modgate_core::{Category, ModuleId, RecordId, UserId, parse_ids};
use modgate_entitlements::{
    BulkAction, BulkOutcome, EntitlementError, EntitlementRecord, EntitlementResult, MigrationMode,
    MigrationPhase, MigrationReport, ModuleNames, ModuleSet, NewRecord, UserSet,
};

use crate::store::{EntitlementStore, ModuleCatalogStore, UserDirectory};

/// Attempts for one compare-and-set edit before giving up.
pub const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct EntitlementService {
    users: Arc<dyn UserDirectory>,
    modules: Arc<dyn ModuleCatalogStore>,
    records: Arc<dyn EntitlementStore>,
}

impl EntitlementService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        modules: Arc<dyn ModuleCatalogStore>,
        records: Arc<dyn EntitlementStore>,
    ) -> Self {
        Self { users, modules, records }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Singular grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant one module to a user through the oldest record of the user's
    /// category that contains them. Granting a module twice is an error.
    #[instrument(skip(self), fields(user_id = %user_id, module_id = %module_id), err)]
    pub async fn assign(&self, user_id: UserId, module_id: ModuleId) -> EntitlementResult<EntitlementRecord> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or(EntitlementError::UserNotFound(user_id))?;

        let record = self
            .edit_modules(user_id, Some(&user.category), |modules| {
                if modules.insert(module_id) {
                    Ok(())
                } else {
                    Err(EntitlementError::AlreadyGranted { user_id, module_id })
                }
            })
            .await?;

        tracing::info!(record_id = %record.id, "module assigned");
        Ok(record)
    }

    #[instrument(skip(self), fields(user_id = %user_id, module_id = %module_id), err)]
    pub async fn revoke(&self, user_id: UserId, module_id: ModuleId) -> EntitlementResult<EntitlementRecord> {
        let record = self
            .edit_modules(user_id, None, |modules| {
                if modules.remove(&module_id) {
                    Ok(())
                } else {
                    Err(EntitlementError::ModuleNotGranted { user_id, module_id })
                }
            })
            .await?;

        tracing::info!(record_id = %record.id, "module revoked");
        Ok(record)
    }

    /// Swap `old` for `new` at the same position. If `new` was already granted
    /// elsewhere in the set, that copy is dropped.
    #[instrument(skip(self), fields(user_id = %user_id, old = %old, new = %new), err)]
    pub async fn replace(&self, user_id: UserId, old: ModuleId, new: ModuleId) -> EntitlementResult<EntitlementRecord> {
        let record = self
            .edit_modules(user_id, None, |modules| {
                if modules.replace(&old, new) {
                    Ok(())
                } else {
                    Err(EntitlementError::ModuleNotGranted {
                        user_id,
                        module_id: old,
                    })
                }
            })
            .await?;

        tracing::info!(record_id = %record.id, "module replaced");
        Ok(record)
    }

    async fn edit_modules<F>(
        &self,
        user_id: UserId,
        category: Option<&Category>,
        edit: F,
    ) -> EntitlementResult<EntitlementRecord>
    where
        F: Fn(&mut ModuleSet) -> EntitlementResult<()> + Send + Sync,
    {
        let mut last_record = None;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut record = self
                .records
                .first_record_containing(user_id, category)
                .await?
                .ok_or_else(|| EntitlementError::record_not_found(format!("no record contains user {user_id}")))?;

            let expected = record.module_ids.clone();
            edit(&mut record.module_ids)?;

            if self
                .records
                .compare_and_set_modules(record.id, &expected, &record.module_ids)
                .await?
            {
                return Ok(record);
            }

            tracing::debug!(attempt, record_id = %record.id, "module set changed concurrently; retrying");
            last_record = Some(record.id);
        }

        Err(EntitlementError::ConcurrentModification(
            last_record.unwrap_or_default(),
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one bulk action. The action and every identifier are validated
    /// before anything is written.
    #[instrument(skip(self, user_ids, module_ids), fields(users = user_ids.len(), modules = module_ids.len()), err)]
    pub async fn bulk_manage<S>(&self, user_ids: &[S], module_ids: &[S], action: &str) -> EntitlementResult<BulkOutcome>
    where
        S: AsRef<str> + Sync,
    {
        let action: BulkAction = action.parse()?;
        let users: UserSet = parse_ids::<UserId, _>(user_ids)?.into();
        let modules: ModuleSet = parse_ids::<ModuleId, _>(module_ids)?.into();
        if users.is_empty() {
            return Err(EntitlementError::Validation("user_ids must not be empty".to_string()));
        }
        if modules.is_empty() {
            return Err(EntitlementError::Validation("modul_ids must not be empty".to_string()));
        }

        let outcome = match action {
            BulkAction::Create => self.bulk_create(&users, &modules).await?,
            BulkAction::Update => {
                let counts = self
                    .records
                    .add_modules_for_users(users.as_slice(), modules.as_slice())
                    .await?;
                BulkOutcome {
                    records_matched: counts.matched,
                    records_modified: counts.modified,
                    ..BulkOutcome::empty(action)
                }
            }
            BulkAction::Delete => {
                let counts = self
                    .records
                    .pull_modules_for_users(users.as_slice(), modules.as_slice())
                    .await?;
                BulkOutcome {
                    records_matched: counts.matched,
                    records_modified: counts.modified,
                    ..BulkOutcome::empty(action)
                }
            }
        };

        tracing::info!(
            action = %action,
            matched = outcome.records_matched,
            modified = outcome.records_modified,
            created = outcome.records_created,
            "bulk grant applied"
        );
        Ok(outcome)
    }

    /// Upsert per user. Every user is resolved first, so an unknown user
    /// fails the call before anything is written.
    async fn bulk_create(&self, users: &UserSet, modules: &ModuleSet) -> EntitlementResult<BulkOutcome> {
        let mut resolved = Vec::with_capacity(users.len());
        for user_id in users.iter() {
            let user = self
                .users
                .get(*user_id)
                .await?
                .ok_or(EntitlementError::UserNotFound(*user_id))?;
            resolved.push(user);
        }

        let mut outcome = BulkOutcome::empty(BulkAction::Create);
        let now = Utc::now();
        for user in &resolved {
            let upsert = self
                .records
                .upsert_grant(&user.category, user.id, modules, now)
                .await?;
            if upsert.created {
                outcome.records_created += 1;
            } else {
                outcome.records_matched += 1;
                if upsert.modified {
                    outcome.records_modified += 1;
                }
            }
        }

        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, new), fields(category = %new.category), err)]
    pub async fn create_record(&self, new: NewRecord) -> EntitlementResult<EntitlementRecord> {
        let record = new.into_record(RecordId::new(), Utc::now());
        self.records.insert(record.clone()).await?;
        tracing::info!(record_id = %record.id, "entitlement record created");
        Ok(record)
    }

    pub async fn list_records(&self) -> EntitlementResult<Vec<EntitlementRecord>> {
        Ok(self.records.list().await?)
    }

    pub async fn get_record(&self, id: RecordId) -> EntitlementResult<EntitlementRecord> {
        self.records
            .get(id)
            .await?
            .ok_or_else(|| EntitlementError::record_not_found(id))
    }

    #[instrument(skip(self, new), fields(record_id = %id), err)]
    pub async fn replace_record(&self, id: RecordId, new: NewRecord) -> EntitlementResult<EntitlementRecord> {
        let record = self
            .records
            .replace(id, new)
            .await?
            .ok_or_else(|| EntitlementError::record_not_found(id))?;
        tracing::info!(record_id = %id, "entitlement record replaced");
        Ok(record)
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    pub async fn delete_record(&self, id: RecordId) -> EntitlementResult<()> {
        if !self.records.delete(id).await? {
            return Err(EntitlementError::record_not_found(id));
        }
        tracing::info!(record_id = %id, "entitlement record deleted");
        Ok(())
    }

    /// Names of every module reachable by the user across all records that
    /// contain them. Ids with no catalog entry are skipped.
    pub async fn module_names_for_user(&self, user_id: UserId) -> EntitlementResult<ModuleNames> {
        let records = self.records.records_containing(user_id).await?;
        if records.is_empty() {
            return Err(EntitlementError::record_not_found(format!(
                "no record contains user {user_id}"
            )));
        }

        let ids: ModuleSet = records
            .iter()
            .flat_map(|r| r.module_ids.iter().copied())
            .collect();
        let resolved = self.modules.names(ids.as_slice()).await?;
        if resolved.len() < ids.len() {
            tracing::debug!(
                user_id = %user_id,
                dangling = ids.len() - resolved.len(),
                "skipping module ids with no catalog entry"
            );
        }

        Ok(ModuleNames::new(
            user_id,
            resolved.into_iter().map(|(_, name)| name).collect(),
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Category migration
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a user to `new_category`. A target record created by the move is
    /// seeded with `new_module_ids`; an existing one keeps its modules.
    pub async fn migrate_category<S>(
        &self,
        user_id: &str,
        new_category: &str,
        new_module_ids: &[S],
    ) -> EntitlementResult<MigrationReport>
    where
        S: AsRef<str> + Sync,
    {
        self.migrate(user_id, new_category, new_module_ids, MigrationMode::Merge)
            .await
    }

    /// Like [`migrate_category`](Self::migrate_category), but the target
    /// record's module set is overwritten with `new_module_ids`.
    pub async fn migrate_category_replacing_modules<S>(
        &self,
        user_id: &str,
        new_category: &str,
        new_module_ids: &[S],
    ) -> EntitlementResult<MigrationReport>
    where
        S: AsRef<str> + Sync,
    {
        self.migrate(user_id, new_category, new_module_ids, MigrationMode::Replace)
            .await
    }

    #[instrument(skip(self, new_module_ids), fields(category = %new_category, mode = ?mode), err)]
    async fn migrate<S>(
        &self,
        user_id: &str,
        new_category: &str,
        new_module_ids: &[S],
        mode: MigrationMode,
    ) -> EntitlementResult<MigrationReport>
    where
        S: AsRef<str> + Sync,
    {
        let user_id: UserId = user_id.parse()?;
        let modules: ModuleSet = parse_ids::<ModuleId, _>(new_module_ids)?.into();
        let category = Category::new(new_category)?;

        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or(EntitlementError::UserNotFound(user_id))?;

        let detached_from = self
            .records
            .pull_user_outside_category(user_id, &category)
            .await?;

        let attached = self
            .records
            .attach_user_to_category(user_id, &category, &modules, mode, Utc::now())
            .await
            .map_err(|e| partial_migration(user_id, MigrationPhase::Detached, e))?;

        match self.users.set_category(user_id, &category).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(partial_migration(
                    user_id,
                    MigrationPhase::Attached,
                    "user disappeared before the category update",
                ));
            }
            Err(e) => return Err(partial_migration(user_id, MigrationPhase::Attached, e)),
        }

        tracing::info!(
            user_id = %user_id,
            from = %user.category,
            to = %category,
            detached_from,
            target_record_id = %attached.record_id,
            target_created = attached.created,
            "user migrated"
        );

        Ok(MigrationReport {
            user_id,
            previous_category: user.category,
            new_category: category,
            detached_from,
            target_record_id: attached.record_id,
            target_created: attached.created,
            mode,
        })
    }
}

fn partial_migration(user_id: UserId, completed: MigrationPhase, reason: impl core::fmt::Display) -> EntitlementError {
    let reason = reason.to_string();
    tracing::error!(
        user_id = %user_id,
        completed = %completed,
        reason = %reason,
        "category migration left partially applied"
    );
    EntitlementError::PartialMigration {
        user_id,
        completed,
        reason,
    }
}
