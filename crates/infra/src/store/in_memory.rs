//! In-memory stores for tests/dev.
//!
//! Each store keeps its collection behind one `RwLock`; every trait method runs
//! under a single guard, which gives the same per-call atomicity the Postgres
//! adapters get from single statements.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use modgate_auth::User;
use modgate_catalog::{Module, ModulePatch};
use modgate_core::{Category, Entity, ModuleId, RecordId, UserId};
use modgate_entitlements::{EntitlementRecord, MigrationMode, ModuleSet, NewRecord};

use super::{EntitlementStore, ModuleCatalogStore, StoreError, UpdateCounts, UpsertOutcome, UserDirectory};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

/// Insert under the entity's own id; an id already present is a duplicate.
fn insert_new<E>(map: &mut HashMap<E::Id, E>, entity: E, kind: &str) -> Result<(), StoreError>
where
    E: Entity,
    E::Id: core::fmt::Display,
{
    let id = entity.id().clone();
    if map.contains_key(&id) {
        return Err(StoreError::Duplicate(format!("{kind} {id}")));
    }
    map.insert(id, entity);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    inner: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(read(&self.inner)?.get(&id).cloned())
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        let mut map = write(&self.inner)?;
        if map.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate(format!("username '{}'", user.username)));
        }
        insert_new(&mut *map, user, "user")
    }

    async fn set_category(&self, id: UserId, category: &Category) -> Result<bool, StoreError> {
        let mut map = write(&self.inner)?;
        match map.get_mut(&id) {
            Some(user) => {
                user.category = category.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module catalog
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryModuleCatalog {
    inner: RwLock<HashMap<ModuleId, Module>>,
}

impl InMemoryModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModuleCatalogStore for InMemoryModuleCatalog {
    async fn insert(&self, module: Module) -> Result<(), StoreError> {
        let mut map = write(&self.inner)?;
        insert_new(&mut *map, module, "module")
    }

    async fn get(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        Ok(read(&self.inner)?.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Module>, StoreError> {
        let mut modules: Vec<Module> = read(&self.inner)?.values().cloned().collect();
        modules.sort_by(|a, b| (a.order, a.created_at, a.id).cmp(&(b.order, b.created_at, b.id)));
        Ok(modules)
    }

    async fn apply_patch(
        &self,
        id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        let mut map = write(&self.inner)?;
        let Some(current) = map.get_mut(&id) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        updated
            .apply_patch(patch.clone(), now)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        *current = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        Ok(write(&self.inner)?.remove(&id))
    }

    async fn names(&self, ids: &[ModuleId]) -> Result<Vec<(ModuleId, String)>, StoreError> {
        let map = read(&self.inner)?;
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id).map(|m| (*id, m.name.clone())))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entitlement records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    inner: RwLock<HashMap<RecordId, EntitlementRecord>>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Oldest record satisfying `pred`.
fn oldest_mut<'a>(
    map: &'a mut HashMap<RecordId, EntitlementRecord>,
    pred: impl Fn(&EntitlementRecord) -> bool,
) -> Option<&'a mut EntitlementRecord> {
    map.values_mut()
        .filter(|r| pred(r))
        .min_by_key(|r| (r.created_at, r.id))
}

fn oldest_first(mut records: Vec<EntitlementRecord>) -> Vec<EntitlementRecord> {
    records.sort_by_key(|r| (r.created_at, r.id));
    records
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn insert(&self, record: EntitlementRecord) -> Result<(), StoreError> {
        let mut map = write(&self.inner)?;
        insert_new(&mut *map, record, "record")
    }

    async fn get(&self, id: RecordId) -> Result<Option<EntitlementRecord>, StoreError> {
        Ok(read(&self.inner)?.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<EntitlementRecord>, StoreError> {
        Ok(oldest_first(read(&self.inner)?.values().cloned().collect()))
    }

    async fn replace(&self, id: RecordId, new: NewRecord) -> Result<Option<EntitlementRecord>, StoreError> {
        let mut map = write(&self.inner)?;
        Ok(map.get_mut(&id).map(|record| {
            record.replace_contents(new);
            record.clone()
        }))
    }

    async fn delete(&self, id: RecordId) -> Result<bool, StoreError> {
        Ok(write(&self.inner)?.remove(&id).is_some())
    }

    async fn first_record_containing(
        &self,
        user_id: UserId,
        category: Option<&Category>,
    ) -> Result<Option<EntitlementRecord>, StoreError> {
        let map = read(&self.inner)?;
        Ok(map
            .values()
            .filter(|r| r.contains_user(&user_id))
            .filter(|r| category.is_none_or(|c| r.category == *c))
            .min_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn records_containing(&self, user_id: UserId) -> Result<Vec<EntitlementRecord>, StoreError> {
        let map = read(&self.inner)?;
        Ok(oldest_first(
            map.values().filter(|r| r.contains_user(&user_id)).cloned().collect(),
        ))
    }

    async fn compare_and_set_modules(
        &self,
        id: RecordId,
        expected: &ModuleSet,
        new: &ModuleSet,
    ) -> Result<bool, StoreError> {
        let mut map = write(&self.inner)?;
        match map.get_mut(&id) {
            Some(record) if record.module_ids == *expected => {
                record.module_ids = new.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_grant(
        &self,
        category: &Category,
        user_id: UserId,
        modules: &ModuleSet,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut map = write(&self.inner)?;
        if let Some(record) = oldest_mut(&mut map, |r| r.category == *category && r.contains_user(&user_id)) {
            let added = record.module_ids.extend_unique(modules.iter().copied());
            return Ok(UpsertOutcome {
                record_id: record.id,
                created: false,
                modified: added > 0,
            });
        }

        let record = EntitlementRecord::custom_for_user(RecordId::new(), category.clone(), user_id, modules.clone(), now);
        let record_id = record.id;
        map.insert(record_id, record);
        Ok(UpsertOutcome {
            record_id,
            created: true,
            modified: false,
        })
    }

    async fn add_modules_for_users(&self, users: &[UserId], modules: &[ModuleId]) -> Result<UpdateCounts, StoreError> {
        let mut map = write(&self.inner)?;
        let mut counts = UpdateCounts::default();
        for record in map.values_mut().filter(|r| r.user_ids.intersects(users)) {
            counts.matched += 1;
            if record.module_ids.extend_unique(modules.iter().copied()) > 0 {
                counts.modified += 1;
            }
        }
        Ok(counts)
    }

    async fn pull_modules_for_users(&self, users: &[UserId], modules: &[ModuleId]) -> Result<UpdateCounts, StoreError> {
        let mut map = write(&self.inner)?;
        let mut counts = UpdateCounts::default();
        for record in map.values_mut().filter(|r| r.user_ids.intersects(users)) {
            counts.matched += 1;
            if record.module_ids.remove_all(modules) > 0 {
                counts.modified += 1;
            }
        }
        Ok(counts)
    }

    async fn pull_user_outside_category(&self, user_id: UserId, keep: &Category) -> Result<u64, StoreError> {
        let mut map = write(&self.inner)?;
        let mut touched = 0;
        for record in map.values_mut().filter(|r| r.category != *keep) {
            if record.user_ids.remove(&user_id) {
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn attach_user_to_category(
        &self,
        user_id: UserId,
        category: &Category,
        modules: &ModuleSet,
        mode: MigrationMode,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut map = write(&self.inner)?;
        if let Some(record) = oldest_mut(&mut map, |r| r.category == *category && r.contains_user(&user_id)) {
            match mode {
                MigrationMode::Merge => {
                    return Ok(UpsertOutcome {
                        record_id: record.id,
                        created: false,
                        modified: false,
                    });
                }
                MigrationMode::Replace if record.is_exclusive_to(&user_id) => {
                    let modified = record.module_ids != *modules;
                    record.module_ids = modules.clone();
                    return Ok(UpsertOutcome {
                        record_id: record.id,
                        created: false,
                        modified,
                    });
                }
                // Shared record: the user leaves it and gets their own below.
                MigrationMode::Replace => {
                    record.user_ids.remove(&user_id);
                }
            }
        }

        let record = NewRecord {
            category: category.clone(),
            user_ids: vec![user_id].into(),
            module_ids: modules.clone(),
            note: None,
        }
        .into_record(RecordId::new(), now);
        let record_id = record.id;
        map.insert(record_id, record);
        Ok(UpsertOutcome {
            record_id,
            created: true,
            modified: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cat(s: &str) -> Category {
        Category::new(s).unwrap()
    }

    fn record(category: &str, users: Vec<UserId>, modules: Vec<ModuleId>, at: DateTime<Utc>) -> EntitlementRecord {
        NewRecord {
            category: cat(category),
            user_ids: users.into(),
            module_ids: modules.into(),
            note: None,
        }
        .into_record(RecordId::new(), at)
    }

    #[tokio::test]
    async fn first_record_containing_prefers_oldest() {
        let store = InMemoryEntitlementStore::new();
        let u = UserId::new();
        let t0 = Utc::now();
        let newer = record("dosen", vec![u], vec![], t0 + Duration::seconds(5));
        let older = record("dosen", vec![u], vec![], t0);
        store.insert(newer).await.unwrap();
        store.insert(older.clone()).await.unwrap();

        let found = store.first_record_containing(u, None).await.unwrap().unwrap();
        assert_eq!(found.id, older.id);
        assert!(store.first_record_containing(u, Some(&cat("staff"))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inserting_an_existing_id_is_a_duplicate() {
        let store = InMemoryEntitlementStore::new();
        let rec = record("dosen", vec![UserId::new()], vec![], Utc::now());
        store.insert(rec.clone()).await.unwrap();

        let err = store.insert(rec.clone()).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate(format!("record {}", rec.id)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let store = InMemoryEntitlementStore::new();
        let m1 = ModuleId::new();
        let rec = record("dosen", vec![UserId::new()], vec![m1], Utc::now());
        store.insert(rec.clone()).await.unwrap();

        let stale = ModuleSet::new();
        let new = ModuleSet::from(vec![m1, ModuleId::new()]);
        assert!(!store.compare_and_set_modules(rec.id, &stale, &new).await.unwrap());
        assert!(store.compare_and_set_modules(rec.id, &rec.module_ids, &new).await.unwrap());
        assert_eq!(store.get(rec.id).await.unwrap().unwrap().module_ids, new);
    }

    #[tokio::test]
    async fn upsert_grant_creates_then_merges() {
        let store = InMemoryEntitlementStore::new();
        let u = UserId::new();
        let (m1, m2) = (ModuleId::new(), ModuleId::new());

        let first = store
            .upsert_grant(&cat("mahasiswa"), u, &vec![m1].into(), Utc::now())
            .await
            .unwrap();
        assert!(first.created);

        let second = store
            .upsert_grant(&cat("mahasiswa"), u, &vec![m1, m2].into(), Utc::now())
            .await
            .unwrap();
        assert!(!second.created);
        assert!(second.modified);
        assert_eq!(second.record_id, first.record_id);

        let rec = store.get(first.record_id).await.unwrap().unwrap();
        assert_eq!(rec.module_ids.as_slice(), &[m1, m2]);
        assert_eq!(rec.note.as_deref(), Some(modgate_entitlements::CUSTOM_ASSIGNMENT_NOTE));
    }

    #[tokio::test]
    async fn pull_user_outside_category_keeps_target_category() {
        let store = InMemoryEntitlementStore::new();
        let u = UserId::new();
        let a = record("mahasiswa", vec![u], vec![], Utc::now());
        let b = record("alumni", vec![u, UserId::new()], vec![], Utc::now());
        let c = record("dosen", vec![u], vec![], Utc::now());
        for r in [a.clone(), b.clone(), c.clone()] {
            store.insert(r).await.unwrap();
        }

        let touched = store.pull_user_outside_category(u, &cat("dosen")).await.unwrap();
        assert_eq!(touched, 2);
        assert!(!store.get(a.id).await.unwrap().unwrap().contains_user(&u));
        assert!(!store.get(b.id).await.unwrap().unwrap().contains_user(&u));
        assert!(store.get(c.id).await.unwrap().unwrap().contains_user(&u));
    }

    #[tokio::test]
    async fn attach_never_joins_another_users_record() {
        let store = InMemoryEntitlementStore::new();
        let (u, other) = (UserId::new(), UserId::new());
        let (mx, m2) = (ModuleId::new(), ModuleId::new());
        let personal = EntitlementRecord::custom_for_user(RecordId::new(), cat("dosen"), other, vec![mx].into(), Utc::now());
        let shared = record("dosen", vec![other, UserId::new()], vec![mx], Utc::now());
        store.insert(personal.clone()).await.unwrap();
        store.insert(shared.clone()).await.unwrap();

        let attached = store
            .attach_user_to_category(u, &cat("dosen"), &vec![m2].into(), MigrationMode::Merge, Utc::now())
            .await
            .unwrap();
        assert!(attached.created);
        assert_ne!(attached.record_id, personal.id);
        assert_ne!(attached.record_id, shared.id);

        let rec = store.get(attached.record_id).await.unwrap().unwrap();
        assert_eq!(rec.user_ids.as_slice(), &[u]);
        assert_eq!(rec.module_ids.as_slice(), &[m2]);
        assert_eq!(store.get(personal.id).await.unwrap().unwrap(), personal);
        assert_eq!(store.get(shared.id).await.unwrap().unwrap(), shared);
    }

    #[tokio::test]
    async fn replace_splits_user_out_of_shared_record() {
        let store = InMemoryEntitlementStore::new();
        let (u, other) = (UserId::new(), UserId::new());
        let (m1, m2) = (ModuleId::new(), ModuleId::new());
        let shared = record("dosen", vec![u, other], vec![m1], Utc::now());
        store.insert(shared.clone()).await.unwrap();

        let merged = store
            .attach_user_to_category(u, &cat("dosen"), &vec![m2].into(), MigrationMode::Merge, Utc::now())
            .await
            .unwrap();
        assert_eq!(merged.record_id, shared.id);
        assert!(!merged.modified);

        let replaced = store
            .attach_user_to_category(u, &cat("dosen"), &vec![m2].into(), MigrationMode::Replace, Utc::now())
            .await
            .unwrap();
        assert!(replaced.created);

        let left = store.get(shared.id).await.unwrap().unwrap();
        assert_eq!(left.user_ids.as_slice(), &[other]);
        assert_eq!(left.module_ids.as_slice(), &[m1]);
        let own = store.get(replaced.record_id).await.unwrap().unwrap();
        assert_eq!(own.user_ids.as_slice(), &[u]);
        assert_eq!(own.module_ids.as_slice(), &[m2]);
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let dir = InMemoryUserDirectory::new();
        let user = modgate_auth::NewUser {
            username: "budi".to_string(),
            display_name: "Budi".to_string(),
            credential_hash: String::new(),
            email: "budi@example.ac.id".to_string(),
            phone: String::new(),
            gender: 1,
            photo: None,
            category: cat("mahasiswa"),
            role: modgate_auth::Role::new("civitas"),
        };
        dir.insert(user.clone().into_user(UserId::new(), Utc::now()).unwrap())
            .await
            .unwrap();
        let err = dir
            .insert(user.into_user(UserId::new(), Utc::now()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }
}
