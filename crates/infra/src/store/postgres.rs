//! Postgres-backed stores.
//!
//! Identifier sets are `uuid[]` columns whose element order is the insertion
//! order. Add-to-set and pull are expressed as single `UPDATE` statements so
//! each bulk operation is atomic per row without client-side read-modify-write.
//! Upserts run in a transaction holding `pg_advisory_xact_lock` keyed by
//! `(category, user)`, which serialises concurrent creators of the same
//! per-user record.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StoreError` |
//! |------------|---------------|--------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any | `Database` |
//! | PoolClosed / PoolTimedOut / Io | n/a | `Unavailable` |
//! | ColumnDecode / Decode | n/a | `Decode` |
//! | other | n/a | `Database` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, warn};
use uuid::Uuid;

use modgate_auth::{Role, User};
use modgate_catalog::{Module, ModulePatch};
use modgate_core::{Category, ModuleId, RecordId, UserId};
use modgate_entitlements::{EntitlementRecord, MigrationMode, ModuleSet, NewRecord};

use super::{EntitlementStore, ModuleCatalogStore, StoreError, UpdateCounts, UpsertOutcome, UserDirectory};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        credential_hash TEXT NOT NULL,
        email TEXT NOT NULL,
        phone TEXT NOT NULL DEFAULT '',
        gender SMALLINT NOT NULL,
        photo TEXT,
        category TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS modules (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        path TEXT NOT NULL DEFAULT '',
        active BOOLEAN NOT NULL DEFAULT FALSE,
        sort_order INTEGER NOT NULL DEFAULT 0,
        icon TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entitlement_records (
        id UUID PRIMARY KEY,
        category TEXT NOT NULL,
        user_ids UUID[] NOT NULL DEFAULT '{}',
        module_ids UUID[] NOT NULL DEFAULT '{}',
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS entitlement_records_user_ids_idx ON entitlement_records USING GIN (user_ids)",
    "CREATE INDEX IF NOT EXISTS entitlement_records_category_idx ON entitlement_records (category, created_at)",
];

/// Create tables and indexes if they do not exist yet. Safe to run on every start.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{}: {}", operation, err))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_err(what: &str, e: impl core::fmt::Display) -> StoreError {
    StoreError::Decode(format!("{what}: {e}"))
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

/// Decode every row, skipping (and logging) the ones that do not decode.
fn decode_lenient<T>(rows: Vec<PgRow>, what: &str, decode: fn(&PgRow) -> Result<T, StoreError>) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, kind = what, "skipping undecodable row");
                None
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

const USER_COLUMNS: &str =
    "id, username, display_name, credential_hash, email, phone, gender, photo, category, role, created_at";

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let gender: i16 = row.try_get("gender").map_err(|e| decode_err("gender", e))?;
    let category: String = row.try_get("category").map_err(|e| decode_err("category", e))?;
    let role: String = row.try_get("role").map_err(|e| decode_err("role", e))?;

    Ok(User {
        id: UserId::from_uuid(row.try_get("id").map_err(|e| decode_err("id", e))?),
        username: row.try_get("username").map_err(|e| decode_err("username", e))?,
        display_name: row.try_get("display_name").map_err(|e| decode_err("display_name", e))?,
        credential_hash: row
            .try_get("credential_hash")
            .map_err(|e| decode_err("credential_hash", e))?,
        email: row.try_get("email").map_err(|e| decode_err("email", e))?,
        phone: row.try_get("phone").map_err(|e| decode_err("phone", e))?,
        gender: u8::try_from(gender).map_err(|e| decode_err("gender", e))?,
        photo: row.try_get("photo").map_err(|e| decode_err("photo", e))?,
        category: Category::new(category).map_err(|e| decode_err("category", e))?,
        role: Role::new(role),
        created_at: row.try_get("created_at").map_err(|e| decode_err("created_at", e))?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert(&self, user: User) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(*user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.credential_hash)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(i16::from(user.gender))
        .bind(&user.photo)
        .bind(user.category.as_str())
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id, category = %category), err)]
    async fn set_category(&self, id: UserId, category: &Category) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET category = $2 WHERE id = $1")
            .bind(*id.as_uuid())
            .bind(category.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_user_category", e))?;
        Ok(result.rows_affected() == 1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module catalog
// ─────────────────────────────────────────────────────────────────────────────

const MODULE_COLUMNS: &str = "id, name, description, path, active, sort_order, icon, created_at, updated_at";

fn module_from_row(row: &PgRow) -> Result<Module, StoreError> {
    Ok(Module {
        id: ModuleId::from_uuid(row.try_get("id").map_err(|e| decode_err("id", e))?),
        name: row.try_get("name").map_err(|e| decode_err("name", e))?,
        description: row.try_get("description").map_err(|e| decode_err("description", e))?,
        path: row.try_get("path").map_err(|e| decode_err("path", e))?,
        active: row.try_get("active").map_err(|e| decode_err("active", e))?,
        order: row.try_get("sort_order").map_err(|e| decode_err("sort_order", e))?,
        icon: row.try_get("icon").map_err(|e| decode_err("icon", e))?,
        created_at: row.try_get("created_at").map_err(|e| decode_err("created_at", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| decode_err("updated_at", e))?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresModuleCatalog {
    pool: Arc<PgPool>,
}

impl PostgresModuleCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl ModuleCatalogStore for PostgresModuleCatalog {
    #[instrument(skip(self, module), fields(module_id = %module.id), err)]
    async fn insert(&self, module: Module) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO modules ({MODULE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(*module.id.as_uuid())
        .bind(&module.name)
        .bind(&module.description)
        .bind(&module.path)
        .bind(module.active)
        .bind(module.order)
        .bind(&module.icon)
        .bind(module.created_at)
        .bind(module.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_module", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(module_id = %id), err)]
    async fn get(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        let row = sqlx::query(&format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_module", e))?;
        row.as_ref().map(module_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Module>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MODULE_COLUMNS} FROM modules ORDER BY sort_order ASC, created_at ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_modules", e))?;
        Ok(decode_lenient(rows, "module", module_from_row))
    }

    #[instrument(skip(self, patch), fields(module_id = %id), err)]
    async fn apply_patch(
        &self,
        id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        let name = match patch.name.as_deref().map(str::trim) {
            Some("") => return Err(StoreError::Rejected("module name must not be empty".to_string())),
            other => other,
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE modules SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                path = COALESCE($4, path),
                active = COALESCE($5, active),
                sort_order = COALESCE($6, sort_order),
                icon = CASE
                    WHEN $7::text IS NULL THEN icon
                    WHEN btrim($7::text) = '' THEN NULL
                    ELSE $7::text
                END,
                updated_at = $8
            WHERE id = $1
            RETURNING {MODULE_COLUMNS}
            "#
        ))
        .bind(*id.as_uuid())
        .bind(name)
        .bind(patch.description.as_deref())
        .bind(patch.path.as_deref())
        .bind(patch.active)
        .bind(patch.order)
        .bind(patch.icon.as_deref())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("patch_module", e))?;
        row.as_ref().map(module_from_row).transpose()
    }

    #[instrument(skip(self), fields(module_id = %id), err)]
    async fn delete(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        let row = sqlx::query(&format!("DELETE FROM modules WHERE id = $1 RETURNING {MODULE_COLUMNS}"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_module", e))?;
        row.as_ref().map(module_from_row).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn names(&self, ids: &[ModuleId]) -> Result<Vec<(ModuleId, String)>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM modules WHERE id = ANY($1)")
            .bind(uuids(ids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("module_names", e))?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id").map_err(|e| decode_err("id", e))?;
            let name: String = row.try_get("name").map_err(|e| decode_err("name", e))?;
            found.push((ModuleId::from_uuid(id), name));
        }

        // Keep the caller's order.
        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|(f, _)| f == id).cloned())
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entitlement records
// ─────────────────────────────────────────────────────────────────────────────

const RECORD_COLUMNS: &str = "id, category, user_ids, module_ids, note, created_at";

fn record_from_row(row: &PgRow) -> Result<EntitlementRecord, StoreError> {
    let category: String = row.try_get("category").map_err(|e| decode_err("category", e))?;
    let user_ids: Vec<Uuid> = row.try_get("user_ids").map_err(|e| decode_err("user_ids", e))?;
    let module_ids: Vec<Uuid> = row.try_get("module_ids").map_err(|e| decode_err("module_ids", e))?;

    Ok(EntitlementRecord {
        id: RecordId::from_uuid(row.try_get("id").map_err(|e| decode_err("id", e))?),
        category: Category::new(category).map_err(|e| decode_err("category", e))?,
        user_ids: user_ids.into_iter().map(UserId::from_uuid).collect(),
        module_ids: module_ids.into_iter().map(ModuleId::from_uuid).collect(),
        note: row.try_get("note").map_err(|e| decode_err("note", e))?,
        created_at: row.try_get("created_at").map_err(|e| decode_err("created_at", e))?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresEntitlementStore {
    pool: Arc<PgPool>,
}

impl PostgresEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn begin_locked(
        &self,
        operation: &str,
        category: &Category,
        user_id: UserId,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(category.as_str())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(tx)
    }

    async fn insert_in(
        tx: &mut Transaction<'static, Postgres>,
        operation: &str,
        record: &EntitlementRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO entitlement_records ({RECORD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(*record.id.as_uuid())
        .bind(record.category.as_str())
        .bind(uuids(record.user_ids.as_slice()))
        .bind(uuids(record.module_ids.as_slice()))
        .bind(&record.note)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for PostgresEntitlementStore {
    #[instrument(skip(self, record), fields(record_id = %record.id), err)]
    async fn insert(&self, record: EntitlementRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO entitlement_records ({RECORD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(*record.id.as_uuid())
        .bind(record.category.as_str())
        .bind(uuids(record.user_ids.as_slice()))
        .bind(uuids(record.module_ids.as_slice()))
        .bind(&record.note)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_record", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    async fn get(&self, id: RecordId) -> Result<Option<EntitlementRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM entitlement_records WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_record", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<EntitlementRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_records", e))?;
        Ok(decode_lenient(rows, "entitlement_record", record_from_row))
    }

    #[instrument(skip(self, new), fields(record_id = %id), err)]
    async fn replace(&self, id: RecordId, new: NewRecord) -> Result<Option<EntitlementRecord>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE entitlement_records
            SET category = $2, user_ids = $3, module_ids = $4, note = $5
            WHERE id = $1
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(*id.as_uuid())
        .bind(new.category.as_str())
        .bind(uuids(new.user_ids.as_slice()))
        .bind(uuids(new.module_ids.as_slice()))
        .bind(&new.note)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replace_record", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    async fn delete(&self, id: RecordId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM entitlement_records WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_record", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn first_record_containing(
        &self,
        user_id: UserId,
        category: Option<&Category>,
    ) -> Result<Option<EntitlementRecord>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM entitlement_records
            WHERE $1 = ANY(user_ids) AND ($2::text IS NULL OR category = $2::text)
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#
        ))
        .bind(*user_id.as_uuid())
        .bind(category.map(Category::as_str))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("first_record_containing", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn records_containing(&self, user_id: UserId) -> Result<Vec<EntitlementRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records WHERE $1 = ANY(user_ids) ORDER BY created_at ASC, id ASC"
        ))
        .bind(*user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("records_containing", e))?;
        Ok(decode_lenient(rows, "entitlement_record", record_from_row))
    }

    #[instrument(skip(self, expected, new), fields(record_id = %id), err)]
    async fn compare_and_set_modules(
        &self,
        id: RecordId,
        expected: &ModuleSet,
        new: &ModuleSet,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE entitlement_records SET module_ids = $3 WHERE id = $1 AND module_ids = $2")
            .bind(*id.as_uuid())
            .bind(uuids(expected.as_slice()))
            .bind(uuids(new.as_slice()))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("compare_and_set_modules", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, modules), fields(category = %category, user_id = %user_id), err)]
    async fn upsert_grant(
        &self,
        category: &Category,
        user_id: UserId,
        modules: &ModuleSet,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        const OP: &str = "upsert_grant";
        let mut tx = self.begin_locked(OP, category, user_id).await?;

        let existing = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM entitlement_records
            WHERE category = $1 AND $2 = ANY(user_ids)
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(category.as_str())
        .bind(*user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        let outcome = match existing.as_ref().map(record_from_row).transpose()? {
            Some(mut record) => {
                let added = record.module_ids.extend_unique(modules.iter().copied());
                if added > 0 {
                    sqlx::query("UPDATE entitlement_records SET module_ids = $2 WHERE id = $1")
                        .bind(*record.id.as_uuid())
                        .bind(uuids(record.module_ids.as_slice()))
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error(OP, e))?;
                }
                UpsertOutcome {
                    record_id: record.id,
                    created: false,
                    modified: added > 0,
                }
            }
            None => {
                let record =
                    EntitlementRecord::custom_for_user(RecordId::new(), category.clone(), user_id, modules.clone(), now);
                Self::insert_in(&mut tx, OP, &record).await?;
                UpsertOutcome {
                    record_id: record.id,
                    created: true,
                    modified: false,
                }
            }
        };

        tx.commit().await.map_err(|e| map_sqlx_error(OP, e))?;
        Ok(outcome)
    }

    #[instrument(skip(self, users, modules), fields(users = users.len(), modules = modules.len()), err)]
    async fn add_modules_for_users(&self, users: &[UserId], modules: &[ModuleId]) -> Result<UpdateCounts, StoreError> {
        let row = sqlx::query(
            r#"
            WITH matched AS (
                SELECT id FROM entitlement_records WHERE user_ids && $1::uuid[]
            ),
            updated AS (
                UPDATE entitlement_records r
                SET module_ids = r.module_ids || ARRAY(
                    SELECT t.m FROM unnest($2::uuid[]) WITH ORDINALITY AS t(m, ord)
                    WHERE NOT (t.m = ANY(r.module_ids))
                    ORDER BY t.ord
                )
                WHERE r.user_ids && $1::uuid[] AND NOT (r.module_ids @> $2::uuid[])
                RETURNING r.id
            )
            SELECT (SELECT count(*) FROM matched) AS matched,
                   (SELECT count(*) FROM updated) AS modified
            "#,
        )
        .bind(uuids(users))
        .bind(uuids(modules))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_modules_for_users", e))?;
        counts_from_row(&row)
    }

    #[instrument(skip(self, users, modules), fields(users = users.len(), modules = modules.len()), err)]
    async fn pull_modules_for_users(&self, users: &[UserId], modules: &[ModuleId]) -> Result<UpdateCounts, StoreError> {
        let row = sqlx::query(
            r#"
            WITH matched AS (
                SELECT id FROM entitlement_records WHERE user_ids && $1::uuid[]
            ),
            updated AS (
                UPDATE entitlement_records r
                SET module_ids = ARRAY(
                    SELECT t.m FROM unnest(r.module_ids) WITH ORDINALITY AS t(m, ord)
                    WHERE NOT (t.m = ANY($2::uuid[]))
                    ORDER BY t.ord
                )
                WHERE r.user_ids && $1::uuid[] AND r.module_ids && $2::uuid[]
                RETURNING r.id
            )
            SELECT (SELECT count(*) FROM matched) AS matched,
                   (SELECT count(*) FROM updated) AS modified
            "#,
        )
        .bind(uuids(users))
        .bind(uuids(modules))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pull_modules_for_users", e))?;
        counts_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id, keep = %keep), err)]
    async fn pull_user_outside_category(&self, user_id: UserId, keep: &Category) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE entitlement_records
            SET user_ids = array_remove(user_ids, $1)
            WHERE category <> $2 AND $1 = ANY(user_ids)
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(keep.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pull_user_outside_category", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, modules), fields(user_id = %user_id, category = %category, mode = ?mode), err)]
    async fn attach_user_to_category(
        &self,
        user_id: UserId,
        category: &Category,
        modules: &ModuleSet,
        mode: MigrationMode,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        const OP: &str = "attach_user_to_category";
        let mut tx = self.begin_locked(OP, category, user_id).await?;

        let target = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM entitlement_records
            WHERE category = $1 AND $2 = ANY(user_ids)
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(category.as_str())
        .bind(*user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(OP, e))?;

        let existing = match target.as_ref().map(record_from_row).transpose()? {
            Some(record) if mode == MigrationMode::Merge => Some(UpsertOutcome {
                record_id: record.id,
                created: false,
                modified: false,
            }),
            Some(record) if record.is_exclusive_to(&user_id) => {
                let modified = record.module_ids != *modules;
                if modified {
                    sqlx::query("UPDATE entitlement_records SET module_ids = $2 WHERE id = $1")
                        .bind(*record.id.as_uuid())
                        .bind(uuids(modules.as_slice()))
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error(OP, e))?;
                }
                Some(UpsertOutcome {
                    record_id: record.id,
                    created: false,
                    modified,
                })
            }
            // Shared record: the user leaves it and gets their own below.
            Some(record) => {
                sqlx::query("UPDATE entitlement_records SET user_ids = array_remove(user_ids, $2) WHERE id = $1")
                    .bind(*record.id.as_uuid())
                    .bind(*user_id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(OP, e))?;
                None
            }
            None => None,
        };

        let outcome = match existing {
            Some(outcome) => outcome,
            None => {
                let record = NewRecord {
                    category: category.clone(),
                    user_ids: vec![user_id].into(),
                    module_ids: modules.clone(),
                    note: None,
                }
                .into_record(RecordId::new(), now);
                Self::insert_in(&mut tx, OP, &record).await?;
                UpsertOutcome {
                    record_id: record.id,
                    created: true,
                    modified: false,
                }
            }
        };

        tx.commit().await.map_err(|e| map_sqlx_error(OP, e))?;
        Ok(outcome)
    }
}

fn counts_from_row(row: &PgRow) -> Result<UpdateCounts, StoreError> {
    let matched: i64 = row.try_get("matched").map_err(|e| decode_err("matched", e))?;
    let modified: i64 = row.try_get("modified").map_err(|e| decode_err("modified", e))?;
    Ok(UpdateCounts {
        matched: u64::try_from(matched).unwrap_or_default(),
        modified: u64::try_from(modified).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statements_are_idempotent() {
        assert!(SCHEMA.iter().all(|s| s.contains("IF NOT EXISTS")));
    }

    #[test]
    fn pool_closed_maps_to_unavailable() {
        let err = map_sqlx_error("list_records", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Unavailable(msg) if msg.contains("list_records")));
    }
}
