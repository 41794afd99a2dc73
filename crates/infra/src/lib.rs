//! Infrastructure layer: storage adapters, icon storage and the services that
//! implement the catalog and entitlement protocols on top of them.

pub mod catalog_service;
pub mod entitlement_service;
pub mod icons;
pub mod store;


pub use catalog_service::CatalogService;
pub use entitlement_service::{EntitlementService, MAX_CAS_ATTEMPTS};
pub use icons::{FsIconStorage, IconStorage, InMemoryIconStorage};
pub use store::{
    EntitlementStore, InMemoryEntitlementStore, InMemoryModuleCatalog, InMemoryUserDirectory, ModuleCatalogStore,
    PostgresEntitlementStore, PostgresModuleCatalog, PostgresUserDirectory, StoreError, UpdateCounts, UpsertOutcome,
    UserDirectory, ensure_schema,
};
