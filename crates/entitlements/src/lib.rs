//! Entitlement model: which user categories (and which users within them) are
//! granted which catalog modules.
//!
//! This crate is pure domain logic: the set type with its invariants, the
//! record shape, the bulk/migration vocabulary and the error taxonomy shared by
//! the protocol implementation in `modgate-infra`.

pub mod error;
pub mod id_set;
pub mod migration;
pub mod protocol;
pub mod record;

pub use error::{EntitlementError, EntitlementResult};
pub use id_set::{IdSet, ModuleSet, UserSet};
pub use migration::{MigrationMode, MigrationPhase, MigrationReport};
pub use protocol::{BulkAction, BulkOutcome, ModuleNames};
pub use record::{CUSTOM_ASSIGNMENT_NOTE, EntitlementRecord, NewRecord};
