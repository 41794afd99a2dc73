//! Module catalog domain.
//!
//! Modules are feature entries (menu items) that entitlement records grant to
//! user categories. This crate holds the catalog's business rules only (no IO,
//! no HTTP, no storage).

pub mod module;

pub use module::{Module, ModulePatch, NewModule};
