//! `modgate-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod category;
pub mod entity;
pub mod error;
pub mod id;

pub use category::Category;
pub use entity::Entity;
pub use error::DomainError;
pub use id::{ModuleId, RecordId, UserId, parse_ids};
