//! `modgate-auth`: authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it validates
//! bearer tokens into claims, resolves a [`Principal`] and answers permission
//! checks. Token issuance and password hashing live elsewhere.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod token;
pub mod user;

pub use authorize::{AuthzError, authorize, permissions_for_role};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::Role;
pub use token::{Hs256JwtValidator, JwtValidator, TokenError};
pub use user::{NewUser, User};
