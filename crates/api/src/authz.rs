//! API-side authorization guard.
//!
//! Handlers call [`require`] before touching any service, keeping the services
//! themselves auth-agnostic.

use axum::http::StatusCode;
use axum::response::Response;

use modgate_auth::{Permission, authorize};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Check that the caller holds `permission`, or produce the 403 response.
pub fn require(principal: &PrincipalContext, permission: &Permission) -> Result<(), Response> {
    authorize(principal.principal(), permission).map_err(|e| {
        tracing::info!(subject = principal.subject(), permission = permission.as_str(), "request denied");
        errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}
