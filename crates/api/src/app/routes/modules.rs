//! Module catalog endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use modgate_auth::Permission;
use modgate_catalog::{ModulePatch, NewModule};
use modgate_core::ModuleId;
use modgate_entitlements::EntitlementError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_module).get(list_modules))
        .route("/:id", get(get_module).put(update_module).delete(delete_module))
}

pub async fn create_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewModule>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::MODULES_WRITE) {
        return resp;
    }

    match services.catalog.create(body).await {
        Ok(m) => (StatusCode::CREATED, Json(dto::module_to_json(&m))).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn list_modules(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::MODULES_READ) {
        return resp;
    }

    match services.catalog.list().await {
        Ok(modules) => {
            let items: Vec<_> = modules.iter().map(dto::module_to_json).collect();
            Json(serde_json::json!({ "items": items })).into_response()
        }
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn get_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::MODULES_READ) {
        return resp;
    }
    let id = match parse_module_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.catalog.get(id).await {
        Ok(m) => Json(dto::module_to_json(&m)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn update_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<ModulePatch>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::MODULES_WRITE) {
        return resp;
    }
    let id = match parse_module_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.catalog.update(id, patch).await {
        Ok(m) => Json(dto::module_to_json(&m)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn delete_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::MODULES_WRITE) {
        return resp;
    }
    let id = match parse_module_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.catalog.delete(id).await {
        Ok(()) => Json(serde_json::json!({ "id": id.to_string(), "deleted": true })).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

fn parse_module_id(raw: &str) -> Result<ModuleId, axum::response::Response> {
    raw.parse::<ModuleId>()
        .map_err(|e| errors::entitlement_error_to_response(EntitlementError::from(e)))
}
