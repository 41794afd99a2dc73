//! Entitlement record, grant and migration endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use modgate_auth::Permission;
use modgate_core::{ModuleId, RecordId, UserId};
use modgate_entitlements::{EntitlementError, NewRecord};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_record).get(list_records))
        .route("/manage", post(bulk_manage))
        .route("/assign", post(assign_module))
        .route("/revoke", post(revoke_module))
        .route("/replace", put(replace_module))
        .route("/user/:user_id", get(module_names_for_user))
        .route("/:id", get(get_record).put(replace_record).delete(delete_record))
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

pub async fn create_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RecordRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    let result = match new_record(body) {
        Ok(new) => services.entitlements.create_record(new).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(r) => (StatusCode::CREATED, Json(dto::record_to_json(&r))).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn list_records(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_READ) {
        return resp;
    }

    match services.entitlements.list_records().await {
        Ok(records) => {
            let items: Vec<_> = records.iter().map(dto::record_to_json).collect();
            Json(serde_json::json!({ "items": items })).into_response()
        }
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn get_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_READ) {
        return resp;
    }

    let result = match parse::<RecordId>(&id) {
        Ok(id) => services.entitlements.get_record(id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(r) => Json(dto::record_to_json(&r)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn replace_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    let parsed = parse::<RecordId>(&id).and_then(|id| Ok((id, new_record(body)?)));
    let result = match parsed {
        Ok((id, new)) => services.entitlements.replace_record(id, new).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(r) => Json(dto::record_to_json(&r)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn delete_record(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    let id = match parse::<RecordId>(&id) {
        Ok(id) => id,
        Err(e) => return errors::entitlement_error_to_response(e),
    };
    match services.entitlements.delete_record(id).await {
        Ok(()) => Json(serde_json::json!({ "id": id.to_string(), "deleted": true })).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn module_names_for_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_READ) {
        return resp;
    }

    let result = match parse::<UserId>(&user_id) {
        Ok(id) => services.entitlements.module_names_for_user(id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(names) => Json(names).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Grants
// ─────────────────────────────────────────────────────────────────────────────

pub async fn bulk_manage(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BulkManageRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    match services
        .entitlements
        .bulk_manage(&body.user_ids, &body.modul_ids, &body.action)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn assign_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::AssignRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    let result = match (parse::<UserId>(&body.user_id), parse::<ModuleId>(&body.modul_id)) {
        (Ok(user), Ok(module)) => services.entitlements.assign(user, module).await,
        (Err(e), _) | (_, Err(e)) => Err(e),
    };
    match result {
        Ok(r) => Json(dto::record_to_json(&r)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn revoke_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::AssignRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    let result = match (parse::<UserId>(&body.user_id), parse::<ModuleId>(&body.modul_id)) {
        (Ok(user), Ok(module)) => services.entitlements.revoke(user, module).await,
        (Err(e), _) | (_, Err(e)) => Err(e),
    };
    match result {
        Ok(r) => Json(dto::record_to_json(&r)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

pub async fn replace_module(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReplaceRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::ENTITLEMENTS_WRITE) {
        return resp;
    }

    let ids = parse::<UserId>(&body.user_id).and_then(|user| {
        Ok((
            user,
            parse::<ModuleId>(&body.old_modul)?,
            parse::<ModuleId>(&body.new_modul)?,
        ))
    });
    let result = match ids {
        Ok((user, old, new)) => services.entitlements.replace(user, old, new).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(r) => Json(dto::record_to_json(&r)).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Category migration
// ─────────────────────────────────────────────────────────────────────────────

pub async fn change_user_type(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ChangeUserTypeRequest>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::require(&principal, &Permission::USERS_MIGRATE) {
        return resp;
    }

    let entitlements = &services.entitlements;
    let result = if body.replace_moduls {
        entitlements
            .migrate_category_replacing_modules(&body.user_id, &body.new_type, &body.new_moduls)
            .await
    } else {
        entitlements
            .migrate_category(&body.user_id, &body.new_type, &body.new_moduls)
            .await
    };
    match result {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::entitlement_error_to_response(e),
    }
}

fn parse<T>(raw: &str) -> Result<T, EntitlementError>
where
    T: std::str::FromStr<Err = modgate_core::DomainError>,
{
    raw.parse::<T>().map_err(EntitlementError::from)
}

fn new_record(body: dto::RecordRequest) -> Result<NewRecord, EntitlementError> {
    NewRecord::from_raw(&body.jenis_user, &body.user_ids, &body.modul_ids, body.note)
}
