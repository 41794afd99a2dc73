use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use modgate_entitlements::EntitlementError;

pub fn entitlement_error_to_response(err: EntitlementError) -> axum::response::Response {
    let status = match &err {
        EntitlementError::InvalidIdentifier(_)
        | EntitlementError::Validation(_)
        | EntitlementError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        EntitlementError::UserNotFound(_)
        | EntitlementError::ModuleNotFound(_)
        | EntitlementError::RecordNotFound(_)
        | EntitlementError::ModuleNotGranted { .. } => StatusCode::NOT_FOUND,
        EntitlementError::AlreadyGranted { .. } | EntitlementError::ConcurrentModification(_) => {
            StatusCode::CONFLICT
        }
        EntitlementError::PartialMigration { .. } | EntitlementError::PersistenceFailure(_) => {
            tracing::error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    match &err {
        EntitlementError::PartialMigration { completed, .. } => (
            status,
            axum::Json(json!({
                "error": err.code(),
                "message": err.to_string(),
                "completed_phase": completed.as_str(),
            })),
        )
            .into_response(),
        _ => json_error(status, err.code(), err.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
