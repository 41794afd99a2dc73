use axum::{routing::{get, put}, Router};

pub mod entitlements;
pub mod modules;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/admin/modul", modules::router())
        .route("/admin/allmoduls", get(modules::list_modules))
        .nest("/admin/usermodul", entitlements::router())
        .route("/admin/changeusertype", put(entitlements::change_user_type))
}
