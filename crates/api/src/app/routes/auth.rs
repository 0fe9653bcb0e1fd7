use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Sign-in callback: create the user or refresh its profile, keyed by email.
pub async fn google_login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::GoogleLoginRequest>,
) -> axum::response::Response {
    if body.email.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "email required");
    }

    match services.store.upsert_user(body).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
