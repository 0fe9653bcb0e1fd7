use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{StatusCode, Uri},
    response::IntoResponse,
};

use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "broker": services.connectivity.current().as_str(),
    }))
}

pub async fn not_found(uri: Uri) -> axum::response::Response {
    tracing::warn!(path = %uri, "route not found");
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not Found",
            "path": uri.to_string(),
        })),
    )
        .into_response()
}
