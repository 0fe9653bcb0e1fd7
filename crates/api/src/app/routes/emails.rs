use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use mailflow_campaigns::{JobPatch, JobView};
use mailflow_core::EmailJobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn list_scheduled(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::UserQuery>,
) -> axum::response::Response {
    list_view(services, query, JobView::Scheduled).await
}

pub async fn list_sent(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::UserQuery>,
) -> axum::response::Response {
    list_view(services, query, JobView::Sent).await
}

pub async fn list_archived(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::UserQuery>,
) -> axum::response::Response {
    list_view(services, query, JobView::Archived).await
}

pub async fn list_all(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::UserQuery>,
) -> axum::response::Response {
    list_view(services, query, JobView::All).await
}

async fn list_view(
    services: Arc<AppServices>,
    query: dto::UserQuery,
    view: JobView,
) -> axum::response::Response {
    let user_id = match query.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.list_jobs(user_id, view).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::UserQuery>,
) -> axum::response::Response {
    let user_id = match query.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.job_stats(user_id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Mailbox flags (star/archive) and manual status overrides.
pub async fn patch_email(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::PatchEmailRequest>,
) -> axum::response::Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.update_job(id, JobPatch::from(body)).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn delete_email(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.delete_job(id).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

fn parse_job_id(raw: &str) -> Result<EmailJobId, axum::response::Response> {
    raw.parse::<EmailJobId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid email id: {raw}"))
    })
}
