use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mailflow_infra::ScheduleError;
use mailflow_infra::mail::ProvisionError;
use mailflow_infra::store::StoreError;

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn schedule_error_to_response(err: ScheduleError) -> axum::response::Response {
    match err {
        ScheduleError::InvalidSpec(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        ScheduleError::Store(e) => store_error_to_response(e),
        ScheduleError::Queue(e) => {
            tracing::error!(error = %e, "campaign persisted but not fully enqueued");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", e.to_string())
        }
    }
}

pub fn provision_error_to_response(err: ProvisionError) -> axum::response::Response {
    tracing::warn!(error = %err, "ethereal provisioning failed");
    json_error(StatusCode::BAD_GATEWAY, "provisioning_failed", err.to_string())
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
