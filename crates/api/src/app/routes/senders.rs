use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use mailflow_campaigns::{DEFAULT_TEST_SENDER_HOURLY_LIMIT, NewSender};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn list_senders(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::UserQuery>,
) -> axum::response::Response {
    let user_id = match query.require() {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.list_senders(user_id).await {
        Ok(senders) => (StatusCode::OK, Json(senders)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn create_sender(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateSenderRequest>,
) -> axum::response::Response {
    if body.host.trim().is_empty() || body.auth_user.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "host and user are required",
        );
    }

    match services.store.create_sender(body).await {
        Ok(sender) => (StatusCode::OK, Json(sender)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Provision a disposable Ethereal mailbox and register it as a sender.
pub async fn create_ethereal_sender(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::EtherealSenderRequest>,
) -> axum::response::Response {
    let account = match services.provisioner.create_account().await {
        Ok(account) => account,
        Err(e) => return errors::provision_error_to_response(e),
    };

    let sender = NewSender {
        user_id: body.user_id,
        email: account.user.clone(),
        host: account.host,
        port: account.port,
        auth_user: account.user,
        auth_pass: account.pass,
        hourly_limit: DEFAULT_TEST_SENDER_HOURLY_LIMIT,
    };

    match services.store.create_sender(sender).await {
        Ok(sender) => (StatusCode::OK, Json(sender)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
