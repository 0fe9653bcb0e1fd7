use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn create_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateCampaignRequest>,
) -> axum::response::Response {
    let (user_id, spec) = body.into_parts();

    match services.scheduler.schedule_campaign(user_id, spec).await {
        Ok(campaign) => (StatusCode::OK, Json(campaign)).into_response(),
        Err(e) => errors::schedule_error_to_response(e),
    }
}
