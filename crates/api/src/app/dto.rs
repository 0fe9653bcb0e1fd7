use chrono::{DateTime, Utc};
use serde::Deserialize;

use mailflow_campaigns::{CampaignSpec, JobPatch, JobStatus, NewSender, NewUser};
use mailflow_core::{SenderId, UserId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

pub type GoogleLoginRequest = NewUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<String>,
}

impl UserQuery {
    pub fn require(&self) -> Result<UserId, axum::response::Response> {
        match self.user_id.as_deref() {
            Some(raw) => parse_user_id(raw),
            None => Err(errors::json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "validation_error",
                "userId required",
            )),
        }
    }
}

pub type CreateSenderRequest = NewSender;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtherealSenderRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub delay: u64,
    pub recipients: Vec<String>,
    pub sender_id: SenderId,
}

impl CreateCampaignRequest {
    pub fn into_parts(self) -> (UserId, CampaignSpec) {
        (
            self.user_id,
            CampaignSpec {
                name: self.name,
                subject: self.subject,
                body: self.body,
                start_time: self.start_time,
                delay: self.delay,
                recipients: self.recipients,
                sender_id: self.sender_id,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEmailRequest {
    pub is_starred: Option<bool>,
    pub is_archived: Option<bool>,
    pub status: Option<JobStatus>,
}

impl From<PatchEmailRequest> for JobPatch {
    fn from(body: PatchEmailRequest) -> Self {
        JobPatch {
            status: body.status,
            is_starred: body.is_starred,
            is_archived: body.is_archived,
            ..JobPatch::default()
        }
    }
}

// -------------------------
// Helpers
// -------------------------

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse::<UserId>().map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid userId: {raw}"),
        )
    })
}
