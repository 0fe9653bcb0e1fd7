use axum::{
    Router,
    routing::{get, patch, post},
};

pub mod auth;
pub mod campaigns;
pub mod emails;
pub mod senders;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/auth/google", post(auth::google_login))
        .route("/senders", get(senders::list_senders).post(senders::create_sender))
        .route("/sender/ethereal", post(senders::create_ethereal_sender))
        .route("/campaigns", post(campaigns::create_campaign))
        .route("/emails/scheduled", get(emails::list_scheduled))
        .route("/emails/sent", get(emails::list_sent))
        .route("/emails/archived", get(emails::list_archived))
        .route("/emails/all", get(emails::list_all))
        .route("/emails/:id", patch(emails::patch_email).delete(emails::delete_email))
        .route("/stats", get(emails::stats))
}
