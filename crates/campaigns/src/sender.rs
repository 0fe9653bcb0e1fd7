use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailflow_core::{SenderId, SentEmailId, UserId};

/// Hourly quota given to disposable test senders.
pub const DEFAULT_TEST_SENDER_HOURLY_LIMIT: u32 = 10;

/// Campaign owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub google_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating or refreshing a user (keyed by email).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub google_id: Option<String>,
}

/// A sending account: SMTP credentials plus an hourly quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub id: SenderId,
    pub user_id: UserId,
    /// Display address used in the From header.
    pub email: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "user")]
    pub auth_user: String,
    #[serde(skip_serializing)]
    pub auth_pass: String,
    pub hourly_limit: u32,
    pub created_at: DateTime<Utc>,
}

impl Sender {
    pub fn credentials(&self) -> SmtpCredentials {
        SmtpCredentials {
            host: self.host.clone(),
            port: self.port,
            user: self.auth_user.clone(),
            pass: self.auth_pass.clone(),
            from_email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSender {
    pub user_id: UserId,
    pub email: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "user")]
    pub auth_user: String,
    #[serde(rename = "pass")]
    pub auth_pass: String,
    pub hourly_limit: u32,
}

/// What the mail transport needs to authenticate and address a message.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from_email: String,
}

impl core::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("from_email", &self.from_email)
            .finish()
    }
}

/// Audit record written after a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentEmail {
    pub id: SentEmailId,
    pub sender_id: SenderId,
    pub recipient: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSentEmail {
    pub sender_id: SenderId,
    pub recipient: String,
    pub subject: String,
}
