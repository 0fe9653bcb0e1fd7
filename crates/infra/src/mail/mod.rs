//! Outbound mail delivery.
//!
//! - `MailTransport`: send one HTML message with a sender's SMTP credentials
//! - `SmtpMailTransport`: lettre over tokio with rustls
//! - `EtherealProvisioner`: creates disposable Ethereal test accounts

mod ethereal;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use mailflow_campaigns::SmtpCredentials;

pub use ethereal::{ETHEREAL_API_URL, EtherealAccount, EtherealProvisioner, ProvisionError};
pub use smtp::SmtpMailTransport;

/// One message to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// What the remote server told us after accepting a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub message_id: String,
    pub response: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("smtp error: {0}")]
    Smtp(String),
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        credentials: &SmtpCredentials,
        mail: &OutgoingMail,
    ) -> Result<DeliveryInfo, TransportError>;
}

#[async_trait]
impl<T> MailTransport for Arc<T>
where
    T: MailTransport + ?Sized,
{
    async fn send(
        &self,
        credentials: &SmtpCredentials,
        mail: &OutgoingMail,
    ) -> Result<DeliveryInfo, TransportError> {
        (**self).send(credentials, mail).await
    }
}
