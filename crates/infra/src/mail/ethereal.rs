//! Disposable SMTP accounts from Ethereal (`ethereal.email`).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

pub const ETHEREAL_API_URL: &str = "https://api.nodemailer.com/user";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("ethereal request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ethereal rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Serialize)]
struct AccountRequest<'a> {
    requestor: &'a str,
    version: &'a str,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: String,
    #[serde(default)]
    pass: String,
    #[serde(default)]
    smtp: Option<ServerInfo>,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    host: String,
    port: u16,
}

/// A freshly created test mailbox.
#[derive(Clone, PartialEq, Eq)]
pub struct EtherealAccount {
    pub user: String,
    pub pass: String,
    pub host: String,
    pub port: u16,
}

impl core::fmt::Debug for EtherealAccount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EtherealAccount")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct EtherealProvisioner {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for EtherealProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl EtherealProvisioner {
    pub fn new() -> Self {
        Self::with_endpoint(ETHEREAL_API_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn create_account(&self) -> Result<EtherealAccount, ProvisionError> {
        let response: AccountResponse = self
            .client
            .post(&self.endpoint)
            .json(&AccountRequest {
                requestor: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let account = into_account(response)?;
        info!(user = %account.user, host = %account.host, "created ethereal test account");
        Ok(account)
    }
}

fn into_account(response: AccountResponse) -> Result<EtherealAccount, ProvisionError> {
    if response.status != "success" {
        return Err(ProvisionError::Rejected(
            response.error.unwrap_or(response.status),
        ));
    }
    let smtp = response
        .smtp
        .ok_or_else(|| ProvisionError::Rejected("response missing smtp settings".into()))?;
    Ok(EtherealAccount {
        user: response.user,
        pass: response.pass,
        host: smtp.host,
        port: smtp.port,
    })
}
