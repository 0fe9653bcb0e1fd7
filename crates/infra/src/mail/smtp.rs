use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, instrument};
use uuid::Uuid;

use mailflow_campaigns::SmtpCredentials;

use super::{DeliveryInfo, MailTransport, OutgoingMail, TransportError};

/// Implicit TLS submission port.
const SMTPS_PORT: u16 = 465;
/// STARTTLS submission port.
const SUBMISSION_PORT: u16 = 587;

/// Sends through the sender's own SMTP server. A connection is opened per
/// message; senders differ per job so there is nothing useful to pool.
#[derive(Debug, Clone, Default)]
pub struct SmtpMailTransport;

impl SmtpMailTransport {
    pub fn new() -> Self {
        Self
    }

    fn mailer(
        &self,
        credentials: &SmtpCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let params = TlsParameters::new(credentials.host.clone())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let tls = match credentials.port {
            SMTPS_PORT => Tls::Wrapper(params),
            SUBMISSION_PORT => Tls::Required(params),
            _ => Tls::Opportunistic(params),
        };

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(credentials.host.as_str())
                .port(credentials.port)
                .tls(tls)
                .credentials(Credentials::new(
                    credentials.user.clone(),
                    credentials.pass.clone(),
                ))
                .build(),
        )
    }
}

/// `"{display}" <{auth user}>`, falling back to the display address when the
/// login is not itself an address.
fn from_mailbox(credentials: &SmtpCredentials) -> Result<Mailbox, TransportError> {
    let address = credentials
        .user
        .parse::<Address>()
        .or_else(|_| credentials.from_email.parse::<Address>())
        .map_err(|e| TransportError::InvalidAddress {
            address: credentials.user.clone(),
            reason: e.to_string(),
        })?;
    Ok(Mailbox::new(Some(credentials.from_email.clone()), address))
}

fn message_id(from: &Mailbox) -> String {
    format!("<{}@{}>", Uuid::now_v7(), from.email.domain())
}

pub(crate) fn build_message(
    credentials: &SmtpCredentials,
    mail: &OutgoingMail,
) -> Result<(Message, String), TransportError> {
    let from = from_mailbox(credentials)?;
    let to = mail
        .to
        .parse::<Mailbox>()
        .map_err(|e| TransportError::InvalidAddress {
            address: mail.to.clone(),
            reason: e.to_string(),
        })?;
    let id = message_id(&from);

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.as_str())
        .message_id(Some(id.clone()))
        .header(ContentType::TEXT_HTML)
        .body(mail.html_body.clone())
        .map_err(|e| TransportError::Build(e.to_string()))?;
    Ok((message, id))
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    #[instrument(skip(self, credentials, mail), fields(host = %credentials.host, port = credentials.port), err)]
    async fn send(
        &self,
        credentials: &SmtpCredentials,
        mail: &OutgoingMail,
    ) -> Result<DeliveryInfo, TransportError> {
        let (message, message_id) = build_message(credentials, mail)?;
        let mailer = self.mailer(credentials)?;

        let response = mailer
            .send(message)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        let text = response
            .message()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        debug!(%message_id, code = %response.code(), "smtp accepted message");

        Ok(DeliveryInfo {
            message_id,
            response: format!("{} {}", response.code(), text),
        })
    }
}
