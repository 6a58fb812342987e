use crate::render::render_digest;
use chrono::Utc;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};
use tradewatch_core::{CoreError, DeliveryError, DigestSender, EmailSettings, ScoredPost};

/// Port on which the relay expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpDigestSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
    username: String,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpDigestSender {
    /// Validates addresses and prepares the transport. No connection is made
    /// until the first send.
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, CoreError> {
        let sender = parse_mailbox(&settings.sender)?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;

        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| DeliveryError::Transport {
            reason: e.to_string(),
        })?
        .port(settings.port);

        let builder = if settings.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
        };

        Ok(Self {
            transport: builder.build(),
            host: settings.host.clone(),
            username: settings.username.clone(),
            sender,
            recipients,
        })
    }

    pub fn build_message(&self, subject: &str, html: String) -> Result<Message, CoreError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(subject);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| {
                DeliveryError::MessageBuild {
                    reason: e.to_string(),
                }
                .into()
            })
    }

    fn classify(&self, err: lettre::transport::smtp::Error) -> DeliveryError {
        let code = err.status().map(|c| c.to_string());
        if code.as_deref() == Some("535") {
            DeliveryError::AuthenticationFailed {
                username: self.username.clone(),
            }
        } else if err.is_permanent() {
            DeliveryError::Rejected {
                host: self.host.clone(),
                reason: err.to_string(),
            }
        } else {
            DeliveryError::Transport {
                reason: err.to_string(),
            }
        }
    }
}

impl DigestSender for SmtpDigestSender {
    async fn send_digest(&self, subject: &str, posts: &[ScoredPost]) -> Result<(), CoreError> {
        let html = render_digest(subject, posts, Utc::now());
        let message = self.build_message(subject, html)?;

        debug!(
            "Submitting digest to {} via {}",
            self.recipients.len(),
            self.host
        );
        self.transport
            .send(message)
            .await
            .map_err(|e| self.classify(e))?;

        info!(
            "Digest with {} posts sent to {} recipients",
            posts.len(),
            self.recipients.len()
        );
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, CoreError> {
    address.parse::<Mailbox>().map_err(|_| {
        DeliveryError::InvalidAddress {
            address: address.to_string(),
        }
        .into()
    })
}
