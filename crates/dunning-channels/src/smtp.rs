//! SMTP dispatcher (async lettre, STARTTLS).

use async_trait::async_trait;
use dunning_core::config::EmailConfig;
use dunning_core::{DispatchFailure, Dispatcher};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::brevo::text_to_html;

pub struct SmtpDispatcher {
    config: EmailConfig,
}

impl SmtpDispatcher {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message, DispatchFailure> {
        let address: Address = self
            .config
            .sender_email
            .parse()
            .map_err(|e| DispatchFailure::Unknown(format!("invalid sender address: {e}")))?;
        let name = Some(self.config.sender_name.clone()).filter(|n| !n.is_empty());
        let from = Mailbox::new(name, address);
        let to: Mailbox = to
            .parse()
            .map_err(|e| DispatchFailure::InvalidRecipient(format!("{to}: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(text_to_html(body)),
                    ),
            )
            .map_err(|e| DispatchFailure::Unknown(format!("build email: {e}")))
    }
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    fn name(&self) -> &str {
        "smtp"
    }

    fn is_configured(&self) -> bool {
        !self.config.smtp_host.is_empty() && !self.config.sender_email.is_empty()
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchFailure> {
        if !self.is_configured() {
            return Err(DispatchFailure::Unknown("SMTP host not configured".into()));
        }
        let email = self.build_message(recipient, subject, body)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| DispatchFailure::Unknown(format!("SMTP relay: {e}")))?
            .port(self.config.smtp_port)
            .timeout(Some(std::time::Duration::from_secs(self.config.timeout_secs)));
        if !self.config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            ));
        }
        let mailer = builder.build();

        mailer.send(email).await.map_err(|e| {
            if e.is_permanent() {
                DispatchFailure::ProviderRejected(format!("SMTP: {e}"))
            } else if e.is_timeout() {
                DispatchFailure::Timeout(self.config.timeout_secs)
            } else {
                DispatchFailure::Unknown(format!("SMTP send: {e}"))
            }
        })?;

        tracing::debug!("📧 SMTP relay accepted email to {recipient}");
        Ok(())
    }
}
