//! Brevo (ex-Sendinblue) transactional email API.
//!
//! POST https://api.brevo.com/v3/smtp/email with an `api-key` header.
//! 200/201 means the message was accepted for delivery.

use std::time::Duration;

use async_trait::async_trait;
use dunning_core::config::EmailConfig;
use dunning_core::{DispatchFailure, Dispatcher};

pub struct BrevoDispatcher {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    sender_email: String,
    sender_name: String,
    timeout: Duration,
}

impl BrevoDispatcher {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Dispatcher for BrevoDispatcher {
    fn name(&self) -> &str {
        "brevo"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.sender_email.is_empty()
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchFailure> {
        if !self.is_configured() {
            tracing::warn!("⚠️ Brevo not configured (missing API key), email to {recipient} not sent");
            return Err(DispatchFailure::Unknown(
                "email service not configured (BREVO_API_KEY missing)".into(),
            ));
        }

        let payload = serde_json::json!({
            "sender": { "name": self.sender_name, "email": self.sender_email },
            "to": [{ "email": recipient }],
            "subject": subject,
            "htmlContent": text_to_html(body),
            "textContent": body,
        });

        let resp = self
            .client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchFailure::Timeout(self.timeout.as_secs())
                } else {
                    DispatchFailure::Unknown(format!("network error: {e}"))
                }
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        classify_response(status, &text)?;

        let message_id = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v["messageId"].as_str().map(str::to_string))
            .unwrap_or_else(|| "OK".into());
        tracing::debug!("📧 Brevo accepted email to {recipient}: {message_id}");
        Ok(())
    }
}

/// Map a Brevo HTTP response to a send result.
pub fn classify_response(status: u16, body: &str) -> Result<(), DispatchFailure> {
    match status {
        200 | 201 => Ok(()),
        400 if mentions_invalid_email(body) => Err(DispatchFailure::InvalidRecipient(
            format!("Brevo {status}: {body}"),
        )),
        _ => Err(DispatchFailure::ProviderRejected(format!(
            "Brevo {status}: {body}"
        ))),
    }
}

fn mentions_invalid_email(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("email") && (lower.contains("not valid") || lower.contains("invalid"))
}

/// Minimal HTML rendering of a plain-text body.
pub fn text_to_html(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace("\n\n", "</p><p>")
        .replace('\n', "<br>");
    format!("<html><body><p>{escaped}</p></body></html>")
}
