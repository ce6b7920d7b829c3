//! # Dunning Channels
//! Email dispatchers used by the reminder runner.
//!
//! - `brevo`: Brevo HTTP API (default)
//! - `smtp`: any STARTTLS relay via lettre

pub mod brevo;
pub mod smtp;

use std::sync::Arc;

use dunning_core::config::EmailConfig;
use dunning_core::{Dispatcher, DunningError, Result};

pub use brevo::BrevoDispatcher;
pub use smtp::SmtpDispatcher;

/// Build the dispatcher selected by `email.provider`.
pub fn from_config(config: &EmailConfig) -> Result<Arc<dyn Dispatcher>> {
    let dispatcher: Arc<dyn Dispatcher> = match config.provider.to_lowercase().as_str() {
        "brevo" => Arc::new(BrevoDispatcher::new(config)),
        "smtp" => Arc::new(SmtpDispatcher::new(config)),
        other => {
            return Err(DunningError::Config(format!(
                "unknown email provider '{other}' (expected 'brevo' or 'smtp')"
            )));
        }
    };
    if dispatcher.is_configured() {
        tracing::info!("📧 Email provider: {}", dispatcher.name());
    } else {
        tracing::warn!(
            "⚠️ Email provider '{}' is not configured, reminders will be recorded as failed",
            dispatcher.name()
        );
    }
    Ok(dispatcher)
}
