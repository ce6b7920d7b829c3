//! Error types for the dunning service.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::InvoiceId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DunningError>;

/// Top-level error.
#[derive(Debug, Error)]
pub enum DunningError {
    /// Invalid escalation configuration. Fatal at startup.
    #[error("Escalation policy misconfigured: {0}")]
    PolicyMisconfigured(String),

    /// The store could not be reached. Aborts the current batch.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The email provider did not accept a reminder.
    #[error("Dispatch failed: {0}")]
    DispatchFailed(#[from] DispatchFailure),

    /// A `sent` record already exists for this (invoice, step).
    #[error("Step {step} was already sent for invoice {invoice_id}")]
    DuplicateSendRejected { invoice_id: InvoiceId, step: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a provider send failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DispatchFailure {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("provider rejected: {0}")]
    ProviderRejected(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Unknown(String),
}

impl DispatchFailure {
    /// Stable reason code, as stored in the ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRecipient(_) => "invalid_recipient",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::Timeout(_) => "timeout",
            Self::Unknown(_) => "unknown",
        }
    }
}
