//! # Dunning Core
//!
//! Shared vocabulary for the dunning service: data model, the store and
//! dispatcher seams consumed by the reminder engine, the error taxonomy, and
//! process-wide configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DunningConfig;
pub use error::{DispatchFailure, DunningError, Result};
pub use traits::{Dispatcher, InvoiceStore};
pub use types::{
    Client, ClientId, DeliveryOutcome, Invoice, InvoiceId, NewReminder, PaymentStatus,
    ReminderRecord,
};
