//! Seams between the reminder engine and its collaborators.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::{DispatchFailure, Result};
use crate::types::{Client, ClientId, Invoice, InvoiceId, NewReminder, ReminderRecord};

/// Store operations consumed by the reminder engine.
///
/// Every method fails with [`crate::DunningError::StoreUnavailable`] when the
/// backing store cannot be reached.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// All invoices still awaiting payment.
    async fn list_unpaid_invoices(&self) -> Result<Vec<Invoice>>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>>;

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>>;

    /// Steps with a `sent` ledger record for this invoice.
    async fn get_sent_steps(&self, invoice_id: InvoiceId) -> Result<BTreeSet<u32>>;

    /// Append one ledger record. A second `sent` record for the same
    /// (invoice, step) is refused with `DuplicateSendRejected`.
    async fn append_reminder(&self, reminder: NewReminder) -> Result<ReminderRecord>;
}

/// Transactional email provider.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &str;

    /// Whether credentials are present. An unconfigured dispatcher still
    /// accepts calls and fails them.
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), DispatchFailure>;
}
