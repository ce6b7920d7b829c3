//! Reminder ledger: append-only record of dispatch attempts.
//!
//! Only `sent` records suppress a step. Uniqueness of `sent` per
//! (invoice, step) is enforced by the store, so overlapping runs cannot
//! both record a send.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dunning_core::{
    DeliveryOutcome, DispatchFailure, InvoiceId, InvoiceStore, NewReminder, ReminderRecord,
    Result,
};

use crate::template::RenderedEmail;

pub struct ReminderLedger {
    store: Arc<dyn InvoiceStore>,
}

impl ReminderLedger {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    pub async fn sent_steps(&self, invoice_id: InvoiceId) -> Result<BTreeSet<u32>> {
        self.store.get_sent_steps(invoice_id).await
    }

    pub async fn has_sent(&self, invoice_id: InvoiceId, step: u32) -> Result<bool> {
        Ok(self.sent_steps(invoice_id).await?.contains(&step))
    }

    /// Record the result of one dispatch attempt.
    pub async fn record_outcome(
        &self,
        invoice_id: InvoiceId,
        step: u32,
        result: &std::result::Result<(), DispatchFailure>,
        attempted_at: DateTime<Utc>,
        forced: bool,
        email: Option<&RenderedEmail>,
    ) -> Result<ReminderRecord> {
        let (outcome, error) = match result {
            Ok(()) => (DeliveryOutcome::Sent, None),
            Err(failure) => (
                DeliveryOutcome::Failed,
                Some(format!("{}: {}", failure.kind(), failure)),
            ),
        };
        self.store
            .append_reminder(NewReminder {
                invoice_id,
                step,
                outcome,
                attempted_at,
                forced,
                subject: email.map(|e| e.subject.clone()),
                body: email.map(|e| e.body.clone()),
                error,
            })
            .await
    }
}
