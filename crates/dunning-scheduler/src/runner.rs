//! Reminder runner: one batch per tick, plus the manual "send now" path.
//!
//! Both paths go through [`ReminderRunner::dispatch`]: render, send under a
//! timeout, then write exactly one ledger record. Per-invoice failures stay
//! inside the batch; only an unavailable store aborts it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dunning_core::{
    Client, DeliveryOutcome, DispatchFailure, Dispatcher, DunningError, Invoice, InvoiceId,
    InvoiceStore, ReminderRecord, Result,
};
use futures::StreamExt;
use serde::Serialize;

use crate::ledger::ReminderLedger;
use crate::policy::{EscalationPolicy, EscalationStep};
use crate::template::ReminderTemplates;

/// Summary of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    /// Unpaid invoices examined.
    pub scanned: usize,
    pub sent: usize,
    pub failed: usize,
    /// No step due today.
    pub not_due: usize,
    /// Inactive or missing client, or an invoice that could not be processed.
    pub skipped: usize,
    /// Another run recorded the same send first.
    pub duplicates: usize,
}

/// Result of a single dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub invoice_id: InvoiceId,
    pub step: u32,
    pub outcome: DeliveryOutcome,
    pub failure: Option<DispatchFailure>,
    pub record: ReminderRecord,
}

enum Processed {
    NotDue,
    Skipped,
    Dispatched(DispatchOutcome),
}

pub struct ReminderRunner {
    store: Arc<dyn InvoiceStore>,
    ledger: ReminderLedger,
    dispatcher: Arc<dyn Dispatcher>,
    policy: EscalationPolicy,
    templates: ReminderTemplates,
    send_timeout: Duration,
    max_concurrent: usize,
}

impl ReminderRunner {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: EscalationPolicy,
        templates: ReminderTemplates,
    ) -> Self {
        Self {
            ledger: ReminderLedger::new(store.clone()),
            store,
            dispatcher,
            policy,
            templates,
            send_timeout: Duration::from_secs(30),
            max_concurrent: 4,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub fn dispatcher(&self) -> &dyn Dispatcher {
        self.dispatcher.as_ref()
    }

    /// Run one batch as of `now`.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let today = now.date_naive();
        let invoices = self.store.list_unpaid_invoices().await.inspect_err(|e| {
            tracing::error!("❌ Batch aborted, cannot list unpaid invoices: {e}");
        })?;

        tracing::info!("📋 Reminder batch for {today}: {} unpaid invoice(s)", invoices.len());
        let mut report = BatchReport {
            started_at: now,
            scanned: invoices.len(),
            ..Default::default()
        };

        let mut results = futures::stream::iter(invoices)
            .map(|invoice| self.process_invoice(invoice, today, now))
            .buffer_unordered(self.max_concurrent);

        while let Some(result) = results.next().await {
            match result {
                Ok(Processed::NotDue) => report.not_due += 1,
                Ok(Processed::Skipped) => report.skipped += 1,
                Ok(Processed::Dispatched(done)) => match done.outcome {
                    DeliveryOutcome::Sent => report.sent += 1,
                    DeliveryOutcome::Failed => report.failed += 1,
                },
                Err(DunningError::DuplicateSendRejected { invoice_id, step }) => {
                    tracing::warn!(
                        "⚠️ Invoice {invoice_id} step {step} was recorded as sent by a concurrent run"
                    );
                    report.duplicates += 1;
                }
                Err(e @ DunningError::StoreUnavailable(_)) => {
                    tracing::error!("❌ Batch aborted after {} sent: {e}", report.sent);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Invoice skipped in batch: {e}");
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            "✅ Batch done: {} sent, {} failed, {} not due, {} skipped, {} duplicate",
            report.sent,
            report.failed,
            report.not_due,
            report.skipped,
            report.duplicates
        );
        Ok(report)
    }

    /// Send a reminder immediately, ignoring the due date.
    ///
    /// Without `step`, the lowest unsent step is used. A step that already
    /// has a `sent` record is rejected.
    pub async fn send_reminder_now(
        &self,
        invoice_id: InvoiceId,
        step: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| DunningError::NotFound(format!("invoice {invoice_id}")))?;
        if invoice.is_paid() {
            return Err(DunningError::Conflict(format!(
                "invoice {} is already paid",
                invoice.invoice_number
            )));
        }
        let client = self
            .store
            .get_client(invoice.client_id)
            .await?
            .ok_or_else(|| DunningError::NotFound(format!("client {}", invoice.client_id)))?;

        let sent = self.ledger.sent_steps(invoice_id).await?;
        let step = match step {
            Some(n) => {
                let step = self
                    .policy
                    .step(n)
                    .ok_or_else(|| DunningError::Validation(format!("unknown step {n}")))?;
                if sent.contains(&n) {
                    return Err(DunningError::DuplicateSendRejected { invoice_id, step: n });
                }
                step
            }
            None => self.policy.next_unsent(&sent).ok_or_else(|| {
                DunningError::Conflict(format!(
                    "every reminder step was already sent for invoice {}",
                    invoice.invoice_number
                ))
            })?,
        };

        self.dispatch(&invoice, &client, step, true, now).await
    }

    async fn process_invoice(
        &self,
        invoice: Invoice,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Processed> {
        let Some(client) = self.store.get_client(invoice.client_id).await? else {
            tracing::warn!(
                "⚠️ Invoice {} references missing client {}",
                invoice.invoice_number,
                invoice.client_id
            );
            return Ok(Processed::Skipped);
        };
        if !client.is_active {
            tracing::debug!("⏭️ Skipping {} (client inactive)", invoice.invoice_number);
            return Ok(Processed::Skipped);
        }

        let sent = self.ledger.sent_steps(invoice.id).await?;
        let Some(step) = self.policy.next_due(&invoice, today, &sent) else {
            return Ok(Processed::NotDue);
        };

        self.dispatch(&invoice, &client, step, false, now)
            .await
            .map(Processed::Dispatched)
    }

    /// Render, send, record. Always writes one ledger record unless the
    /// store itself fails.
    async fn dispatch(
        &self,
        invoice: &Invoice,
        client: &Client,
        step: EscalationStep,
        forced: bool,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let (email, result) = match self
            .templates
            .render(step.step, client, invoice, now.date_naive())
        {
            Ok(email) => {
                let result = self.send_with_timeout(&client.email, &email.subject, &email.body).await;
                (Some(email), result)
            }
            Err(e) => (None, Err(DispatchFailure::Unknown(e.to_string()))),
        };

        let record = self
            .ledger
            .record_outcome(invoice.id, step.step, &result, now, forced, email.as_ref())
            .await?;

        match &result {
            Ok(()) => tracing::info!(
                "📤 Reminder step {} for {} sent to {}{}",
                step.step,
                invoice.invoice_number,
                client.email,
                if forced { " (manual)" } else { "" }
            ),
            Err(failure) => tracing::warn!(
                "⚠️ Reminder step {} for {} failed: {failure}",
                step.step,
                invoice.invoice_number
            ),
        }

        Ok(DispatchOutcome {
            invoice_id: invoice.id,
            step: step.step,
            outcome: record.outcome,
            failure: result.err(),
            record,
        })
    }

    async fn send_with_timeout(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), DispatchFailure> {
        match tokio::time::timeout(self.send_timeout, self.dispatcher.send(to, subject, body)).await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchFailure::Timeout(self.send_timeout.as_secs())),
        }
    }
}
