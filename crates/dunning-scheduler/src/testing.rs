//! Shared fixtures for the crate's unit tests.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use dunning_core::config::EscalationConfig;
use dunning_core::types::{NewClient, NewInvoice};
use dunning_core::{
    Client, ClientId, DispatchFailure, Dispatcher, DunningError, Invoice, InvoiceId, InvoiceStore,
    NewReminder, ReminderRecord, Result,
};
use rust_decimal::Decimal;

use crate::persistence::SqliteStore;
use crate::policy::EscalationPolicy;
use crate::runner::ReminderRunner;
use crate::template::ReminderTemplates;

pub fn test_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn seed_client(store: &SqliteStore, email: &str) -> Client {
    let name = email.split('@').next().unwrap_or(email).to_string();
    store
        .create_client(
            &NewClient {
                name,
                email: email.into(),
                company: None,
                phone: None,
                address: None,
            },
            Utc::now(),
        )
        .unwrap()
}

/// A 500.00 EUR unpaid invoice due on the given date.
pub fn due_invoice(
    store: &SqliteStore,
    client_id: ClientId,
    number: &str,
    (y, m, d): (i32, u32, u32),
) -> Invoice {
    let due = NaiveDate::from_ymd_opt(y, m, d).unwrap();
    store
        .create_invoice(
            &NewInvoice {
                client_id,
                invoice_number: number.into(),
                amount: Decimal::new(50000, 2),
                currency: "EUR".into(),
                issue_date: due - TimeDelta::days(30),
                due_date: due,
                description: None,
            },
            Utc::now(),
        )
        .unwrap()
}

pub fn runner_with(store: &Arc<SqliteStore>, dispatcher: &Arc<ScriptedDispatcher>) -> ReminderRunner {
    runner_over(store.clone(), dispatcher.clone())
}

pub fn runner_over(store: Arc<dyn InvoiceStore>, dispatcher: Arc<dyn Dispatcher>) -> ReminderRunner {
    let steps = EscalationConfig::default().steps;
    ReminderRunner::new(
        store,
        dispatcher,
        EscalationPolicy::standard(),
        ReminderTemplates::new(&steps, "Acme Billing").unwrap(),
    )
}

/// Wraps a real store; listed operations fail with `StoreUnavailable`.
pub struct OutageStore {
    inner: Arc<SqliteStore>,
    fail_listing: AtomicBool,
    fail_appends: AtomicBool,
}

impl OutageStore {
    pub fn new(inner: &Arc<SqliteStore>) -> Self {
        Self {
            inner: inner.clone(),
            fail_listing: AtomicBool::new(false),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn fail_listing(self) -> Self {
        self.fail_listing.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_appends(self) -> Self {
        self.fail_appends.store(true, Ordering::SeqCst);
        self
    }

    fn down() -> DunningError {
        DunningError::StoreUnavailable("database is locked".into())
    }
}

#[async_trait]
impl InvoiceStore for OutageStore {
    async fn list_unpaid_invoices(&self) -> Result<Vec<Invoice>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::down());
        }
        self.inner.list_unpaid_invoices().await
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        self.inner.get_invoice(id).await
    }

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>> {
        self.inner.get_client(id).await
    }

    async fn get_sent_steps(&self, invoice_id: InvoiceId) -> Result<BTreeSet<u32>> {
        self.inner.get_sent_steps(invoice_id).await
    }

    async fn append_reminder(&self, reminder: NewReminder) -> Result<ReminderRecord> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Self::down());
        }
        self.inner.append_reminder(reminder).await
    }
}

/// Records every call; rejects the listed recipients until `recover`.
#[derive(Default)]
pub struct ScriptedDispatcher {
    failing: HashSet<String>,
    recovered: AtomicBool,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedDispatcher {
    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn recover(&self) {
        self.recovered.store(true, Ordering::SeqCst);
    }

    /// `(recipient, subject, body)` per call.
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), DispatchFailure> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((recipient.into(), subject.into(), body.into()));
        if self.failing.contains(recipient) && !self.recovered.load(Ordering::SeqCst) {
            return Err(DispatchFailure::ProviderRejected("503 service unavailable".into()));
        }
        Ok(())
    }
}
