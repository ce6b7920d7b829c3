//! Data model: clients, invoices and the reminder ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type ClientId = i64;
pub type InvoiceId = i64;

/// A client we send invoices to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Inactive clients are skipped by the scheduled batch.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment status of an invoice. `Paid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An invoice owed by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub client_id: ClientId,
    /// Unique across the store.
    pub invoice_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: PaymentStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// Whole days past the due date (negative before it).
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days()
    }
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery outcome '{other}'")),
        }
    }
}

/// One row of the append-only reminder ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: i64,
    pub invoice_id: InvoiceId,
    pub step: u32,
    pub attempted_at: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
    /// True when sent through the manual trigger.
    pub forced: bool,
    pub subject: Option<String>,
    /// Rendered text body, kept for auditing.
    pub body: Option<String>,
    /// Failure reason, `kind: detail`.
    pub error: Option<String>,
}

/// Ledger entry to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub invoice_id: InvoiceId,
    pub step: u32,
    pub outcome: DeliveryOutcome,
    pub attempted_at: DateTime<Utc>,
    pub forced: bool,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub error: Option<String>,
}

/// Fields for creating a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Partial client update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

/// Fields for creating an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub client_id: ClientId,
    pub invoice_number: String,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
}

pub fn default_currency() -> String {
    "EUR".into()
}

/// Pre-payment invoice update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
}

/// Dashboard counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active_clients: i64,
    pub total_invoices: i64,
    pub unpaid_invoices: i64,
    pub overdue_invoices: i64,
    pub unpaid_amount: Decimal,
    pub reminders_sent_today: i64,
    pub reminders_failed: i64,
}
