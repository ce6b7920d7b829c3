//! CSV import of clients and invoices.
//!
//! Expected header:
//! `client_name,client_email,company,invoice_number,amount,currency,issue_date,due_date,description`
//!
//! Dates are `YYYY-MM-DD`; amounts accept `,` as decimal separator. Clients
//! are matched by email and created when missing. Each row is written in one
//! transaction: a rejected invoice leaves no new client behind. Bad rows are
//! reported and skipped; the rest of the file is still imported.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use dunning_core::types::{NewClient, NewInvoice, default_currency};
use dunning_core::{DunningError, Result};
use dunning_scheduler::SqliteStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total_rows: usize,
    pub imported_clients: usize,
    pub imported_invoices: usize,
    /// `line N: reason`, N counting the header as line 1.
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
    client_name: String,
    client_email: String,
    company: String,
    invoice_number: String,
    amount: String,
    currency: String,
    issue_date: String,
    due_date: String,
    description: String,
}

/// Import every row of `data`. Only a store failure aborts the import.
pub fn import_csv(store: &SqliteStore, data: &str, now: DateTime<Utc>) -> Result<ImportReport> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data.as_bytes());
    let mut report = ImportReport::default();

    for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
        let line = idx + 2;
        report.total_rows += 1;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.errors.push(format!("line {line}: unreadable row ({e})"));
                continue;
            }
        };

        match import_row(store, &row, now) {
            Ok(created_client) => {
                report.imported_invoices += 1;
                if created_client {
                    report.imported_clients += 1;
                }
            }
            Err(RowError::Skip(reason)) => report.errors.push(format!("line {line}: {reason}")),
            Err(RowError::Store(e)) => return Err(e),
        }
    }

    tracing::info!(
        "📥 CSV import: {} row(s), {} invoice(s), {} new client(s), {} error(s)",
        report.total_rows,
        report.imported_invoices,
        report.imported_clients,
        report.errors.len()
    );
    Ok(report)
}

enum RowError {
    Skip(String),
    Store(DunningError),
}

impl From<DunningError> for RowError {
    fn from(e: DunningError) -> Self {
        match e {
            DunningError::StoreUnavailable(_) | DunningError::Io(_) => RowError::Store(e),
            other => RowError::Skip(other.to_string()),
        }
    }
}

/// Returns whether a new client was created.
fn import_row(
    store: &SqliteStore,
    row: &CsvRow,
    now: DateTime<Utc>,
) -> std::result::Result<bool, RowError> {
    if row.client_email.is_empty() {
        return Err(RowError::Skip("missing client email".into()));
    }
    if row.invoice_number.is_empty() {
        return Err(RowError::Skip("missing invoice number".into()));
    }
    if store.find_invoice_by_number(&row.invoice_number)?.is_some() {
        return Err(RowError::Skip(format!(
            "invoice {} already exists",
            row.invoice_number
        )));
    }
    let amount = Decimal::from_str(&row.amount.replace(',', "."))
        .map_err(|_| RowError::Skip(format!("invalid amount '{}'", row.amount)))?;
    let issue_date = parse_date(&row.issue_date)?;
    let due_date = parse_date(&row.due_date)?;

    let name = if row.client_name.is_empty() {
        row.client_email.clone()
    } else {
        row.client_name.clone()
    };
    let client = NewClient {
        name,
        email: row.client_email.clone(),
        company: Some(row.company.clone()),
        phone: None,
        address: None,
    };
    let invoice = NewInvoice {
        // Resolved by the store from the client email.
        client_id: 0,
        invoice_number: row.invoice_number.clone(),
        amount,
        currency: if row.currency.is_empty() {
            default_currency()
        } else {
            row.currency.clone()
        },
        issue_date,
        due_date,
        description: Some(row.description.clone()),
    };

    let (_, created) = store.create_invoice_with_client(&client, &invoice, now)?;
    Ok(created)
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, RowError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| RowError::Skip(format!("invalid date '{raw}' (expected YYYY-MM-DD)")))
}
