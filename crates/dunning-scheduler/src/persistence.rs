//! SQLite-backed store for clients, invoices and the reminder ledger.
//!
//! The "one `sent` record per (invoice, step)" rule lives in the schema as a
//! partial unique index, so it holds across processes sharing the file.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dunning_core::types::{ClientPatch, DashboardStats, InvoicePatch, NewClient, NewInvoice};
use dunning_core::{
    Client, ClientId, DeliveryOutcome, DunningError, Invoice, InvoiceId, InvoiceStore,
    NewReminder, PaymentStatus, ReminderRecord, Result,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;

const CLIENT_COLUMNS: &str =
    "id, name, email, company, phone, address, is_active, created_at, updated_at";
const INVOICE_COLUMNS: &str = "id, client_id, invoice_number, amount, currency, issue_date, \
     due_date, status, description, created_at, updated_at";
const REMINDER_COLUMNS: &str =
    "id, invoice_id, step, attempted_at, outcome, forced, subject, error, body";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self::with_connection(conn)?;
        tracing::info!("🗄️ Dunning database opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(storage_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                company TEXT,
                phone TEXT,
                address TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                invoice_number TEXT NOT NULL UNIQUE,
                amount TEXT NOT NULL,            -- decimal string, two places
                currency TEXT NOT NULL DEFAULT 'EUR',
                issue_date TEXT NOT NULL,
                due_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'unpaid' CHECK (status IN ('unpaid', 'paid')),
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_invoices_status_due ON invoices(status, due_date);
            CREATE INDEX IF NOT EXISTS idx_invoices_client ON invoices(client_id);

            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_id INTEGER NOT NULL REFERENCES invoices(id) ON DELETE RESTRICT,
                step INTEGER NOT NULL,
                attempted_at TEXT NOT NULL,
                outcome TEXT NOT NULL CHECK (outcome IN ('sent', 'failed')),
                forced INTEGER NOT NULL DEFAULT 0,
                subject TEXT,
                error TEXT,
                body TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_reminders_invoice ON reminders(invoice_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reminders_sent_once
                ON reminders(invoice_id, step) WHERE outcome = 'sent';

            CREATE TRIGGER IF NOT EXISTS reminders_append_only
            BEFORE UPDATE ON reminders
            BEGIN
                SELECT RAISE(ABORT, 'reminders are append-only');
            END;
            ",
        )
        .map_err(|e| DunningError::StoreUnavailable(format!("migration failed: {e}")))?;

        // Ledgers created before the body column existed.
        let has_body: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_table_info('reminders') WHERE name = 'body')",
                [],
                |r| r.get(0),
            )
            .map_err(storage_err)?;
        if !has_body {
            conn.execute("ALTER TABLE reminders ADD COLUMN body TEXT", [])
                .map_err(|e| DunningError::StoreUnavailable(format!("migration failed: {e}")))?;
            tracing::info!("🗄️ Added body column to reminders");
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DunningError::StoreUnavailable(format!("lock poisoned: {e}")))
    }

    /// Liveness check for the health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .map_err(storage_err)?;
        Ok(())
    }

    // ─── Clients ──────────────────────────────────────────────

    pub fn create_client(&self, new: &NewClient, now: DateTime<Utc>) -> Result<Client> {
        let conn = self.lock()?;
        insert_client(&conn, new, now)
    }

    pub fn find_client(&self, id: ClientId) -> Result<Option<Client>> {
        let conn = self.lock()?;
        query_client(&conn, id)
    }

    pub fn find_client_by_email(&self, email: &str) -> Result<Option<Client>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE email = ?1"),
            params![email.trim().to_lowercase()],
            client_from_row,
        )
        .optional()
        .map_err(storage_err)
    }

    /// Clients ordered by name. `search` matches name, email or company.
    pub fn list_clients(&self, search: Option<&str>, active_only: bool) -> Result<Vec<Client>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLIENT_COLUMNS} FROM clients
                 WHERE (?1 IS NULL OR name LIKE ?1 OR email LIKE ?1 OR company LIKE ?1)
                   AND (?2 = 0 OR is_active = 1)
                 ORDER BY name COLLATE NOCASE, id"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![pattern, active_only], client_from_row)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)
    }

    pub fn update_client(
        &self,
        id: ClientId,
        patch: &ClientPatch,
        now: DateTime<Utc>,
    ) -> Result<Client> {
        let conn = self.lock()?;
        let mut client = query_client(&conn, id)?
            .ok_or_else(|| DunningError::NotFound(format!("client {id}")))?;

        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(DunningError::Validation("client name is required".into()));
            }
            client.name = name.to_string();
        }
        if let Some(email) = &patch.email {
            client.email = normalize_email(email)?;
        }
        if patch.company.is_some() {
            client.company = non_empty(&patch.company);
        }
        if patch.phone.is_some() {
            client.phone = non_empty(&patch.phone);
        }
        if patch.address.is_some() {
            client.address = non_empty(&patch.address);
        }
        if let Some(active) = patch.is_active {
            client.is_active = active;
        }
        client.updated_at = now;

        conn.execute(
            "UPDATE clients SET name = ?2, email = ?3, company = ?4, phone = ?5, address = ?6,
                    is_active = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                client.name,
                client.email,
                client.company,
                client.phone,
                client.address,
                client.is_active,
                now
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                DunningError::Conflict(format!(
                    "a client with email {} already exists",
                    client.email
                ))
            } else {
                storage_err(e)
            }
        })?;
        Ok(client)
    }

    /// Delete a client and its invoices. Refused once any of them has a
    /// reminder on record.
    pub fn delete_client(&self, id: ClientId) -> Result<()> {
        let conn = self.lock()?;
        let reminders: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reminders r JOIN invoices i ON i.id = r.invoice_id
                 WHERE i.client_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .map_err(storage_err)?;
        if reminders > 0 {
            return Err(DunningError::Conflict(format!(
                "client {id} has {reminders} reminder record(s) and cannot be deleted"
            )));
        }
        let deleted = conn
            .execute("DELETE FROM clients WHERE id = ?1", params![id])
            .map_err(storage_err)?;
        if deleted == 0 {
            return Err(DunningError::NotFound(format!("client {id}")));
        }
        Ok(())
    }

    // ─── Invoices ─────────────────────────────────────────────

    pub fn create_invoice(&self, new: &NewInvoice, now: DateTime<Utc>) -> Result<Invoice> {
        let conn = self.lock()?;
        insert_invoice(&conn, new, now)
    }

    /// Create an invoice and, when no client has this email yet, its client,
    /// in one transaction. Returns the invoice and whether the client is new.
    pub fn create_invoice_with_client(
        &self,
        client: &NewClient,
        invoice: &NewInvoice,
        now: DateTime<Utc>,
    ) -> Result<(Invoice, bool)> {
        let email = normalize_email(&client.email)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        let existing: Option<ClientId> = tx
            .query_row("SELECT id FROM clients WHERE email = ?1", params![email], |r| r.get(0))
            .optional()
            .map_err(storage_err)?;
        let (client_id, created) = match existing {
            Some(id) => (id, false),
            None => (insert_client(&tx, client, now)?.id, true),
        };
        let invoice = insert_invoice(
            &tx,
            &NewInvoice {
                client_id,
                ..invoice.clone()
            },
            now,
        )?;
        tx.commit().map_err(storage_err)?;
        Ok((invoice, created))
    }

    pub fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let conn = self.lock()?;
        query_invoice(&conn, id)
    }

    pub fn find_invoice_by_number(&self, number: &str) -> Result<Option<Invoice>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = ?1"),
            params![number.trim()],
            invoice_from_row,
        )
        .optional()
        .map_err(storage_err)
    }

    /// Invoices ordered by due date.
    pub fn list_invoices(
        &self,
        status: Option<PaymentStatus>,
        client_id: Option<ClientId>,
    ) -> Result<Vec<Invoice>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR client_id = ?2)
                 ORDER BY due_date, id"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str()), client_id], invoice_from_row)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)
    }

    pub fn unpaid_invoices(&self) -> Result<Vec<Invoice>> {
        self.list_invoices(Some(PaymentStatus::Unpaid), None)
    }

    /// Update an invoice that has not been paid yet.
    pub fn update_invoice(
        &self,
        id: InvoiceId,
        patch: &InvoicePatch,
        now: DateTime<Utc>,
    ) -> Result<Invoice> {
        let conn = self.lock()?;
        let mut invoice = query_invoice(&conn, id)?
            .ok_or_else(|| DunningError::NotFound(format!("invoice {id}")))?;
        if invoice.is_paid() {
            return Err(DunningError::Conflict(format!(
                "invoice {} is paid and can no longer be edited",
                invoice.invoice_number
            )));
        }

        if let Some(amount) = patch.amount {
            invoice.amount = validate_amount(amount)?;
        }
        if let Some(currency) = &patch.currency {
            invoice.currency = normalize_currency(currency)?;
        }
        if let Some(due) = patch.due_date {
            if due < invoice.issue_date {
                return Err(DunningError::Validation(format!(
                    "due date {due} is before issue date {}",
                    invoice.issue_date
                )));
            }
            invoice.due_date = due;
        }
        if patch.description.is_some() {
            invoice.description = non_empty(&patch.description);
        }
        invoice.updated_at = now;

        conn.execute(
            "UPDATE invoices SET amount = ?2, currency = ?3, due_date = ?4, description = ?5,
                    updated_at = ?6
             WHERE id = ?1",
            params![
                id,
                invoice.amount.to_string(),
                invoice.currency,
                invoice.due_date,
                invoice.description,
                now
            ],
        )
        .map_err(storage_err)?;
        Ok(invoice)
    }

    /// Flip an invoice to `paid`. Paid is terminal.
    pub fn mark_paid(&self, id: InvoiceId, now: DateTime<Utc>) -> Result<Invoice> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE invoices SET status = 'paid', updated_at = ?2
                 WHERE id = ?1 AND status = 'unpaid'",
                params![id, now],
            )
            .map_err(storage_err)?;
        let invoice = query_invoice(&conn, id)?
            .ok_or_else(|| DunningError::NotFound(format!("invoice {id}")))?;
        if changed == 0 {
            return Err(DunningError::Conflict(format!(
                "invoice {} is already paid",
                invoice.invoice_number
            )));
        }
        tracing::info!("💰 Invoice {} marked as paid", invoice.invoice_number);
        Ok(invoice)
    }

    /// Delete an invoice with no reminder history.
    pub fn delete_invoice(&self, id: InvoiceId) -> Result<()> {
        let conn = self.lock()?;
        let reminders: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reminders WHERE invoice_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .map_err(storage_err)?;
        if reminders > 0 {
            return Err(DunningError::Conflict(format!(
                "invoice {id} has {reminders} reminder record(s) and cannot be deleted"
            )));
        }
        let deleted = conn
            .execute("DELETE FROM invoices WHERE id = ?1", params![id])
            .map_err(storage_err)?;
        if deleted == 0 {
            return Err(DunningError::NotFound(format!("invoice {id}")));
        }
        Ok(())
    }

    // ─── Reminder ledger ──────────────────────────────────────

    pub fn sent_steps(&self, invoice_id: InvoiceId) -> Result<BTreeSet<u32>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT step FROM reminders WHERE invoice_id = ?1 AND outcome = 'sent'")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![invoice_id], |r| r.get::<_, u32>(0))
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<BTreeSet<_>>>()
            .map_err(storage_err)
    }

    /// Append a ledger record. A second `sent` for the same step is refused.
    pub fn insert_reminder(&self, new: &NewReminder) -> Result<ReminderRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM invoices WHERE id = ?1)",
                params![new.invoice_id],
                |r| r.get(0),
            )
            .map_err(storage_err)?;
        if !exists {
            return Err(DunningError::NotFound(format!("invoice {}", new.invoice_id)));
        }
        tx.execute(
            "INSERT INTO reminders (invoice_id, step, attempted_at, outcome, forced, subject, error, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.invoice_id,
                new.step,
                new.attempted_at,
                new.outcome.as_str(),
                new.forced,
                new.subject,
                new.error,
                new.body
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                DunningError::DuplicateSendRejected {
                    invoice_id: new.invoice_id,
                    step: new.step,
                }
            } else {
                storage_err(e)
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(storage_err)?;

        Ok(ReminderRecord {
            id,
            invoice_id: new.invoice_id,
            step: new.step,
            attempted_at: new.attempted_at,
            outcome: new.outcome,
            forced: new.forced,
            subject: new.subject.clone(),
            body: new.body.clone(),
            error: new.error.clone(),
        })
    }

    /// Most recent ledger records first.
    pub fn list_reminders(
        &self,
        invoice_id: Option<InvoiceId>,
        outcome: Option<DeliveryOutcome>,
        limit: usize,
    ) -> Result<Vec<ReminderRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE (?1 IS NULL OR invoice_id = ?1) AND (?2 IS NULL OR outcome = ?2)
                 ORDER BY attempted_at DESC, id DESC
                 LIMIT ?3"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![invoice_id, outcome.map(|o| o.as_str()), limit as i64],
                reminder_from_row,
            )
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)
    }

    // ─── Dashboard ────────────────────────────────────────────

    pub fn stats(&self, today: NaiveDate) -> Result<DashboardStats> {
        let conn = self.lock()?;
        let count = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> Result<i64> {
            conn.query_row(sql, p, |r| r.get(0)).map_err(storage_err)
        };
        let day = today.format("%Y-%m-%d").to_string();

        let active_clients = count("SELECT COUNT(*) FROM clients WHERE is_active = 1", params![])?;
        let total_invoices = count("SELECT COUNT(*) FROM invoices", params![])?;
        let unpaid_invoices = count("SELECT COUNT(*) FROM invoices WHERE status = 'unpaid'", params![])?;
        let overdue_invoices = count(
            "SELECT COUNT(*) FROM invoices WHERE status = 'unpaid' AND due_date < ?1",
            params![today],
        )?;
        let reminders_sent_today = count(
            "SELECT COUNT(*) FROM reminders
             WHERE outcome = 'sent' AND substr(attempted_at, 1, 10) = ?1",
            params![day],
        )?;
        let reminders_failed = count("SELECT COUNT(*) FROM reminders WHERE outcome = 'failed'", params![])?;

        let mut stmt = conn
            .prepare("SELECT amount FROM invoices WHERE status = 'unpaid'")
            .map_err(storage_err)?;
        let amounts = stmt
            .query_map([], |r| parse_decimal(r, 0))
            .map_err(storage_err)?;
        let mut unpaid_amount = Decimal::ZERO;
        for amount in amounts {
            unpaid_amount += amount.map_err(storage_err)?;
        }

        Ok(DashboardStats {
            active_clients,
            total_invoices,
            unpaid_invoices,
            overdue_invoices,
            unpaid_amount,
            reminders_sent_today,
            reminders_failed,
        })
    }
}

#[async_trait]
impl InvoiceStore for SqliteStore {
    async fn list_unpaid_invoices(&self) -> Result<Vec<Invoice>> {
        self.unpaid_invoices()
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        self.find_invoice(id)
    }

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>> {
        self.find_client(id)
    }

    async fn get_sent_steps(&self, invoice_id: InvoiceId) -> Result<BTreeSet<u32>> {
        self.sent_steps(invoice_id)
    }

    async fn append_reminder(&self, reminder: NewReminder) -> Result<ReminderRecord> {
        self.insert_reminder(&reminder)
    }
}

// ─── Inserts ──────────────────────────────────────────────────

fn insert_client(conn: &Connection, new: &NewClient, now: DateTime<Utc>) -> Result<Client> {
    let name = new.name.trim();
    let email = normalize_email(&new.email)?;
    if name.is_empty() {
        return Err(DunningError::Validation("client name is required".into()));
    }

    conn.execute(
        "INSERT INTO clients (name, email, company, phone, address, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![
            name,
            email,
            non_empty(&new.company),
            non_empty(&new.phone),
            non_empty(&new.address),
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            DunningError::Conflict(format!("a client with email {email} already exists"))
        } else {
            storage_err(e)
        }
    })?;
    let id = conn.last_insert_rowid();
    query_client(conn, id)?
        .ok_or_else(|| DunningError::StoreUnavailable("inserted client vanished".into()))
}

fn insert_invoice(conn: &Connection, new: &NewInvoice, now: DateTime<Utc>) -> Result<Invoice> {
    let number = new.invoice_number.trim();
    if number.is_empty() {
        return Err(DunningError::Validation("invoice number is required".into()));
    }
    let amount = validate_amount(new.amount)?;
    let currency = normalize_currency(&new.currency)?;
    if new.due_date < new.issue_date {
        return Err(DunningError::Validation(format!(
            "due date {} is before issue date {}",
            new.due_date, new.issue_date
        )));
    }

    if query_client(conn, new.client_id)?.is_none() {
        return Err(DunningError::NotFound(format!("client {}", new.client_id)));
    }
    conn.execute(
        "INSERT INTO invoices (client_id, invoice_number, amount, currency, issue_date,
                               due_date, status, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'unpaid', ?7, ?8, ?8)",
        params![
            new.client_id,
            number,
            amount.to_string(),
            currency,
            new.issue_date,
            new.due_date,
            non_empty(&new.description),
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            DunningError::Conflict(format!("invoice number {number} already exists"))
        } else {
            storage_err(e)
        }
    })?;
    let id = conn.last_insert_rowid();
    query_invoice(conn, id)?
        .ok_or_else(|| DunningError::StoreUnavailable("inserted invoice vanished".into()))
}

// ─── Row mapping ──────────────────────────────────────────────

fn query_client(conn: &Connection, id: ClientId) -> Result<Option<Client>> {
    conn.query_row(
        &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"),
        params![id],
        client_from_row,
    )
    .optional()
    .map_err(storage_err)
}

fn query_invoice(conn: &Connection, id: InvoiceId) -> Result<Option<Invoice>> {
    conn.query_row(
        &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"),
        params![id],
        invoice_from_row,
    )
    .optional()
    .map_err(storage_err)
}

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        company: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    let status: String = row.get(7)?;
    Ok(Invoice {
        id: row.get(0)?,
        client_id: row.get(1)?,
        invoice_number: row.get(2)?,
        amount: parse_decimal(row, 3)?,
        currency: row.get(4)?,
        issue_date: row.get(5)?,
        due_date: row.get(6)?,
        status: PaymentStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?,
        description: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<ReminderRecord> {
    let outcome: String = row.get(4)?;
    Ok(ReminderRecord {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        step: row.get(2)?,
        attempted_at: row.get(3)?,
        outcome: DeliveryOutcome::from_str(&outcome)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
        forced: row.get(5)?,
        subject: row.get(6)?,
        error: row.get(7)?,
        body: row.get(8)?,
    })
}

fn parse_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ─── Validation & errors ──────────────────────────────────────

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(DunningError::Validation(format!(
            "'{email}' is not a valid email address"
        ))),
    }
}

fn normalize_currency(currency: &str) -> Result<String> {
    let code = currency.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(DunningError::Validation(format!(
            "currency must be a 3-letter code, got '{currency}'"
        )))
    }
}

fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(DunningError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(amount.round_dp(2))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn storage_err(err: rusqlite::Error) -> DunningError {
    DunningError::StoreUnavailable(err.to_string())
}
