//! # Dunning Scheduler
//!
//! Reminder scheduling and escalation engine.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio sleep until next cron tick)
//!   └── ReminderRunner::run_batch(now)
//!         ├── InvoiceStore::list_unpaid_invoices
//!         ├── EscalationPolicy::next_due   (pure, most advanced unsent step)
//!         ├── ReminderTemplates::render    (Tera)
//!         ├── Dispatcher::send             (bounded by a per-call timeout)
//!         └── ReminderLedger::record_outcome (sent once per step, failed retried)
//! ```
//!
//! The runner never reads the wall clock: `now` is injected by the scheduler
//! loop or by the caller of a manual trigger.

pub mod cron;
pub mod engine;
pub mod ledger;
pub mod persistence;
pub mod policy;
pub mod runner;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{SchedulerEngine, SchedulerState, spawn_scheduler};
pub use ledger::ReminderLedger;
pub use persistence::SqliteStore;
pub use policy::{EscalationPolicy, EscalationStep};
pub use runner::{BatchReport, DispatchOutcome, ReminderRunner};
pub use template::{ReminderTemplates, RenderedEmail};
