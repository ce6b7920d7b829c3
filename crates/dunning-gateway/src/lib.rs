//! # Dunning Gateway
//! HTTP API over the store and the reminder engine, plus CSV import.

pub mod import;
pub mod routes;
pub mod server;

pub use import::{ImportReport, import_csv};
pub use server::{AppState, build_router, start};
