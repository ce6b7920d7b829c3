//! API route handlers for the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use dunning_core::types::{ClientPatch, InvoicePatch, NewClient, NewInvoice};
use dunning_core::{ClientId, DeliveryOutcome, DunningError, InvoiceId, PaymentStatus};
use serde::Deserialize;
use serde_json::{Value, json};

use super::server::AppState;

pub type ApiResponse = (StatusCode, Json<Value>);

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn created(body: Value) -> ApiResponse {
    (StatusCode::CREATED, Json(body))
}

/// Map an error to its HTTP status and `{"ok": false}` body.
pub fn error_response(err: DunningError) -> ApiResponse {
    let status = match &err {
        DunningError::NotFound(_) => StatusCode::NOT_FOUND,
        DunningError::Conflict(_) | DunningError::DuplicateSendRejected { .. } => {
            StatusCode::CONFLICT
        }
        DunningError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DunningError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DunningError::DispatchFailed(_) => StatusCode::BAD_GATEWAY,
        DunningError::PolicyMisconfigured(_)
        | DunningError::Config(_)
        | DunningError::Template(_)
        | DunningError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("❌ API error: {err}");
    }
    (status, Json(json!({"ok": false, "error": err.to_string()})))
}

fn respond<T: serde::Serialize>(
    result: dunning_core::Result<T>,
    wrap: impl FnOnce(Value) -> ApiResponse,
) -> ApiResponse {
    match result.and_then(|v| {
        serde_json::to_value(v).map_err(|e| DunningError::Config(format!("serialize: {e}")))
    }) {
        Ok(value) => wrap(value),
        Err(e) => error_response(e),
    }
}

// ─── System ───────────────────────────────────────────────────

/// Health check (public): database reachability and email provider status.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResponse {
    let database = match state.store.ping() {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let dispatcher = state.engine.runner().dispatcher();
    let healthy = database == "ok";
    (
        if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "service": "dunning",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.start_time.elapsed().as_secs(),
            "database": database,
            "email": {
                "provider": dispatcher.name(),
                "configured": dispatcher.is_configured(),
            },
        })),
    )
}

pub async fn dashboard_stats(State(state): State<Arc<AppState>>) -> ApiResponse {
    respond(state.store.stats(Utc::now().date_naive()), ok)
}

/// Configured escalation steps.
pub async fn escalation_steps(State(state): State<Arc<AppState>>) -> ApiResponse {
    let steps: Vec<Value> = state
        .config
        .escalation
        .steps
        .iter()
        .map(|s| {
            json!({
                "step": s.step,
                "offset_days": s.offset_days,
                "subject": s.subject,
            })
        })
        .collect();
    ok(json!({"ok": true, "steps": steps}))
}

// ─── Clients ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub search: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClientQuery>,
) -> ApiResponse {
    respond(state.store.list_clients(q.search.as_deref(), q.active_only), ok)
}

pub async fn create_client(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewClient>,
) -> ApiResponse {
    respond(state.store.create_client(&body, Utc::now()), created)
}

/// A client with its invoices.
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ClientId>,
) -> ApiResponse {
    let result = state.store.find_client(id).and_then(|client| {
        let client = client.ok_or_else(|| DunningError::NotFound(format!("client {id}")))?;
        let invoices = state.store.list_invoices(None, Some(id))?;
        Ok(json!({"client": client, "invoices": invoices}))
    });
    respond(result, ok)
}

pub async fn update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ClientId>,
    Json(patch): Json<ClientPatch>,
) -> ApiResponse {
    respond(state.store.update_client(id, &patch, Utc::now()), ok)
}

pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ClientId>,
) -> ApiResponse {
    match state.store.delete_client(id) {
        Ok(()) => ok(json!({"ok": true, "message": format!("Client {id} deleted")})),
        Err(e) => error_response(e),
    }
}

// ─── Invoices ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub status: Option<String>,
    pub client_id: Option<ClientId>,
}

pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    Query(q): Query<InvoiceQuery>,
) -> ApiResponse {
    let status = match q.status.as_deref().map(str::parse::<PaymentStatus>).transpose() {
        Ok(status) => status,
        Err(e) => return error_response(DunningError::Validation(e)),
    };
    respond(state.store.list_invoices(status, q.client_id), ok)
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewInvoice>,
) -> ApiResponse {
    respond(state.store.create_invoice(&body, Utc::now()), created)
}

/// An invoice with its reminder history.
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvoiceId>,
) -> ApiResponse {
    let result = state.store.find_invoice(id).and_then(|invoice| {
        let invoice = invoice.ok_or_else(|| DunningError::NotFound(format!("invoice {id}")))?;
        let reminders = state.store.list_reminders(Some(id), None, 100)?;
        Ok(json!({"invoice": invoice, "reminders": reminders}))
    });
    respond(result, ok)
}

pub async fn update_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvoiceId>,
    Json(patch): Json<InvoicePatch>,
) -> ApiResponse {
    respond(state.store.update_invoice(id, &patch, Utc::now()), ok)
}

pub async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvoiceId>,
) -> ApiResponse {
    match state.store.delete_invoice(id) {
        Ok(()) => ok(json!({"ok": true, "message": format!("Invoice {id} deleted")})),
        Err(e) => error_response(e),
    }
}

pub async fn mark_paid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvoiceId>,
) -> ApiResponse {
    respond(state.store.mark_paid(id, Utc::now()), ok)
}

#[derive(Debug, Default, Deserialize)]
pub struct SendReminderBody {
    pub step: Option<u32>,
}

/// Manual reminder. Body is optional: `{"step": n}`.
pub async fn send_reminder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvoiceId>,
    body: Bytes,
) -> ApiResponse {
    let request: SendReminderBody = if body.iter().all(u8::is_ascii_whitespace) {
        SendReminderBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(DunningError::Validation(format!("invalid body: {e}")));
            }
        }
    };

    match state
        .engine
        .runner()
        .send_reminder_now(id, request.step, Utc::now())
        .await
    {
        Ok(outcome) => ok(json!({
            "ok": outcome.outcome == DeliveryOutcome::Sent,
            "step": outcome.step,
            "outcome": outcome.outcome,
            "error": outcome.failure.as_ref().map(|f| f.to_string()),
            "reminder": outcome.record,
        })),
        Err(e) => error_response(e),
    }
}

// ─── Reminders ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ReminderQuery {
    pub invoice_id: Option<InvoiceId>,
    pub outcome: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReminderQuery>,
) -> ApiResponse {
    let outcome = match q.outcome.as_deref().map(str::parse::<DeliveryOutcome>).transpose() {
        Ok(outcome) => outcome,
        Err(e) => return error_response(DunningError::Validation(e)),
    };
    let limit = q.limit.unwrap_or(100).min(1000);
    respond(state.store.list_reminders(q.invoice_id, outcome, limit), ok)
}

// ─── Scheduler ────────────────────────────────────────────────

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResponse {
    respond(Ok(state.engine.status().await), ok)
}

/// Run a batch now, outside the cron schedule.
pub async fn scheduler_run(State(state): State<Arc<AppState>>) -> ApiResponse {
    respond(state.engine.run_now(Utc::now()).await, ok)
}

// ─── Import ───────────────────────────────────────────────────

/// Raw CSV body.
pub async fn import_csv(State(state): State<Arc<AppState>>, body: String) -> ApiResponse {
    respond(
        super::import::import_csv(&state.store, &body, Utc::now()),
        ok,
    )
}
