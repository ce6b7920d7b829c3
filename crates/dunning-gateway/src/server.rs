//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use dunning_core::DunningConfig;
use dunning_scheduler::{SchedulerEngine, SqliteStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: DunningConfig,
    pub store: Arc<SqliteStore>,
    /// Owns the reminder runner used by manual sends.
    pub engine: Arc<SchedulerEngine>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: DunningConfig, store: Arc<SqliteStore>, engine: Arc<SchedulerEngine>) -> Self {
        Self {
            config,
            store,
            engine,
            start_time: std::time::Instant::now(),
        }
    }
}

/// API key middleware. Validates the X-API-Key header when a key is configured.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected = state.config.gateway.api_key.as_str();
    if expected.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided == expected {
        return next.run(req).await;
    }

    tracing::warn!("🔒 Rejected {} {} (bad or missing API key)", req.method(), req.uri().path());
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({"ok": false, "error": "Unauthorized: invalid or missing API key"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    use super::routes;

    let protected = Router::new()
        .route("/api/stats", get(routes::dashboard_stats))
        .route("/api/clients", get(routes::list_clients).post(routes::create_client))
        .route(
            "/api/clients/{id}",
            get(routes::get_client)
                .put(routes::update_client)
                .delete(routes::delete_client),
        )
        .route("/api/invoices", get(routes::list_invoices).post(routes::create_invoice))
        .route(
            "/api/invoices/{id}",
            get(routes::get_invoice)
                .put(routes::update_invoice)
                .delete(routes::delete_invoice),
        )
        .route("/api/invoices/{id}/mark-paid", post(routes::mark_paid))
        .route("/api/invoices/{id}/send-reminder", post(routes::send_reminder))
        .route("/api/reminders", get(routes::list_reminders))
        .route("/api/escalation", get(routes::escalation_steps))
        .route("/api/scheduler", get(routes::scheduler_status))
        .route("/api/scheduler/run", post(routes::scheduler_run))
        .route("/api/import/csv", post(routes::import_csv))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    // Public routes, no auth
    let public = Router::new().route("/health", get(routes::health_check));

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(std::time::Duration::from_secs(3600));

    protected
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    if state.config.gateway.api_key.is_empty() {
        tracing::warn!("⚠️ No gateway.api_key set, /api/* is open to anyone who can reach {addr}");
    }
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Dunning API listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
