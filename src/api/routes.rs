//! REST endpoints for transactions, invoices, matches, and reconciliation.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::DatabaseError;
use crate::matching::reconcile;
use crate::store::Database;

/// Shared state for API routes.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    pub window_days: i64,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

fn db_error(e: DatabaseError) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e.to_string()})),
    )
        .into_response()
}

/// GET /api/health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/transactions?limit=N
async fn list_transactions(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.db.list_transactions(params.limit).await {
        Ok(txns) => Json(serde_json::json!({
            "count": txns.len(),
            "transactions": txns,
        }))
        .into_response(),
        Err(e) => db_error(e),
    }
}

/// GET /api/invoices
async fn list_invoices(State(state): State<ApiState>) -> impl IntoResponse {
    match state.db.list_invoices().await {
        Ok(invoices) => Json(serde_json::json!({
            "count": invoices.len(),
            "invoices": invoices,
        }))
        .into_response(),
        Err(e) => db_error(e),
    }
}

/// GET /api/matches
async fn list_matches(State(state): State<ApiState>) -> impl IntoResponse {
    match state.db.list_matches().await {
        Ok(matches) => Json(serde_json::json!({
            "count": matches.len(),
            "matches": matches,
        }))
        .into_response(),
        Err(e) => db_error(e),
    }
}

/// POST /api/reconcile
///
/// Runs matching over everything in the store, persists the results,
/// and returns the report.
async fn run_reconcile(State(state): State<ApiState>) -> impl IntoResponse {
    let invoices = match state.db.list_invoices().await {
        Ok(v) => v,
        Err(e) => return db_error(e),
    };
    let transactions = match state.db.list_transactions(None).await {
        Ok(v) => v,
        Err(e) => return db_error(e),
    };

    let report = reconcile(&invoices, &transactions, state.window_days);

    if let Err(e) = state.db.replace_matches(&report.results).await {
        return db_error(e);
    }

    Json(report).into_response()
}

/// Build the API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/transactions", get(list_transactions))
        .route("/api/invoices", get(list_invoices))
        .route("/api/matches", get(list_matches))
        .route("/api/reconcile", post(run_reconcile))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
