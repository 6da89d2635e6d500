//! Axum REST API handlers.
//!
//! The API is read-only: it exposes fund summaries, milestone tallies, the
//! public expense view and the audit trail for transparency dashboards.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::unix_now;
use crate::errors::{ErrorKind, PlatformError, Result};
use crate::types::ProjectId;
use crate::{expenses, milestones, reports};

const AUDIT_PAGE: i64 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects/:id/summary", get(project_summary))
        .route("/projects/:id/milestones", get(project_milestones))
        .route("/projects/:id/timeline", get(project_timeline))
        .route("/projects/:id/expenses", get(project_expenses))
        .route("/audit", get(audit_logs))
        .route("/reports/risk", get(risk_report))
        .route("/reports/analytics", get(analytics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub error: String,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::InvalidAmount | ErrorKind::RuleViolation => StatusCode::BAD_REQUEST,
        ErrorKind::InsufficientFunds | ErrorKind::InsufficientEscrow => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::WalletFrozen | ErrorKind::VotingClosed => StatusCode::LOCKED,
        ErrorKind::InvalidState
        | ErrorKind::AlreadyVoted
        | ErrorKind::AlreadyReleased
        | ErrorKind::RequestAlreadyPending => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let error = match kind {
            ErrorKind::Internal => {
                tracing::error!("API internal error: {self}");
                "internal error".to_string()
            }
            _ => self.to_string(),
        };
        (status_for(kind), Json(ErrorResponse { kind, error })).into_response()
    }
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_response(),
    }
}

fn respond_list<T: Serialize>(result: Result<Vec<T>>) -> Response {
    respond(result.map(|items| ListResponse {
        count: items.len(),
        items,
    }))
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /projects/:id/summary`
pub async fn project_summary(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Response {
    respond(reports::fund_summary(&state.pool, project_id).await)
}

/// `GET /projects/:id/milestones`
pub async fn project_milestones(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Response {
    respond_list(milestones::project_milestones(&state.pool, project_id).await)
}

/// `GET /projects/:id/timeline`
pub async fn project_timeline(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Response {
    respond_list(reports::project_timeline(&state.pool, project_id).await)
}

/// `GET /projects/:id/expenses`
///
/// Public view: receipt URLs are never included.
pub async fn project_expenses(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<ProjectId>,
) -> Response {
    respond_list(expenses::project_expenses(&state.pool, None, project_id).await)
}

/// `GET /audit`
pub async fn audit_logs(State(state): State<Arc<ApiState>>) -> Response {
    respond_list(reports::recent_audit_logs(&state.pool, AUDIT_PAGE).await)
}

/// `GET /reports/risk`
pub async fn risk_report(State(state): State<Arc<ApiState>>) -> Response {
    respond(reports::risk_report(&state.pool, unix_now()).await)
}

/// `GET /reports/analytics`
pub async fn analytics(State(state): State<Arc<ApiState>>) -> Response {
    respond(reports::platform_analytics(&state.pool).await)
}
