//! Main axum router and JSON request handlers.
//!
//! Routes:
//! - `GET /api/repos`                              - Repositories of the configured user
//! - `GET /api/repos/{owner}/{repo}/branches`      - Branch names
//! - `GET /api/repos/{owner}/{repo}/download`      - Streamed ZIP (see [`super::download`])
//! - `GET /healthz`                                - Health check
//! - `GET /metrics`                                - Prometheus metrics

use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{error, instrument, warn};

use crate::forge::{ForgeError, RepoSummary};
use crate::metrics::Endpoint;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/repos", get(handle_list_repos))
        .route("/api/repos/{owner}/{repo}/branches", get(handle_list_branches))
        .route(
            "/api/repos/{owner}/{repo}/download",
            get(super::download::handle_download),
        )
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /api/repos`
///
/// Lists the configured user's repositories, most recently updated first,
/// without the ones configured as hidden.
#[instrument(skip(state))]
async fn handle_list_repos(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RepoSummary>>, AppError> {
    let github = &state.config.github;
    state.metrics.metrics.record_api_call(Endpoint::Repos);
    let repos = state
        .forge
        .list_repos(&github.username)
        .await
        .context("Failed to fetch repos")?;

    Ok(Json(
        repos
            .into_iter()
            .filter(|r| !github.hidden_repos.contains(&r.name))
            .collect(),
    ))
}

/// `GET /api/repos/{owner}/{repo}/branches`
#[instrument(skip(state), fields(%owner, %repo))]
async fn handle_list_branches(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, AppError> {
    validate_path_segment(&owner, "owner")?;
    validate_path_segment(&repo, "repo")?;

    state.metrics.metrics.record_api_call(Endpoint::Branches);
    let branches = state
        .forge
        .list_branches(&owner, &repo)
        .await
        .context("Failed to fetch branches")?;
    Ok(Json(branches))
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    crate::health::health_report(
        &state.http_client,
        &state.config.github.api_url,
        &state.rate_limit,
    )
    .await
    .into_response()
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the service.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    if state.rate_limit.observed() {
        let remaining = i64::try_from(state.rate_limit.remaining()).unwrap_or(i64::MAX);
        state
            .metrics
            .metrics
            .upstream_api_rate_limit_remaining
            .set(remaining);
    }

    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Reject anything that is not a single, non-traversing path segment.
pub(crate) fn validate_path_segment(segment: &str, label: &str) -> Result<(), AppError> {
    if segment.is_empty() {
        return Err(AppError::BadRequest(format!("{label} must not be empty")));
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains('\0') || segment == ".."
    {
        return Err(AppError::BadRequest(format!("invalid {label}: {segment:?}")));
    }
    Ok(())
}

/// Branch names may contain `/` but must not escape the ref namespace.
pub(crate) fn validate_branch(branch: &str) -> Result<(), AppError> {
    if branch.is_empty() {
        return Err(AppError::BadRequest("branch must not be empty".into()));
    }
    if branch.contains('\0') || branch.contains("..") || branch.starts_with('/') {
        return Err(AppError::BadRequest(format!("invalid branch: {branch:?}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Malformed owner, repo or branch.
    BadRequest(String),
    /// The repository or branch does not exist upstream.
    NotFound(String),
    /// GitHub refused the call until its rate-limit window resets.
    RateLimited { retry_after_secs: u64 },
    /// Anything else; reported as a 500 like any upstream failure.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_body = |msg: String| Json(serde_json::json!({ "error": msg }));

        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)).into_response(),
            AppError::NotFound(msg) => {
                warn!(%msg, "upstream resource not found");
                (StatusCode::NOT_FOUND, error_body(msg)).into_response()
            }
            AppError::RateLimited { retry_after_secs } => {
                warn!(retry_after_secs, "GitHub rate limit exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    error_body("GitHub API rate limit exceeded".to_string()),
                )
                    .into_response()
            }
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(err.to_string())).into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ForgeError>() {
            Some(ForgeError::NotFound(_)) => {
                AppError::NotFound(format!("{err}: repository or branch not found"))
            }
            Some(ForgeError::RateLimited { retry_after_secs }) => AppError::RateLimited {
                retry_after_secs: *retry_after_secs,
            },
            _ => AppError::Internal(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
