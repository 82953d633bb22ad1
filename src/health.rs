use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::forge::rate_limit::RateLimitState;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub github: CheckResult,
    pub rate_limit: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_github(client: &reqwest::Client, api_url: &str) -> CheckResult {
    let url = format!("{}/meta", api_url.trim_end_matches('/'));
    match client.head(&url).send().await {
        Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
            CheckResult::healthy()
        }
        Ok(resp) => CheckResult::unhealthy(format!("HEAD {} returned {}", url, resp.status())),
        Err(e) => CheckResult::unhealthy(format!("HEAD {} failed: {e}", url)),
    }
}

fn check_rate_limit(rate_limit: &RateLimitState) -> CheckResult {
    if !rate_limit.observed() {
        return CheckResult {
            ok: true,
            detail: Some("no API calls made yet".to_string()),
        };
    }
    if rate_limit.is_exhausted() {
        return CheckResult::unhealthy(format!(
            "rate limit exhausted, resets in {}s",
            rate_limit.retry_after_secs()
        ));
    }
    CheckResult {
        ok: true,
        detail: Some(format!("{} calls remaining", rate_limit.remaining())),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    if !checks.github.ok {
        // Nothing can be served without the upstream API.
        HealthStatus::Unhealthy
    } else if !checks.rate_limit.ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Build the `/healthz` response.  Returns 200 on Ok/Degraded, 503 on
/// Unhealthy.
pub async fn health_report(
    http_client: &reqwest::Client,
    api_url: &str,
    rate_limit: &RateLimitState,
) -> impl IntoResponse {
    let github = check_github(http_client, api_url).await;
    let rate_limit = check_rate_limit(rate_limit);

    let checks = HealthChecks { github, rate_limit };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}
