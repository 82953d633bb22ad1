//! Streamed repository download handler.
//!
//! Serves `/api/repos/{owner}/{repo}/download?branch=&suffix=`.  The tree is
//! resolved before any response bytes are sent, so unknown repositories and
//! branches still produce a proper error status; after that the ZIP is
//! streamed while later waves of files are still being fetched.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn, Instrument};

use super::handler::{validate_branch, validate_path_segment, AppError};
use crate::archive::{archive_file_name, select_files, stream_archive, ArchiveJob};
use crate::metrics::{Endpoint, FileOutcome};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    branch: Option<String>,
    suffix: Option<String>,
}

/// Resolve the branch tree, then stream the ZIP archive of its files.
#[instrument(skip(state, query), fields(%owner, %repo))]
pub async fn handle_download(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    // ---------- validation ----------
    validate_path_segment(&owner, "owner")?;
    validate_path_segment(&repo, "repo")?;
    let branch = query
        .branch
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| state.config.archive.default_branch.clone());
    validate_branch(&branch)?;

    // ---------- resolve tree ----------
    let started = Instant::now();
    state.metrics.metrics.record_api_call(Endpoint::Tree);
    let entries = state
        .forge
        .list_tree(&owner, &repo, &branch)
        .await
        .context("Failed to create ZIP")?;

    let (files, excluded) = select_files(entries, &state.exclusions);
    info!(%branch, files = files.len(), excluded, "streaming archive");

    let metrics = state.metrics.clone();
    metrics.metrics.archive_requests.inc();
    metrics.metrics.record_files(FileOutcome::Excluded, excluded);
    metrics.metrics.active_downloads.inc();

    // ---------- assemble in the background ----------
    let job = ArchiveJob {
        owner: owner.clone(),
        repo: repo.clone(),
        branch: branch.clone(),
        files,
        batch_size: state.config.archive.batch_size,
    };
    let (reader, handle) = stream_archive(Arc::clone(&state.forge), job);

    tokio::spawn(
        async move {
            match handle.await {
                Ok(Ok(report)) => {
                    metrics.metrics.record_report(&report);
                    info!(
                        added = report.added,
                        failed = report.failed,
                        bytes = report.bytes,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "archive complete"
                    );
                }
                Ok(Err(e)) => warn!(error = %format!("{e:#}"), "archive assembly aborted"),
                Err(e) => warn!(error = %e, "archive task panicked"),
            }
            metrics.metrics.active_downloads.dec();
            metrics
                .metrics
                .archive_duration_seconds
                .observe(started.elapsed().as_secs_f64());
        }
        .in_current_span(),
    );

    // ---------- response ----------
    let file_name = archive_file_name(&repo, &branch, query.suffix.as_deref());
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .context("invalid Content-Disposition header")?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);

    Ok(response)
}
