//! Forge backend abstraction layer.
//!
//! Provides the [`ForgeBackend`] trait that encapsulates every upstream call
//! the service makes: repository and branch listings, the recursive git tree,
//! and raw blob content.  HTTP handlers and the archive assembler dispatch
//! through this trait so that no URL construction or response parsing leaks
//! outside this module.

pub mod github;
pub mod rate_limit;

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::Config;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Repository record returned to clients by `GET /api/repos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub description: Option<String>,
    pub default_branch: String,
    pub updated_at: Option<String>,
    pub html_url: String,
}

/// One entry of a recursive git tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// Classified upstream failures that callers may want to map to specific
/// HTTP responses.  Anything else travels as a plain [`anyhow::Error`].
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("not found upstream: {0}")]
    NotFound(String),
    #[error("GitHub API rate limit exhausted, resets in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("GitHub returned HTTP {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over the upstream forge API.
#[async_trait::async_trait]
pub trait ForgeBackend: Send + Sync {
    /// List every repository owned by `user`, most recently updated first.
    async fn list_repos(&self, user: &str) -> Result<Vec<RepoSummary>>;

    /// List branch names of a repository in API order.
    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>>;

    /// Resolve `branch` to its full recursive tree, keeping blobs only.
    async fn list_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<TreeEntry>>;

    /// Fetch the raw bytes of one file, following redirects.
    async fn fetch_raw(&self, owner: &str, repo: &str, branch: &str, path: &str)
        -> Result<Bytes>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the [`ForgeBackend`] for the configured upstream.
pub fn build_backend(
    config: &Config,
    rate_limit: rate_limit::RateLimitState,
) -> Result<Box<dyn ForgeBackend>> {
    Ok(Box::new(github::GitHubBackend::new(
        &config.github,
        rate_limit,
    )?))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the `rel="next"` target from an RFC 8288 `Link` header value.
///
/// GitHub paginates list endpoints with headers like
/// `<https://api.github.com/...&page=2>; rel="next", <...>; rel="last"`.
pub fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Percent-encode each `/`-separated segment of a repository path, keeping
/// the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
