//! GitHub backend implementation.
//!
//! REST listings go to `api_url` with the v3 JSON media type; file bodies are
//! read from `raw_url` so that blobs of any size are served without the
//! base64 round-trip of the contents API.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GitHubConfig;

use super::rate_limit::RateLimitState;
use super::{encode_path, next_page_url, ForgeBackend, ForgeError, RepoSummary, TreeEntry};

const API_ACCEPT: &str = "application/vnd.github.v3+json";
const RAW_ACCEPT: &str = "application/vnd.github.v3.raw";

/// Hard stop for `Link: rel="next"` chains.
const MAX_PAGES: usize = 100;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    description: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
    updated_at: Option<String>,
    html_url: String,
}

impl From<GitHubRepo> for RepoSummary {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            name: repo.name,
            description: repo.description,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
            updated_at: repo.updated_at,
            html_url: repo.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubTree {
    #[serde(default)]
    sha: String,
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

// ---------------------------------------------------------------------------
// Backend struct
// ---------------------------------------------------------------------------

pub struct GitHubBackend {
    http_client: reqwest::Client,
    api_url: String,
    raw_url: String,
    token: Option<String>,
    rate_limit: RateLimitState,
}

impl GitHubBackend {
    /// Build a backend using the token found in `config.token_env`.
    pub fn new(config: &GitHubConfig, rate_limit: RateLimitState) -> Result<Self> {
        Self::with_token(config, config.token(), rate_limit)
    }

    pub fn with_token(
        config: &GitHubConfig,
        token: Option<String>,
        rate_limit: RateLimitState,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            raw_url: config.raw_url.trim_end_matches('/').to_string(),
            token,
            rate_limit,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("token {token}")),
            None => req,
        }
    }

    /// Issue an API GET and turn any non-success status into a [`ForgeError`].
    async fn api_get(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self
            .authorize(self.http_client.get(url).header(ACCEPT, API_ACCEPT))
            .send()
            .await
            .with_context(|| format!("GitHub API request failed: {url}"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        warn!(%url, %status, "GitHub API returned non-success status");
        Err(self.classify(status, url).into())
    }

    fn classify(&self, status: StatusCode, url: &str) -> ForgeError {
        match status {
            StatusCode::NOT_FOUND => ForgeError::NotFound(url.to_string()),
            StatusCode::TOO_MANY_REQUESTS => ForgeError::RateLimited {
                retry_after_secs: self.rate_limit.retry_after_secs(),
            },
            StatusCode::FORBIDDEN if self.rate_limit.remaining() == 0 => {
                ForgeError::RateLimited {
                    retry_after_secs: self.rate_limit.retry_after_secs(),
                }
            }
            _ => ForgeError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            },
        }
    }

    /// GET a JSON array endpoint, following `Link: rel="next"` pages.
    async fn get_paginated<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                warn!(%url, "pagination limit reached, ignoring remaining pages");
                break;
            }

            let resp = self.api_get(&url).await?;
            next = resp
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_url);

            let page: Vec<T> = resp
                .json()
                .await
                .with_context(|| format!("failed to parse GitHub API response: {url}"))?;
            debug!(%url, items = page.len(), "fetched page");
            items.extend(page);
        }

        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl ForgeBackend for GitHubBackend {
    async fn list_repos(&self, user: &str) -> Result<Vec<RepoSummary>> {
        let url = format!(
            "{}/users/{}/repos?per_page=100&sort=updated",
            self.api_url,
            urlencoding::encode(user)
        );
        let repos: Vec<GitHubRepo> = self.get_paginated(url).await?;
        Ok(repos.into_iter().map(RepoSummary::from).collect())
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/repos/{}/{}/branches?per_page=100",
            self.api_url,
            urlencoding::encode(owner),
            urlencoding::encode(repo)
        );
        let branches: Vec<GitHubBranch> = self.get_paginated(url).await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn list_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_url,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            encode_path(branch)
        );

        let tree: GitHubTree = self
            .api_get(&url)
            .await?
            .json()
            .await
            .with_context(|| format!("failed to parse git tree response: {url}"))?;

        if tree.truncated {
            warn!(
                %owner, %repo, %branch, entries = tree.tree.len(),
                "git tree listing truncated by GitHub, archive will be incomplete"
            );
        }
        debug!(
            %owner, %repo, %branch,
            sha = %tree.sha,
            entries = tree.tree.len(),
            bytes = tree.tree.iter().filter_map(|e| e.size).sum::<u64>(),
            "resolved tree"
        );

        Ok(tree.tree.into_iter().filter(TreeEntry::is_blob).collect())
    }

    async fn fetch_raw(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Bytes> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.raw_url,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            encode_path(branch),
            encode_path(path)
        );

        // Redirects are followed by the client's redirect policy.
        let resp = self
            .authorize(self.http_client.get(&url).header(ACCEPT, RAW_ACCEPT))
            .send()
            .await
            .with_context(|| format!("raw content request failed: {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ForgeError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            }
            .into());
        }

        resp.bytes()
            .await
            .with_context(|| format!("failed to read raw content body: {url}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer, token: Option<&str>) -> GitHubBackend {
        let config = GitHubConfig {
            api_url: server.uri(),
            raw_url: format!("{}/raw", server.uri()),
            ..GitHubConfig::default()
        };
        GitHubBackend::with_token(&config, token.map(String::from), RateLimitState::new()).unwrap()
    }

    fn repo_json(name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "full_name": format!("octocat/{name}"),
            "description": null,
            "default_branch": "main",
            "updated_at": "2024-05-01T10:00:00Z",
            "html_url": format!("https://github.com/octocat/{name}")
        })
    }

    #[tokio::test]
    async fn list_repos_follows_pagination() {
        let server = MockServer::start().await;
        let next = format!(
            "<{}/users/octocat/repos?per_page=100&sort=updated&page=2>; rel=\"next\"",
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/users/octocat/repos"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![repo_json("gamma")]))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/octocat/repos"))
            .and(query_param("sort", "updated"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", next.as_str())
                    .set_body_json(vec![repo_json("alpha"), repo_json("beta")]),
            )
            .mount(&server)
            .await;

        let repos = backend_for(&server, None).list_repos("octocat").await.unwrap();
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(repos[0].default_branch, "main");
        assert_eq!(repos[0].html_url, "https://github.com/octocat/alpha");
    }

    #[tokio::test]
    async fn list_branches_returns_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/pack/branches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "main", "commit": {"sha": "a"}, "protected": false},
                {"name": "1.20", "commit": {"sha": "b"}, "protected": false}
            ])))
            .mount(&server)
            .await;

        let branches = backend_for(&server, None)
            .list_branches("octocat", "pack")
            .await
            .unwrap();
        assert_eq!(branches, vec!["main", "1.20"]);
    }

    #[tokio::test]
    async fn list_tree_keeps_only_blobs_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/pack/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "root",
                "truncated": false,
                "tree": [
                    {"path": "assets", "mode": "040000", "type": "tree", "sha": "t1"},
                    {"path": "assets/a.png", "mode": "100644", "type": "blob", "sha": "b1", "size": 3},
                    {"path": "vendor/lib", "mode": "160000", "type": "commit", "sha": "c1"},
                    {"path": "pack.mcmeta", "mode": "100644", "type": "blob", "sha": "b2", "size": 5}
                ]
            })))
            .mount(&server)
            .await;

        let tree = backend_for(&server, None)
            .list_tree("octocat", "pack", "main")
            .await
            .unwrap();
        let paths: Vec<_> = tree.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["assets/a.png", "pack.mcmeta"]);
    }

    #[tokio::test]
    async fn truncated_tree_returns_partial_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/huge/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "root",
                "truncated": true,
                "tree": [
                    {"path": "pack.mcmeta", "mode": "100644", "type": "blob", "sha": "b1", "size": 5},
                    {"path": "assets/sky.png", "mode": "100644", "type": "blob", "sha": "b2", "size": 9}
                ]
            })))
            .mount(&server)
            .await;

        let tree = backend_for(&server, None)
            .list_tree("octocat", "huge", "main")
            .await
            .unwrap();
        let paths: Vec<_> = tree.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["pack.mcmeta", "assets/sky.png"]);
    }

    #[tokio::test]
    async fn missing_tree_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/pack/git/trees/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "Not Found"
            })))
            .mount(&server)
            .await;

        let err = backend_for(&server, None)
            .list_tree("octocat", "pack", "nope")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ForgeError>(),
            Some(ForgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_quota_is_rate_limited() {
        let server = MockServer::start().await;
        let reset = (chrono::Utc::now().timestamp() + 120).to_string();
        Mock::given(method("GET"))
            .and(path("/repos/octocat/pack/branches"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("X-RateLimit-Remaining", "0")
                    .insert_header("X-RateLimit-Reset", reset.as_str()),
            )
            .mount(&server)
            .await;

        let err = backend_for(&server, None)
            .list_branches("octocat", "pack")
            .await
            .unwrap_err();
        match err.downcast_ref::<ForgeError>() {
            Some(ForgeError::RateLimited { retry_after_secs }) => {
                assert!(*retry_after_secs > 0 && *retry_after_secs <= 120);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_is_sent_as_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/private/branches"))
            .and(header("Authorization", "token s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "main"}
            ])))
            .mount(&server)
            .await;

        let branches = backend_for(&server, Some("s3cret"))
            .list_branches("octocat", "private")
            .await
            .unwrap();
        assert_eq!(branches, vec!["main"]);
    }

    #[tokio::test]
    async fn fetch_raw_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw/octocat/pack/main/assets/a.png"))
            .and(header("Accept", RAW_ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let bytes = backend_for(&server, None)
            .fetch_raw("octocat", "pack", "main", "assets/a.png")
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn fetch_raw_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw/octocat/pack/main/big.bin"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/lfs/big.bin", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lfs/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("redirected body"))
            .mount(&server)
            .await;

        let bytes = backend_for(&server, None)
            .fetch_raw("octocat", "pack", "main", "big.bin")
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"redirected body");
    }

    #[tokio::test]
    async fn fetch_raw_encodes_path_segments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw/octocat/pack/main/my%20file.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("spaced"))
            .mount(&server)
            .await;

        let bytes = backend_for(&server, None)
            .fetch_raw("octocat", "pack", "main", "my file.txt")
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"spaced");
    }

    #[tokio::test]
    async fn fetch_raw_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw/octocat/pack/main/gone.txt"))
            .respond_with(ResponseTemplate::new(404).set_body_string("404: Not Found"))
            .mount(&server)
            .await;

        let err = backend_for(&server, None)
            .fetch_raw("octocat", "pack", "main", "gone.txt")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ForgeError>(),
            Some(ForgeError::UnexpectedStatus { status: 404, .. })
        ));
    }
}
