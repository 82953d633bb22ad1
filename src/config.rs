use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Service configuration loaded from YAML.
///
/// Every section carries serde defaults so that an empty document (`{}`)
/// yields a working configuration pointed at public GitHub.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

// ---------------------------------------------------------------------------
// GitHub upstream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Full URL to the REST API root (e.g. `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base URL serving raw file content by `{owner}/{repo}/{branch}/{path}`.
    #[serde(default = "default_raw_url")]
    pub raw_url: String,
    /// Account whose repositories are listed by `GET /api/repos`.
    #[serde(default = "default_username")]
    pub username: String,
    /// Name of the environment variable that holds the API token.
    ///
    /// The token is optional; without it GitHub applies the anonymous rate
    /// limit (60 requests/hour).
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Repositories omitted from the listing (matched by exact name).
    #[serde(default = "default_hidden_repos")]
    pub hidden_repos: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on redirect hops followed when fetching raw content.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            raw_url: default_raw_url(),
            username: default_username(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
            hidden_repos: default_hidden_repos(),
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl GitHubConfig {
    /// Read the API token from the configured environment variable.
    ///
    /// An unset or blank variable means anonymous access.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_raw_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_username() -> String {
    "CountXD".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_user_agent() -> String {
    "Texture-Pack-Downloader".to_string()
}

fn default_hidden_repos() -> Vec<String> {
    vec!["texture-pack-downloader".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:3000`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:3000".to_string()
}

// ---------------------------------------------------------------------------
// Archive assembly
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Number of raw-content fetches issued concurrently per wave.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// File names left out of every archive, compared case-insensitively
    /// against trailing path segments.
    #[serde(default = "default_excluded_files")]
    pub excluded_files: Vec<String>,
    /// Branch used when a download request does not name one.
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            excluded_files: default_excluded_files(),
            default_branch: default_branch(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_excluded_files() -> Vec<String> {
    vec![
        "README.md".to_string(),
        ".gitattributes".to_string(),
        ".gitignore".to_string(),
    ]
}

fn default_branch() -> String {
    "main".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("invalid YAML config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.archive.batch_size >= 1,
        "archive.batch_size must be at least 1"
    );
    anyhow::ensure!(
        !config.archive.default_branch.trim().is_empty(),
        "archive.default_branch must not be empty"
    );
    anyhow::ensure!(
        !config.github.username.trim().is_empty(),
        "github.username must not be empty"
    );
    for (label, url) in [
        ("github.api_url", &config.github.api_url),
        ("github.raw_url", &config.github.raw_url),
    ] {
        anyhow::ensure!(
            url.starts_with("https://") || url.starts_with("http://"),
            "{label} must be an http(s) URL, got {url:?}"
        );
    }
    config
        .server
        .http_listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid server.http_listen: {}", config.server.http_listen))?;
    Ok(())
}
