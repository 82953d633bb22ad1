use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::archive::AssemblyReport;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: Endpoint,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    Repos,
    Branches,
    Tree,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FileLabels {
    pub outcome: FileOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum FileOutcome {
    Added,
    Failed,
    Excluded,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    // -- upstream API --
    pub upstream_api_calls: Family<EndpointLabels, Counter>,
    pub upstream_api_rate_limit_remaining: Gauge,

    // -- archives --
    pub archive_requests: Counter,
    pub archive_files: Family<FileLabels, Counter>,
    pub archive_bytes: Counter,
    pub archive_duration_seconds: Histogram,
    pub active_downloads: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let upstream_api_calls = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "repozip_upstream_api_calls",
            "GitHub API calls by endpoint",
            upstream_api_calls.clone(),
        );

        let upstream_api_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "repozip_upstream_api_rate_limit_remaining",
            "Remaining GitHub API calls before rate limit",
            upstream_api_rate_limit_remaining.clone(),
        );

        let archive_requests = Counter::default();
        registry.register(
            "repozip_archive_requests",
            "Archive downloads started",
            archive_requests.clone(),
        );

        let archive_files = Family::<FileLabels, Counter>::default();
        registry.register(
            "repozip_archive_files",
            "Repository files by archive outcome",
            archive_files.clone(),
        );

        let archive_bytes = Counter::default();
        registry.register(
            "repozip_archive_bytes",
            "Uncompressed bytes written into archives",
            archive_bytes.clone(),
        );

        let archive_duration_seconds = Histogram::new(exponential_buckets(0.05, 2.0, 14));
        registry.register(
            "repozip_archive_duration_seconds",
            "Time from tree resolution to archive completion",
            archive_duration_seconds.clone(),
        );

        let active_downloads: Gauge = Gauge::default();
        registry.register(
            "repozip_active_downloads",
            "Archives currently being streamed",
            active_downloads.clone(),
        );

        Self {
            upstream_api_calls,
            upstream_api_rate_limit_remaining,
            archive_requests,
            archive_files,
            archive_bytes,
            archive_duration_seconds,
            active_downloads,
        }
    }

    pub fn record_api_call(&self, endpoint: Endpoint) {
        self.upstream_api_calls
            .get_or_create(&EndpointLabels { endpoint })
            .inc();
    }

    pub fn record_files(&self, outcome: FileOutcome, count: usize) {
        self.archive_files
            .get_or_create(&FileLabels { outcome })
            .inc_by(count as u64);
    }

    /// Fold a finished assembly into the archive counters.
    pub fn record_report(&self, report: &AssemblyReport) {
        self.record_files(FileOutcome::Added, report.added);
        self.record_files(FileOutcome::Failed, report.failed);
        self.archive_bytes.inc_by(report.bytes);
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all service metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
