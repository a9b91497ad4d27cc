//! Metrics for the savings pipeline
//!
//! Recording functions are grouped by phase (normalize, platform, identity).
//! Everything goes through the `metrics` facade; `init` installs a Prometheus
//! recorder so the CLI can render a snapshot at the end of a run. Without a
//! recorder the calls are no-ops, which is what the tests rely on.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Normalize metrics
    NormalizeRecordsProcessed,
    NormalizeWarnings,
    NormalizeUnknownSource,
    NormalizeBatchesProcessed,
    NormalizeBatchSize,

    // Platform metrics
    PlatformLabelsMatched,
    PlatformLabelsUnmatched,
    PlatformCacheReloads,
    PlatformLookupErrors,
    PlatformVariantsRegistered,

    // Identity metrics
    IdentityAttempts,
    IdentityInvalidInputs,
    IdentityCacheHits,
    IdentityStageHits,
    IdentityNoMatches,
    IdentityFailures,
    IdentityAutoFlagged,
    IdentityStageDuration,
    IdentityConfidence,
    IdentityBatchSize,
}

/// Prometheus metric kind, used when describing metrics to the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::NormalizeRecordsProcessed => "svp_normalize_records_processed_total",
            MetricName::NormalizeWarnings => "svp_normalize_warnings_total",
            MetricName::NormalizeUnknownSource => "svp_normalize_unknown_source_total",
            MetricName::NormalizeBatchesProcessed => "svp_normalize_batches_processed_total",
            MetricName::NormalizeBatchSize => "svp_normalize_batch_size",

            MetricName::PlatformLabelsMatched => "svp_platform_labels_matched_total",
            MetricName::PlatformLabelsUnmatched => "svp_platform_labels_unmatched_total",
            MetricName::PlatformCacheReloads => "svp_platform_cache_reloads_total",
            MetricName::PlatformLookupErrors => "svp_platform_lookup_errors_total",
            MetricName::PlatformVariantsRegistered => "svp_platform_variants_registered_total",

            MetricName::IdentityAttempts => "svp_identity_attempts_total",
            MetricName::IdentityInvalidInputs => "svp_identity_invalid_inputs_total",
            MetricName::IdentityCacheHits => "svp_identity_cache_hits_total",
            MetricName::IdentityStageHits => "svp_identity_stage_hits_total",
            MetricName::IdentityNoMatches => "svp_identity_no_matches_total",
            MetricName::IdentityFailures => "svp_identity_failures_total",
            MetricName::IdentityAutoFlagged => "svp_identity_auto_flagged_total",
            MetricName::IdentityStageDuration => "svp_identity_stage_duration_seconds",
            MetricName::IdentityConfidence => "svp_identity_confidence",
            MetricName::IdentityBatchSize => "svp_identity_batch_size",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            NormalizeRecordsProcessed,
            NormalizeWarnings,
            NormalizeUnknownSource,
            NormalizeBatchesProcessed,
            NormalizeBatchSize,
            PlatformLabelsMatched,
            PlatformLabelsUnmatched,
            PlatformCacheReloads,
            PlatformLookupErrors,
            PlatformVariantsRegistered,
            IdentityAttempts,
            IdentityInvalidInputs,
            IdentityCacheHits,
            IdentityStageHits,
            IdentityNoMatches,
            IdentityFailures,
            IdentityAutoFlagged,
            IdentityStageDuration,
            IdentityConfidence,
            IdentityBatchSize,
        ]
        .into_iter()
    }

    /// (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::NormalizeRecordsProcessed => ("normalize", "Raw records normalized, by source"),
            MetricName::NormalizeWarnings => ("normalize", "Fields dropped or corrected during normalization"),
            MetricName::NormalizeUnknownSource => ("normalize", "Batches normalized with the generic profile"),
            MetricName::NormalizeBatchesProcessed => ("normalize", "Batches normalized"),
            MetricName::NormalizeBatchSize => ("normalize", "Normalization batch size"),

            MetricName::PlatformLabelsMatched => ("platform", "Platform labels matched, by reason"),
            MetricName::PlatformLabelsUnmatched => ("platform", "Platform labels left unmatched, by reason"),
            MetricName::PlatformCacheReloads => ("platform", "Platform reference cache reloads"),
            MetricName::PlatformLookupErrors => ("platform", "Platform reference store errors, by operation"),
            MetricName::PlatformVariantsRegistered => ("platform", "Unknown platform labels auto-registered"),

            MetricName::IdentityAttempts => ("identity", "Institution names submitted for resolution"),
            MetricName::IdentityInvalidInputs => ("identity", "Unusable institution names skipped"),
            MetricName::IdentityCacheHits => ("identity", "Resolutions served from cache"),
            MetricName::IdentityStageHits => ("identity", "Resolutions by cascade stage"),
            MetricName::IdentityNoMatches => ("identity", "Names no cascade stage matched"),
            MetricName::IdentityFailures => ("identity", "Lookups aborted by store errors or timeouts"),
            MetricName::IdentityAutoFlagged => ("identity", "Names flagged for manual review"),
            MetricName::IdentityStageDuration => ("identity", "Cascade stage duration"),
            MetricName::IdentityConfidence => ("identity", "Confidence of resolved identities"),
            MetricName::IdentityBatchSize => ("identity", "Records per resolution batch"),
        }
    }

    pub fn kind(&self) -> MetricKind {
        let name = self.as_str();
        if name.ends_with("_total") {
            MetricKind::Counter
        } else {
            MetricKind::Histogram
        }
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every known metric
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;

    for metric in MetricName::all_metrics() {
        let (_, description) = metric.metadata();
        match metric.kind() {
            MetricKind::Counter => ::metrics::describe_counter!(metric.as_str(), description),
            MetricKind::Histogram => ::metrics::describe_histogram!(metric.as_str(), description),
        }
    }

    METRICS_HANDLE.set(handle).ok();
    info!("Metrics system initialized");
    Ok(())
}

/// Prometheus text exposition of everything recorded so far
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    /// Record that a raw record was normalized under `source`
    pub fn record_normalized(source: &str) {
        ::metrics::counter!(MetricName::NormalizeRecordsProcessed.as_str(), "source" => source.to_string())
            .increment(1);
    }

    pub fn warning_logged(field: &str) {
        ::metrics::counter!(MetricName::NormalizeWarnings.as_str(), "field" => field.to_string())
            .increment(1);
    }

    pub fn unknown_source(tag: &str) {
        ::metrics::counter!(MetricName::NormalizeUnknownSource.as_str(), "tag" => tag.to_string())
            .increment(1);
    }

    pub fn batch_processed(batch_size: usize) {
        ::metrics::histogram!(MetricName::NormalizeBatchSize.as_str()).record(batch_size as f64);
        ::metrics::counter!(MetricName::NormalizeBatchesProcessed.as_str()).increment(1);
    }
}

// ============================================================================
// Platform Metrics
// ============================================================================

pub mod platform {
    use super::MetricName;

    pub fn label_matched(reason: &str) {
        ::metrics::counter!(MetricName::PlatformLabelsMatched.as_str(), "reason" => reason.to_string())
            .increment(1);
    }

    pub fn label_unmatched(reason: &str) {
        ::metrics::counter!(MetricName::PlatformLabelsUnmatched.as_str(), "reason" => reason.to_string())
            .increment(1);
    }

    pub fn cache_reloaded() {
        ::metrics::counter!(MetricName::PlatformCacheReloads.as_str()).increment(1);
    }

    /// Record a failed reference store call; `operation` is load, exists or register
    pub fn lookup_error(operation: &str) {
        ::metrics::counter!(MetricName::PlatformLookupErrors.as_str(), "operation" => operation.to_string())
            .increment(1);
    }

    pub fn auto_registered() {
        ::metrics::counter!(MetricName::PlatformVariantsRegistered.as_str()).increment(1);
    }
}

// ============================================================================
// Identity Metrics
// ============================================================================

pub mod identity {
    use super::MetricName;

    pub fn attempt() {
        ::metrics::counter!(MetricName::IdentityAttempts.as_str()).increment(1);
    }

    pub fn invalid_input() {
        ::metrics::counter!(MetricName::IdentityInvalidInputs.as_str()).increment(1);
    }

    pub fn cache_hit() {
        ::metrics::counter!(MetricName::IdentityCacheHits.as_str()).increment(1);
    }

    pub fn stage_hit(stage: &str) {
        ::metrics::counter!(MetricName::IdentityStageHits.as_str(), "stage" => stage.to_string())
            .increment(1);
    }

    pub fn stage_latency(stage: &str, secs: f64) {
        ::metrics::histogram!(MetricName::IdentityStageDuration.as_str(), "stage" => stage.to_string())
            .record(secs);
    }

    pub fn confidence_recorded(confidence: f64) {
        ::metrics::histogram!(MetricName::IdentityConfidence.as_str()).record(confidence);
    }

    pub fn no_match() {
        ::metrics::counter!(MetricName::IdentityNoMatches.as_str()).increment(1);
    }

    pub fn failure() {
        ::metrics::counter!(MetricName::IdentityFailures.as_str()).increment(1);
    }

    pub fn auto_flagged() {
        ::metrics::counter!(MetricName::IdentityAutoFlagged.as_str()).increment(1);
    }

    pub fn batch_processed(batch_size: usize) {
        ::metrics::histogram!(MetricName::IdentityBatchSize.as_str()).record(batch_size as f64);
    }
}
