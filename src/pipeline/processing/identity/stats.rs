use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::matchers::MatchStrategy;

/// Latency accumulated by one cascade stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub calls: u64,
    pub total_micros: u64,
}

impl StageTiming {
    pub fn average_micros(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_micros as f64 / self.calls as f64
        }
    }
}

/// Resolution statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionStats {
    /// Names submitted for resolution, including cache hits
    pub attempts: u64,
    pub cache_hits: u64,
    pub exact_hits: u64,
    pub partial_hits: u64,
    pub fuzzy_hits: u64,
    /// Names that went through every stage without a match
    pub no_matches: u64,
    /// Lookups aborted by a store error or timeout
    pub failures: u64,
    /// Placeholder or empty names rejected without a lookup
    pub invalid_inputs: u64,
    pub auto_flagged: u64,
    pub flag_errors: u64,
    pub distinct_names: u64,
    pub records_annotated: u64,
    pub stage_latency: BTreeMap<String, StageTiming>,
}

impl ResolutionStats {
    pub fn record_hit(&mut self, strategy: MatchStrategy) {
        match strategy {
            MatchStrategy::Exact => self.exact_hits += 1,
            MatchStrategy::Partial => self.partial_hits += 1,
            MatchStrategy::Fuzzy => self.fuzzy_hits += 1,
        }
    }

    pub fn record_stage(&mut self, stage: &str, elapsed: Duration) {
        let timing = self.stage_latency.entry(stage.to_string()).or_default();
        timing.calls += 1;
        timing.total_micros += elapsed.as_micros() as u64;
    }

    pub fn resolved(&self) -> u64 {
        self.exact_hits + self.partial_hits + self.fuzzy_hits
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.attempts as f64
        }
    }

    /// Fold another run's counters into this one
    pub fn merge(&mut self, other: &ResolutionStats) {
        self.attempts += other.attempts;
        self.cache_hits += other.cache_hits;
        self.exact_hits += other.exact_hits;
        self.partial_hits += other.partial_hits;
        self.fuzzy_hits += other.fuzzy_hits;
        self.no_matches += other.no_matches;
        self.failures += other.failures;
        self.invalid_inputs += other.invalid_inputs;
        self.auto_flagged += other.auto_flagged;
        self.flag_errors += other.flag_errors;
        self.distinct_names += other.distinct_names;
        self.records_annotated += other.records_annotated;
        for (stage, timing) in &other.stage_latency {
            let mine = self.stage_latency.entry(stage.clone()).or_default();
            mine.calls += timing.calls;
            mine.total_micros += timing.total_micros;
        }
    }
}
