//! Institution identity resolution.
//!
//! A raw institution name is cleaned into a search key and pushed through
//! the cache and then the `MatchStrategy::CASCADE` stages until one returns a
//! match. Names nothing matches are cached as negatives and flagged into the
//! review queue. Store errors never escape: they are counted and the name is
//! treated as unresolved.

pub mod matchers;
pub mod stats;
pub mod text;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::app::ports::{IdentityReferencePort, ReviewQueuePort};
use crate::common::{bounded, Clock};
use crate::constants::UNKNOWN_INSTITUTION;
use crate::domain::{IdentityAnnotation, MatchMethod, NormalizedRecord, ReviewQueueEntry};
use crate::error::Result;
use crate::observability::metrics;

pub use matchers::{IdentityMatch, MatchStrategy, MatchTuning};
pub use stats::{ResolutionStats, StageTiming};
pub use text::SearchKey;

/// What is known about a name beyond its text; used for review-queue notes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionContext {
    pub source: Option<String>,
    pub product_count: usize,
    pub average_rate: Option<f64>,
}

impl ResolutionContext {
    /// Context for the records at `indices`, all sharing one institution name
    pub fn for_group(records: &[NormalizedRecord], indices: &[usize]) -> Self {
        let rates: Vec<f64> = indices.iter().filter_map(|&i| records[i].aer_rate).collect();
        let average_rate = if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        };
        Self {
            source: indices.first().map(|&i| records[i].provenance.source.clone()),
            product_count: indices.len(),
            average_rate,
        }
    }

    fn review_notes(&self, reason: &str) -> String {
        let mut notes = format!("Auto-flagged: {}", reason);
        if let Some(source) = &self.source {
            notes.push_str(&format!("; source: {}", source));
        }
        notes.push_str(&format!("; products: {}", self.product_count));
        if let Some(rate) = self.average_rate {
            notes.push_str(&format!("; average rate: {:.2}%", rate));
        }
        notes
    }
}

/// Records sharing one raw institution name
#[derive(Debug, Clone, PartialEq)]
struct NameGroup {
    name: String,
    indices: Vec<usize>,
}

/// Group record indices by raw institution name, in first-seen order
fn group_by_institution(records: &[NormalizedRecord]) -> Vec<NameGroup> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<NameGroup> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let name = record.institution_name.trim().to_string();
        match positions.get(&name) {
            Some(&pos) => groups[pos].indices.push(i),
            None => {
                positions.insert(name.clone(), groups.len());
                groups.push(NameGroup {
                    name,
                    indices: vec![i],
                });
            }
        }
    }
    groups
}

fn is_placeholder(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(UNKNOWN_INSTITUTION)
}

fn annotation_for(outcome: Option<IdentityMatch>) -> IdentityAnnotation {
    match outcome {
        Some(m) => IdentityAnnotation {
            regulator_id: Some(m.regulator_id),
            canonical_institution_name: Some(m.canonical_name),
            confidence: m.confidence,
            match_method: m.match_method,
            notes: m.notes,
        },
        None => IdentityAnnotation {
            regulator_id: None,
            canonical_institution_name: None,
            confidence: 0.0,
            match_method: MatchMethod::NoMatch,
            notes: Some("unresolved; queued for manual research".to_string()),
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct IdentityResolver {
    reference: Arc<dyn IdentityReferencePort>,
    review_queue: Arc<dyn ReviewQueuePort>,
    clock: Arc<dyn Clock>,
    tuning: MatchTuning,
    lookup_timeout: Duration,
    /// Positive and negative outcomes keyed by cleaned name; never expires
    cache: Mutex<HashMap<String, Option<IdentityMatch>>>,
    lifetime: Mutex<ResolutionStats>,
}

impl IdentityResolver {
    pub fn new(
        reference: Arc<dyn IdentityReferencePort>,
        review_queue: Arc<dyn ReviewQueuePort>,
        clock: Arc<dyn Clock>,
        tuning: MatchTuning,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            reference,
            review_queue,
            clock,
            tuning,
            lookup_timeout,
            cache: Mutex::new(HashMap::new()),
            lifetime: Mutex::new(ResolutionStats::default()),
        }
    }

    /// Resolve one raw institution name
    pub async fn resolve(&self, name: &str, context: &ResolutionContext) -> Option<IdentityMatch> {
        let mut stats = ResolutionStats::default();
        let outcome = self.resolve_tracked(name, context, &mut stats).await;
        lock(&self.lifetime).merge(&stats);
        outcome
    }

    /// Resolve every distinct institution name in the batch and annotate all
    /// records sharing it. Annotations are applied only after every name has
    /// been settled.
    pub async fn resolve_for_batch(&self, records: &mut [NormalizedRecord]) -> ResolutionStats {
        let started = Instant::now();
        let mut stats = ResolutionStats::default();
        let groups = group_by_institution(records);
        stats.distinct_names = groups.len() as u64;

        let mut annotations = Vec::with_capacity(groups.len());
        for group in &groups {
            let context = ResolutionContext::for_group(records, &group.indices);
            let outcome = self.resolve_tracked(&group.name, &context, &mut stats).await;
            annotations.push(annotation_for(outcome));
        }

        for (group, annotation) in groups.iter().zip(annotations) {
            for &i in &group.indices {
                records[i].identity = Some(annotation.clone());
                stats.records_annotated += 1;
            }
        }

        lock(&self.lifetime).merge(&stats);
        metrics::identity::batch_processed(records.len());

        info!(
            "Resolved {} records ({} distinct names) in {:.2}ms: exact={} partial={} fuzzy={} cache_hits={} no_match={} failures={} flagged={}",
            records.len(),
            stats.distinct_names,
            started.elapsed().as_secs_f64() * 1000.0,
            stats.exact_hits,
            stats.partial_hits,
            stats.fuzzy_hits,
            stats.cache_hits,
            stats.no_matches,
            stats.failures,
            stats.auto_flagged
        );
        if stats.failures > 0 {
            warn!(
                "{} institution lookups failed and were left unresolved",
                stats.failures
            );
        }

        stats
    }

    /// Statistics accumulated over the lifetime of this resolver
    pub fn lifetime_stats(&self) -> ResolutionStats {
        lock(&self.lifetime).clone()
    }

    /// Number of cleaned names with a cached outcome
    pub fn cached_names(&self) -> usize {
        lock(&self.cache).len()
    }

    async fn resolve_tracked(
        &self,
        name: &str,
        context: &ResolutionContext,
        stats: &mut ResolutionStats,
    ) -> Option<IdentityMatch> {
        stats.attempts += 1;
        metrics::identity::attempt();

        let key = SearchKey::new(name);
        if key.is_empty() || is_placeholder(name) {
            stats.invalid_inputs += 1;
            metrics::identity::invalid_input();
            debug!("Skipping lookup for unusable institution name '{}'", name);
            if !name.trim().is_empty() {
                self.flag_for_review(name, context, "no institution name could be extracted", stats)
                    .await;
            }
            return None;
        }

        let cached = lock(&self.cache).get(&key.cleaned).cloned();
        if let Some(outcome) = cached {
            stats.cache_hits += 1;
            metrics::identity::cache_hit();
            if outcome.is_none() {
                // Another spelling may share the key; the queue is keyed by raw name
                self.flag_for_review(name, context, "unresolved under an equivalent spelling", stats)
                    .await;
            }
            return outcome;
        }

        match self.run_cascade(&key, stats).await {
            Ok(Some(found)) => {
                debug!(
                    "'{}' -> {} ({}, confidence {:.3})",
                    name,
                    found.regulator_id,
                    found.match_method.as_str(),
                    found.confidence
                );
                lock(&self.cache).insert(key.cleaned.clone(), Some(found.clone()));
                Some(found)
            }
            Ok(None) => {
                stats.no_matches += 1;
                metrics::identity::no_match();
                lock(&self.cache).insert(key.cleaned.clone(), None);
                self.flag_for_review(name, context, "no reference match", stats)
                    .await;
                None
            }
            Err(e) => {
                error!("Identity lookup for '{}' failed: {}", name, e);
                stats.failures += 1;
                metrics::identity::failure();
                lock(&self.cache).insert(key.cleaned.clone(), None);
                self.flag_for_review(name, context, "reference lookup failed", stats)
                    .await;
                None
            }
        }
    }

    async fn run_cascade(
        &self,
        key: &SearchKey,
        stats: &mut ResolutionStats,
    ) -> Result<Option<IdentityMatch>> {
        for strategy in MatchStrategy::CASCADE {
            let started = Instant::now();
            let candidates = bounded(
                "identity reference lookup",
                self.lookup_timeout,
                self.reference.candidates(strategy, &key.cleaned),
            )
            .await?;
            let found = strategy.find(key, &candidates, &self.tuning);

            let elapsed = started.elapsed();
            stats.record_stage(strategy.as_str(), elapsed);
            metrics::identity::stage_latency(strategy.as_str(), elapsed.as_secs_f64());

            if let Some(found) = found {
                stats.record_hit(strategy);
                metrics::identity::stage_hit(strategy.as_str());
                metrics::identity::confidence_recorded(found.confidence);
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Queue a name for manual research unless it is already queued
    async fn flag_for_review(
        &self,
        name: &str,
        context: &ResolutionContext,
        reason: &str,
        stats: &mut ResolutionStats,
    ) {
        let raw = name.trim();
        match bounded(
            "review queue check",
            self.lookup_timeout,
            self.review_queue.is_flagged(raw),
        )
        .await
        {
            Ok(true) => {
                debug!("'{}' already awaiting review", raw);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Could not check review queue for '{}': {}", raw, e);
                stats.flag_errors += 1;
                return;
            }
        }

        let entry = ReviewQueueEntry::unresolved(raw, context.review_notes(reason), self.clock.now());
        match bounded(
            "review queue insert",
            self.lookup_timeout,
            self.review_queue.flag(&entry),
        )
        .await
        {
            Ok(()) => {
                info!("Flagged '{}' for manual review", raw);
                stats.auto_flagged += 1;
                metrics::identity::auto_flagged();
            }
            Err(e) => {
                warn!("Failed to flag '{}' for review: {}", raw, e);
                stats.flag_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SystemClock;
    use crate::domain::IdentityReferenceEntry;
    use crate::pipeline::storage::InMemoryReferenceStore;

    fn reference(id: &str, canonical: &str, searchable: &str, base: f64) -> IdentityReferenceEntry {
        IdentityReferenceEntry {
            regulator_id: id.to_string(),
            canonical_name: canonical.to_string(),
            searchable_name: searchable.to_string(),
            base_confidence: base,
            match_type: "canonical".to_string(),
        }
    }

    fn store() -> Arc<InMemoryReferenceStore> {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.add_identity(reference("718155", "Zopa Bank Limited", "ZOPA BANK", 1.0));
        store.add_identity(reference("204550", "Tandem Bank Limited", "TANDEM BANK", 0.95));
        store
    }

    fn resolver(store: Arc<InMemoryReferenceStore>) -> IdentityResolver {
        IdentityResolver::new(
            store.clone(),
            store,
            Arc::new(SystemClock),
            MatchTuning::default(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_equals_fresh_lookup() {
        let store = store();
        let resolver = resolver(store.clone());
        let ctx = ResolutionContext::default();

        let fresh = resolver.resolve("Zopa Bank Ltd", &ctx).await;
        let cached = resolver.resolve("ZOPA BANK LTD.", &ctx).await;
        assert!(fresh.is_some());
        assert_eq!(fresh, cached);

        let stats = resolver.lifetime_stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.partial_hits, 1);
    }

    #[tokio::test]
    async fn test_negative_outcome_is_cached_and_flagged_once() {
        let store = store();
        let resolver = resolver(store.clone());
        let ctx = ResolutionContext::default();

        assert!(resolver.resolve("Nowhere Savings Cooperative", &ctx).await.is_none());
        assert!(resolver.resolve("Nowhere Savings Cooperative", &ctx).await.is_none());

        assert_eq!(store.review_entries().len(), 1);
        let stats = resolver.lifetime_stats();
        assert_eq!(stats.no_matches, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.auto_flagged, 1);
    }

    #[tokio::test]
    async fn test_placeholder_skips_lookup() {
        let store = store();
        let resolver = resolver(store.clone());

        let outcome = resolver
            .resolve(UNKNOWN_INSTITUTION, &ResolutionContext::default())
            .await;
        assert!(outcome.is_none());
        assert_eq!(store.identity_lookups(), 0);
        assert_eq!(resolver.lifetime_stats().invalid_inputs, 1);
        assert_eq!(store.review_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_symbol_only_name_is_queued_without_lookup() {
        let store = store();
        let resolver = resolver(store.clone());
        let mut records = vec![crate::domain::test_support::record("???", None)];

        resolver.resolve_for_batch(&mut records).await;

        let identity = records[0].identity.as_ref().unwrap();
        assert_eq!(identity.match_method, MatchMethod::NoMatch);
        assert_eq!(store.identity_lookups(), 0);
        let reviews = store.review_entries();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].raw_institution_name, "???");
    }

    #[tokio::test]
    async fn test_every_spelling_of_an_unresolved_key_is_queued() {
        let store = store();
        let resolver = resolver(store.clone());
        let mut records = vec![
            crate::domain::test_support::record("Acme & Co Savings", None),
            crate::domain::test_support::record("ACME AND CO SAVINGS.", None),
        ];

        let stats = resolver.resolve_for_batch(&mut records).await;

        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.auto_flagged, 2);
        let names: Vec<String> = store
            .review_entries()
            .into_iter()
            .map(|r| r.raw_institution_name)
            .collect();
        assert_eq!(names, vec!["Acme & Co Savings", "ACME AND CO SAVINGS."]);
        assert!(records.iter().all(|r| !r.is_resolved()));
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_unresolved() {
        let store = store();
        store.fail_identity_lookups(true);
        let resolver = resolver(store.clone());

        let outcome = resolver
            .resolve("Zopa Bank", &ResolutionContext::default())
            .await;
        assert!(outcome.is_none());
        let stats = resolver.lifetime_stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.no_matches, 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = store();
        store.set_lookup_delay(Duration::from_millis(500));
        let resolver = resolver(store.clone());

        let outcome = resolver
            .resolve("Tandem Bank", &ResolutionContext::default())
            .await;
        assert!(outcome.is_none());
        assert_eq!(resolver.lifetime_stats().failures, 1);
    }

    #[test]
    fn test_grouping_keeps_first_seen_order() {
        let mut a = crate::domain::test_support::record("Zopa Bank", Some(4.0));
        a.provenance.batch_index = 0;
        let b = crate::domain::test_support::record("Tandem Bank", Some(3.0));
        let c = crate::domain::test_support::record(" Zopa Bank ", Some(5.0));
        let records = vec![a, b, c];

        let groups = group_by_institution(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Zopa Bank");
        assert_eq!(groups[0].indices, vec![0, 2]);

        let ctx = ResolutionContext::for_group(&records, &groups[0].indices);
        assert_eq!(ctx.product_count, 2);
        assert_eq!(ctx.average_rate, Some(4.5));
    }
}
