use std::sync::Arc;
use tracing::warn;

use crate::domain::NormalizedRecord;
use crate::pipeline::processing::identity::{
    IdentityMatch, IdentityResolver, ResolutionContext, ResolutionStats,
};

/// Use case for resolving institution names to regulator identities
pub struct ResolutionUseCase {
    resolver: Arc<IdentityResolver>,
}

impl ResolutionUseCase {
    pub fn new(resolver: Arc<IdentityResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve a single name, as a user lookup would
    pub async fn resolve_name(&self, name: &str, source: Option<&str>) -> Option<IdentityMatch> {
        let context = ResolutionContext {
            source: source.map(|s| s.to_string()),
            product_count: 1,
            average_rate: None,
        };
        self.resolver.resolve(name, &context).await
    }

    /// Annotate every record of a normalized batch
    pub async fn annotate(&self, records: &mut [NormalizedRecord]) -> ResolutionStats {
        let stats = self.resolver.resolve_for_batch(records).await;

        let unannotated = records.iter().filter(|r| r.identity.is_none()).count();
        if unannotated > 0 {
            warn!("{} records left without an identity annotation", unannotated);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::PipelineServices;
    use crate::common::SystemClock;
    use crate::config::PipelineConfig;
    use crate::domain::{IdentityReferenceEntry, MatchMethod};
    use crate::pipeline::storage::InMemoryReferenceStore;

    #[tokio::test]
    async fn test_annotate_fans_out_per_name() {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.add_identity(IdentityReferenceEntry {
            regulator_id: "204550".to_string(),
            canonical_name: "Tandem Bank Limited".to_string(),
            searchable_name: "TANDEM BANK".to_string(),
            base_confidence: 1.0,
            match_type: "canonical".to_string(),
        });
        let services =
            PipelineServices::new(&PipelineConfig::default(), store.clone(), Arc::new(SystemClock));
        let use_case = ResolutionUseCase::new(services.resolver.clone());

        let mut records = vec![
            crate::domain::test_support::record("Tandem Bank", Some(4.5)),
            crate::domain::test_support::record("Mystery Mutual", Some(3.0)),
            crate::domain::test_support::record("Tandem Bank", Some(4.6)),
        ];
        let stats = use_case.annotate(&mut records).await;

        assert_eq!(stats.distinct_names, 2);
        assert_eq!(stats.records_annotated, 3);
        assert_eq!(stats.exact_hits, 1);
        assert_eq!(records[0].identity, records[2].identity);
        assert!(records[0].is_resolved());
        assert_eq!(
            records[1].identity.as_ref().map(|i| i.match_method),
            Some(MatchMethod::NoMatch)
        );
        assert_eq!(store.review_entries().len(), 1);
        assert!(store.review_entries()[0].notes.contains("products: 1"));
    }

    #[tokio::test]
    async fn test_resolve_name_reports_no_match() {
        let store = Arc::new(InMemoryReferenceStore::new());
        let services =
            PipelineServices::new(&PipelineConfig::default(), store, Arc::new(SystemClock));
        let use_case = ResolutionUseCase::new(services.resolver.clone());
        assert!(use_case.resolve_name("Nobody Bank", Some("cli")).await.is_none());
    }
}
