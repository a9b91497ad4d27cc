use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};

use savings_pipeline::app::ports::EnvelopeOutputPort;
use savings_pipeline::app::run_use_case::RunUseCase;
use savings_pipeline::app::services::PipelineServices;
use savings_pipeline::common::{Clock, ManualClock};
use savings_pipeline::config::PipelineConfig;
use savings_pipeline::domain::{AccountCategory, MatchMethod, RawRecord};
use savings_pipeline::envelope::OutputEnvelope;
use savings_pipeline::pipeline::processing::identity::ResolutionContext;
use savings_pipeline::pipeline::storage::{InMemoryReferenceStore, ReferenceSeed};

const REFERENCE: &str = r#"
[[platform]]
raw_variant = "Direct"
canonical_id = "direct"
display_name = "Direct"
platform_type = "direct"
active = true

[[platform]]
raw_variant = "Raisin"
canonical_id = "raisin"
display_name = "Raisin UK"
platform_type = "aggregator"
active = true

[[institution]]
regulator_id = "718155"
canonical_name = "Zopa Bank Limited"
searchable_name = "ZOPA BANK"
base_confidence = 1.0

[[institution]]
regulator_id = "475346"
canonical_name = "Gatehouse Bank plc"
searchable_name = "Gatehouse Bank plc"
base_confidence = 1.0

[[institution]]
regulator_id = "204550"
canonical_name = "Tandem Bank Limited"
searchable_name = "TANDEM BANK PLC"
base_confidence = 1.0
"#;

/// Output port that keeps every envelope in memory
#[derive(Clone, Default)]
struct CapturedOutput {
    envelopes: Arc<Mutex<Vec<OutputEnvelope>>>,
}

#[async_trait]
impl EnvelopeOutputPort for CapturedOutput {
    async fn write_envelope(&self, envelope: &OutputEnvelope) -> anyhow::Result<()> {
        self.envelopes.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryReferenceStore>,
    services: PipelineServices,
    clock: Arc<dyn Clock>,
}

impl Harness {
    fn new() -> Self {
        let seed = ReferenceSeed::from_toml_str(REFERENCE).unwrap();
        Self::with_store(Arc::new(InMemoryReferenceStore::from_seed(&seed)))
    }

    fn with_store(store: Arc<InMemoryReferenceStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 15, 9, 0, 0).unwrap(),
        ));
        let services = PipelineServices::new(&PipelineConfig::default(), store.clone(), clock.clone());
        Self {
            store,
            services,
            clock,
        }
    }

    fn run_use_case(&self, output: CapturedOutput) -> RunUseCase {
        RunUseCase::new(
            self.services.normalizer.clone(),
            self.services.resolver.clone(),
            Box::new(output),
            self.clock.clone(),
        )
    }
}

fn batch() -> Vec<RawRecord> {
    vec![
        json!({"bankName": "Tandem Bank Plc", "aer": "4.50%", "term": "12 months"}),
        json!({"bankName": "ZOPA BANK LTD", "aer": "4.25", "accountType": "Easy Access", "platform": "Raisin"}),
        json!({"bankName": "Gatehouse Bnak", "aer": 3.9, "notice": "95 days"}),
        json!({"bankName": "Totally Fictional Micro-Bank", "aer": "N/A"}),
        json!({"bankName": "ZOPA BANK LTD", "aer": "4.10%", "term": "2 years"}),
    ]
}

#[tokio::test]
async fn scenario_a_aggregator_row_is_normalized() -> Result<()> {
    let harness = Harness::new();
    let raw = vec![json!({"bankName": "Tandem Bank Plc", "aer": "4.50%", "term": "12 months"})];

    let records = harness.services.normalizer.normalize(&raw, "generic").await;

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.institution_name, "Tandem Bank Plc");
    assert_eq!(record.account_category, AccountCategory::FixedTerm);
    assert_eq!(record.aer_rate, Some(4.5));
    assert_eq!(record.term_months, Some(12));
    assert_eq!(record.notice_days, None);
    assert!(record.platform.matched);
    assert_eq!(record.platform.canonical_id, "direct");
    assert!(record.provenance.raw_ref.starts_with("sha256:"));
    Ok(())
}

#[tokio::test]
async fn scenario_b_suffix_variant_resolves_as_partial() {
    let harness = Harness::new();

    let found = harness
        .services
        .resolver
        .resolve("ZOPA BANK LTD", &ResolutionContext::default())
        .await
        .expect("partial match");

    assert_eq!(found.regulator_id, "718155");
    assert_eq!(found.canonical_name, "Zopa Bank Limited");
    assert_eq!(found.match_method, MatchMethod::Partial);
    assert!((found.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn scenario_c_typo_resolves_as_fuzzy() {
    let harness = Harness::new();

    let found = harness
        .services
        .resolver
        .resolve("Gatehouse Bnak", &ResolutionContext::default())
        .await
        .expect("fuzzy match");

    // "GATEHOUSE BNAK" vs "GATEHOUSE BANK" once the suffix is stripped
    let similarity = 1.0 - 2.0 / 14.0;
    assert!(similarity >= 0.7);
    assert_eq!(found.regulator_id, "475346");
    assert_eq!(found.match_method, MatchMethod::Fuzzy);
    assert!((found.confidence - similarity * 1.0 * 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn scenario_d_unknown_name_is_queued_exactly_once() {
    let harness = Harness::new();
    let context = ResolutionContext {
        source: Some("moneyfacts".to_string()),
        product_count: 2,
        average_rate: Some(4.2),
    };

    assert!(harness
        .services
        .resolver
        .resolve("Totally Fictional Micro-Bank", &context)
        .await
        .is_none());
    assert!(harness
        .services
        .resolver
        .resolve("Totally Fictional Micro-Bank", &context)
        .await
        .is_none());

    // A fresh resolver over the same store must not queue it again
    let second = Harness::with_store(harness.store.clone());
    assert!(second
        .services
        .resolver
        .resolve("Totally Fictional Micro-Bank", &context)
        .await
        .is_none());

    let reviews = harness.store.review_entries();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].raw_institution_name, "Totally Fictional Micro-Bank");
    assert_eq!(reviews[0].confidence, 0.0);
    assert!(reviews[0].regulator_id.is_none());
    assert!(reviews[0].notes.contains("moneyfacts"));
}

#[tokio::test]
async fn scenario_e_inverted_deposit_bounds_are_nulled() {
    let harness = Harness::new();
    let raw = vec![json!({
        "bankName": "Zopa Bank",
        "aer": "4.0%",
        "accountType": "Easy Access",
        "minDeposit": 5000,
        "maxDeposit": "£1,000"
    })];

    let records = harness.services.normalizer.normalize(&raw, "generic").await;

    assert_eq!(records[0].min_deposit, None);
    assert_eq!(records[0].max_deposit, None);
    assert!(records[0].warnings.iter().any(|w| w.contains("deposit bounds")));
}

#[tokio::test]
async fn full_run_annotates_every_record() -> Result<()> {
    let harness = Harness::new();
    let output = CapturedOutput::default();
    let use_case = harness.run_use_case(output.clone());

    let envelope = use_case.run(&batch(), "generic").await?;

    assert_eq!(envelope.record_count, 5);
    assert_eq!(output.envelopes.lock().unwrap().len(), 1);
    for (i, record) in envelope.records.iter().enumerate() {
        assert_eq!(record.provenance.batch_index, i);
        let identity = record.identity.as_ref().expect("every record is annotated");
        if identity.match_method == MatchMethod::NoMatch {
            assert!(identity.regulator_id.is_none());
            assert_eq!(identity.confidence, 0.0);
            assert!(harness
                .store
                .review_entries()
                .iter()
                .any(|r| r.raw_institution_name == record.institution_name));
        } else {
            assert!(record.is_resolved());
        }
    }

    // Both Zopa rows share one lookup and one annotation
    assert_eq!(envelope.records[1].identity, envelope.records[4].identity);
    assert_eq!(envelope.records[1].platform.canonical_id, "raisin");
    assert_eq!(envelope.records[2].account_category, AccountCategory::Notice);
    assert_eq!(envelope.records[2].notice_days, Some(95));
    assert_eq!(envelope.records[4].term_months, Some(24));
    assert_eq!(envelope.records[3].aer_rate, None);

    let stats = envelope.resolution.expect("run records resolution stats");
    assert_eq!(stats.distinct_names, 4);
    assert_eq!(stats.records_annotated, 5);
    assert_eq!(stats.exact_hits, 1);
    assert_eq!(stats.partial_hits, 1);
    assert_eq!(stats.fuzzy_hits, 1);
    assert_eq!(stats.no_matches, 1);
    assert_eq!(stats.auto_flagged, 1);
    Ok(())
}

#[tokio::test]
async fn rerunning_a_batch_is_deterministic_and_idempotent() -> Result<()> {
    let harness = Harness::new();
    let first = harness.run_use_case(CapturedOutput::default()).run(&batch(), "generic").await?;
    let second = harness.run_use_case(CapturedOutput::default()).run(&batch(), "generic").await?;

    assert_eq!(first.records, second.records);
    assert_eq!(harness.store.review_entries().len(), 1);

    let stats = second.resolution.expect("stats");
    assert_eq!(stats.cache_hits, 4);
    assert_eq!(stats.auto_flagged, 0);
    Ok(())
}

#[tokio::test]
async fn confidence_orders_exact_over_partial_over_fuzzy() {
    let harness = Harness::new();
    let context = ResolutionContext::default();
    let resolver = &harness.services.resolver;

    let exact = resolver.resolve("Tandem Bank PLC", &context).await.expect("exact");
    let partial = resolver.resolve("Zopa Bank Ltd", &context).await.expect("partial");
    let fuzzy = resolver.resolve("Gatehouse Bnak", &context).await.expect("fuzzy");

    assert_eq!(exact.match_method, MatchMethod::Exact);
    assert!(exact.confidence > partial.confidence);
    assert!(partial.confidence > fuzzy.confidence);
}

#[tokio::test]
async fn store_outage_leaves_records_unresolved_but_present() -> Result<()> {
    let harness = Harness::new();
    harness.store.fail_identity_lookups(true);

    let envelope = harness
        .run_use_case(CapturedOutput::default())
        .run(&batch(), "generic")
        .await?;

    assert_eq!(envelope.record_count, 5);
    assert!(envelope.records.iter().all(|r| !r.is_resolved()));
    assert_eq!(envelope.resolution.expect("stats").failures, 4);
    Ok(())
}

#[tokio::test]
async fn unknown_source_keeps_its_tag_in_provenance() {
    let harness = Harness::new();
    let raw = vec![json!({"bankName": "Zopa Bank", "aer": "4%", "accountType": "easy access"})];

    let records = harness.services.normalizer.normalize(&raw, "Brand New Site").await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provenance.source, "brand_new_site");
}

#[tokio::test]
async fn unknown_platform_is_registered_not_dropped() {
    let harness = Harness::new();
    let raw = vec![json!({"bankName": "Zopa Bank", "platform": "Shiny Savings App", "accountType": "easy access"})];

    let records = harness.services.normalizer.normalize(&raw, "generic").await;

    assert!(!records[0].platform.matched);
    assert_eq!(records[0].platform.raw_label, "Shiny Savings App");
    let registered = harness.store.platform_entries();
    let entry = registered
        .iter()
        .find(|e| e.raw_variant == "Shiny Savings App")
        .expect("auto-registered variant");
    assert!(!entry.active);
}
