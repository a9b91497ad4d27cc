//! Schema normalization: maps each source's raw listing onto the canonical
//! `NormalizedRecord`. One record out for every record in; unreadable fields
//! become `None` with a warning, never an error.

pub mod fields;
pub mod profiles;
pub mod registry;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::common::Clock;
use crate::constants::{
    canonical_source_tag, MAX_DERIVED_TERM_MONTHS, MIN_DERIVED_TERM_MONTHS, UNKNOWN_INSTITUTION,
};
use crate::domain::{AccountCategory, NormalizedRecord, RawRecord, RecordProvenance};
use crate::fingerprint::raw_record_ref;
use crate::observability::metrics;
use crate::pipeline::processing::platform::PlatformCanonicalizer;

use fields::{
    classify_category, first_text, months_between, parse_end_date, parse_fscs, parse_frequency,
    parse_money, parse_period, parse_rate, parse_timestamp, text,
};
pub use profiles::{CategoryPolicy, PlatformRule, SourceProfile, TermRule};
pub use registry::NormalizationRegistry;

/// Warnings collected while reading one record, tagged by field
#[derive(Debug, Default)]
struct Warnings(Vec<String>);

impl Warnings {
    fn push(&mut self, field: &str, message: String) {
        metrics::normalize::warning_logged(field);
        self.0.push(format!("{}: {}", field, message));
    }
}

pub struct SchemaNormalizer {
    registry: NormalizationRegistry,
    platforms: Arc<PlatformCanonicalizer>,
    clock: Arc<dyn Clock>,
}

impl SchemaNormalizer {
    pub fn new(
        registry: NormalizationRegistry,
        platforms: Arc<PlatformCanonicalizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            platforms,
            clock,
        }
    }

    pub fn registry(&self) -> &NormalizationRegistry {
        &self.registry
    }

    /// Extraction method recorded in the output envelope for `source_tag`
    pub fn extraction_method(&self, source_tag: &str) -> &'static str {
        self.registry.resolve(source_tag).0.extraction_method
    }

    /// Normalize a batch of raw records from one source
    pub async fn normalize(&self, raw_records: &[RawRecord], source_tag: &str) -> Vec<NormalizedRecord> {
        let started = Instant::now();
        let (profile, known) = self.registry.resolve(source_tag);
        let source = if known {
            profile.tag.to_string()
        } else {
            let tag = canonical_source_tag(source_tag);
            warn!(
                "No profile for source '{}', normalizing {} records with the generic profile",
                tag,
                raw_records.len()
            );
            metrics::normalize::unknown_source(&tag);
            tag
        };

        let now = self.clock.now();
        let mut records = Vec::with_capacity(raw_records.len());
        for (index, raw) in raw_records.iter().enumerate() {
            let record = self.normalize_one(raw, index, profile, &source, now).await;
            metrics::normalize::record_normalized(&source);
            records.push(record);
        }

        metrics::normalize::batch_processed(records.len());
        let with_warnings = records.iter().filter(|r| !r.warnings.is_empty()).count();
        info!(
            "Normalized {} {} records in {:.2}ms ({} with warnings)",
            records.len(),
            source,
            started.elapsed().as_secs_f64() * 1000.0,
            with_warnings
        );
        records
    }

    async fn normalize_one(
        &self,
        raw: &RawRecord,
        index: usize,
        profile: &SourceProfile,
        source: &str,
        now: DateTime<Utc>,
    ) -> NormalizedRecord {
        let mut warnings = Warnings::default();

        let institution_name = first_text(raw, profile.institution_fields).unwrap_or_else(|| {
            warnings.push("institution_name", "no candidate field present, using placeholder".to_string());
            UNKNOWN_INSTITUTION.to_string()
        });

        let captured_at = first_text(raw, profile.scraped_at_fields)
            .and_then(|s| parse_timestamp(&s))
            .unwrap_or(now);

        let raw_label = platform_label(raw, profile);
        let platform = self
            .platforms
            .canonicalize(&raw_label, source)
            .await
            .into_identity(&raw_label);

        let term_text = first_text(raw, profile.term_fields);
        let notice_text = first_text(raw, profile.notice_fields);
        let account_category = categorize(raw, profile, term_text.as_deref(), notice_text.as_deref())
            .unwrap_or_else(|| {
                warnings.push("account_category", "no category signal, assumed easy_access".to_string());
                AccountCategory::EasyAccess
            });

        let term_period = term_text.as_deref().and_then(parse_period);
        let notice_period = notice_text.as_deref().and_then(parse_period);
        let notice_source = if account_category == AccountCategory::Notice {
            notice_period.or(term_period)
        } else {
            notice_period
        };
        let notice_days = notice_source.and_then(|p| {
            let days = p.as_days();
            if days.is_none() {
                warnings.push("notice_days", format!("{:?} is too long to count in days", p));
            }
            days
        });
        let mut term_months = if account_category == AccountCategory::Notice {
            None
        } else {
            term_period.and_then(|p| p.as_months())
        };

        if term_months.is_none()
            && profile.term_rule == TermRule::EndDate
            && matches!(
                account_category,
                AccountCategory::FixedTerm | AccountCategory::CashIsa
            )
        {
            term_months = derive_term(raw, profile, captured_at, &mut warnings);
        }

        let aer_rate = read_rate(raw, profile.aer_fields, "aer_rate", &mut warnings);
        let gross_rate = read_rate(raw, profile.gross_fields, "gross_rate", &mut warnings);
        let min_deposit = read_money(raw, profile.min_deposit_fields, "min_deposit", &mut warnings);
        let max_deposit = read_money(raw, profile.max_deposit_fields, "max_deposit", &mut warnings);

        let fscs_protected = profile
            .fscs_fields
            .iter()
            .find_map(|f| raw.get(*f))
            .and_then(parse_fscs)
            .unwrap_or(true);

        let interest_frequency =
            first_text(raw, profile.frequency_fields).and_then(|s| parse_frequency(&s));
        let special_features = first_text(raw, profile.feature_fields);

        let mut record = NormalizedRecord {
            institution_name,
            platform,
            account_category,
            aer_rate,
            gross_rate,
            term_months,
            notice_days,
            min_deposit,
            max_deposit,
            fscs_protected,
            interest_frequency,
            special_features,
            captured_at,
            provenance: RecordProvenance {
                source: source.to_string(),
                raw_ref: raw_record_ref(source, raw),
                batch_index: index,
            },
            identity: None,
            warnings: warnings.0,
        };

        let before = record.warnings.len();
        record.enforce_invariants();
        for _ in before..record.warnings.len() {
            metrics::normalize::warning_logged("invariant");
        }

        if !record.warnings.is_empty() {
            debug!(
                "Record {} from {}: {}",
                index,
                source,
                record.warnings.join("; ")
            );
        }
        record
    }
}

fn platform_label(raw: &RawRecord, profile: &SourceProfile) -> String {
    match &profile.platform {
        PlatformRule::Fixed(name) => name.to_string(),
        PlatformRule::Field { fields, default } => {
            first_text(raw, fields).unwrap_or_else(|| default.to_string())
        }
        PlatformRule::Embedded { fields, default } => fields
            .iter()
            .filter_map(|f| text(raw, f))
            .find_map(|t| PlatformRule::extract_embedded(&t))
            .unwrap_or_else(|| default.to_string()),
    }
}

/// Category from the source's signals, strongest first: explicit field,
/// term wording, then title and page section in the order the policy sets.
fn categorize(
    raw: &RawRecord,
    profile: &SourceProfile,
    term_text: Option<&str>,
    notice_text: Option<&str>,
) -> Option<AccountCategory> {
    let explicit = first_text(raw, profile.category_fields).and_then(|s| classify_category(&s));
    if explicit.is_some() {
        return explicit;
    }

    let from_term = term_text.and_then(classify_category).or_else(|| {
        notice_text
            .and_then(parse_period)
            .map(|_| AccountCategory::Notice)
    });
    if from_term.is_some() {
        return from_term;
    }

    let title = first_text(raw, profile.title_fields).and_then(|s| classify_category(&s));
    let section = first_text(raw, profile.section_fields).and_then(|s| classify_category(&s));
    if profile.category_policy.title_overrides_section {
        title.or(section)
    } else {
        section.or(title)
    }
}

/// Term in whole months between the capture date and an end date written in
/// free text, accepted only within the plausible range
fn derive_term(
    raw: &RawRecord,
    profile: &SourceProfile,
    captured_at: DateTime<Utc>,
    warnings: &mut Warnings,
) -> Option<u32> {
    let end = profile
        .term_fields
        .iter()
        .filter_map(|f| text(raw, f))
        .find_map(|t| parse_end_date(&t))?;

    match months_between(captured_at.date_naive(), end) {
        Some(months) if (MIN_DERIVED_TERM_MONTHS..=MAX_DERIVED_TERM_MONTHS).contains(&months) => {
            Some(months)
        }
        other => {
            warnings.push(
                "term_months",
                format!(
                    "end date {} gives {:?} months, outside {}-{}",
                    end, other, MIN_DERIVED_TERM_MONTHS, MAX_DERIVED_TERM_MONTHS
                ),
            );
            None
        }
    }
}

fn read_rate(raw: &RawRecord, fields: &[&str], label: &str, warnings: &mut Warnings) -> Option<f64> {
    let value = first_text(raw, fields)?;
    let parsed = parse_rate(&value);
    if parsed.is_none() {
        warnings.push(label, format!("could not read '{}'", value));
    }
    parsed
}

fn read_money(raw: &RawRecord, fields: &[&str], label: &str, warnings: &mut Warnings) -> Option<f64> {
    let value = first_text(raw, fields)?;
    let parsed = parse_money(&value);
    if parsed.is_none() {
        warnings.push(label, format!("could not read '{}'", value));
    }
    parsed
}
