//! Canonical data shapes shared by the normalizer, the platform canonicalizer
//! and the identity resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw listing as emitted by a scraper: an opaque, source-specific field bag
pub type RawRecord = serde_json::Value;

/// Product category of a savings account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountCategory {
    EasyAccess,
    Notice,
    FixedTerm,
    CashIsa,
    LimitedAccess,
}

impl AccountCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountCategory::EasyAccess => "easy_access",
            AccountCategory::Notice => "notice",
            AccountCategory::FixedTerm => "fixed_term",
            AccountCategory::CashIsa => "cash_isa",
            AccountCategory::LimitedAccess => "limited_access",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestFrequency {
    Monthly,
    Quarterly,
    Annually,
    OnMaturity,
}

/// How an institution identity was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Partial,
    Fuzzy,
    NoMatch,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Partial => "partial",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::NoMatch => "no_match",
        }
    }
}

/// Canonical platform identity with the label it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformIdentity {
    pub canonical_id: String,
    pub display_name: Option<String>,
    /// The label exactly as found in the source
    pub raw_label: String,
    pub matched: bool,
}

/// Identity annotation written by the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAnnotation {
    pub regulator_id: Option<String>,
    pub canonical_institution_name: Option<String>,
    pub confidence: f64,
    pub match_method: MatchMethod,
    pub notes: Option<String>,
}

/// Lineage back to the raw record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProvenance {
    /// Canonical source tag the record was extracted under
    pub source: String,
    /// SHA-256 content address of the raw record
    pub raw_ref: String,
    /// Position of the raw record in its input batch
    pub batch_index: usize,
}

/// A savings product in the canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub institution_name: String,
    pub platform: PlatformIdentity,
    pub account_category: AccountCategory,
    pub aer_rate: Option<f64>,
    pub gross_rate: Option<f64>,
    pub term_months: Option<u32>,
    pub notice_days: Option<u32>,
    pub min_deposit: Option<f64>,
    pub max_deposit: Option<f64>,
    pub fscs_protected: bool,
    pub interest_frequency: Option<InterestFrequency>,
    pub special_features: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub provenance: RecordProvenance,
    /// Set once by the identity resolver
    pub identity: Option<IdentityAnnotation>,
    /// Fields that were dropped or corrected during normalization
    pub warnings: Vec<String>,
}

impl NormalizedRecord {
    /// Enforce the cross-field invariants of the canonical schema.
    ///
    /// Offending values are nulled and a warning is recorded; nothing is
    /// ever rejected outright.
    pub fn enforce_invariants(&mut self) {
        for (label, rate) in [("aer_rate", &mut self.aer_rate), ("gross_rate", &mut self.gross_rate)] {
            if let Some(value) = *rate {
                if !(0.0..=100.0).contains(&value) || !value.is_finite() {
                    *rate = None;
                    self.warnings.push(format!("{} {} outside 0-100, dropped", label, value));
                }
            }
        }

        if let (Some(min), Some(max)) = (self.min_deposit, self.max_deposit) {
            if min > max {
                self.min_deposit = None;
                self.max_deposit = None;
                self.warnings.push(format!(
                    "deposit bounds rejected: min {} exceeds max {}",
                    min, max
                ));
            }
        }

        // Term and notice are mutually exclusive; the category decides which survives
        if self.term_months.is_some() && self.notice_days.is_some() {
            if self.account_category == AccountCategory::Notice {
                self.term_months = None;
            } else {
                self.notice_days = None;
            }
            self.warnings
                .push("both term and notice present, kept the one matching the category".to_string());
        }
    }

    /// True when the record carries a usable regulator identity
    pub fn is_resolved(&self) -> bool {
        self.identity
            .as_ref()
            .map(|i| i.regulator_id.is_some() && i.confidence > 0.0)
            .unwrap_or(false)
    }
}

/// Row of the platform reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformReferenceEntry {
    pub raw_variant: String,
    pub canonical_id: String,
    pub display_name: String,
    pub platform_type: String,
    pub active: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Row of the institution identity reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityReferenceEntry {
    pub regulator_id: String,
    pub canonical_name: String,
    pub searchable_name: String,
    pub base_confidence: f64,
    #[serde(default = "default_match_type")]
    pub match_type: String,
}

fn default_match_type() -> String {
    "canonical".to_string()
}

/// Unresolved institution name awaiting human research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub raw_institution_name: String,
    pub regulator_id: Option<String>,
    pub canonical_name: Option<String>,
    pub confidence: f64,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl ReviewQueueEntry {
    pub fn unresolved(raw_institution_name: &str, notes: String, created_at: DateTime<Utc>) -> Self {
        Self {
            raw_institution_name: raw_institution_name.to_string(),
            regulator_id: None,
            canonical_name: None,
            confidence: 0.0,
            notes,
            created_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Minimal normalized record for unit tests
    pub(crate) fn record(institution: &str, aer_rate: Option<f64>) -> NormalizedRecord {
        NormalizedRecord {
            institution_name: institution.to_string(),
            platform: PlatformIdentity {
                canonical_id: "direct".to_string(),
                display_name: None,
                raw_label: "Direct".to_string(),
                matched: true,
            },
            account_category: AccountCategory::EasyAccess,
            aer_rate,
            gross_rate: None,
            term_months: None,
            notice_days: None,
            min_deposit: None,
            max_deposit: None,
            fscs_protected: true,
            interest_frequency: None,
            special_features: None,
            captured_at: Utc::now(),
            provenance: RecordProvenance {
                source: "generic".to_string(),
                raw_ref: format!("sha256:{}", "0".repeat(64)),
                batch_index: 0,
            },
            identity: None,
            warnings: Vec::new(),
        }
    }
}
