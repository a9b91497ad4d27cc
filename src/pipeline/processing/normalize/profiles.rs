//! Built-in source profiles: which raw fields each source uses and how its
//! text conventions are read.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{
    AJ_BELL_SOURCE, DIRECT_PLATFORM, FLAGSTONE_SOURCE, GENERIC_SOURCE, HARGREAVES_LANSDOWN_SOURCE,
    MONEYFACTS_SOURCE,
};

static EMBEDDED_PLATFORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:via|through)\s+([A-Za-z0-9][A-Za-z0-9&' .-]*?)\s*(?:[,.;:()]|$)")
        .expect("valid regex")
});

/// Where a record's platform label comes from
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformRule {
    /// Every listing from this source is sold on one platform
    Fixed(&'static str),
    /// Label held in a dedicated field
    Field {
        fields: &'static [&'static str],
        default: &'static str,
    },
    /// Label embedded in free text ("available via Raisin")
    Embedded {
        fields: &'static [&'static str],
        default: &'static str,
    },
}

impl PlatformRule {
    /// Pull the platform name out of a free-text blurb
    pub fn extract_embedded(text: &str) -> Option<String> {
        EMBEDDED_PLATFORM
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// How the term of a fixed product is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRule {
    /// "12 months", "2 years"
    Duration,
    /// An end date in free text; the term is measured from the scrape date
    EndDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryPolicy {
    /// Let free-text title signals win over the page section
    pub title_overrides_section: bool,
}

/// Table-driven description of one source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub tag: &'static str,
    pub extraction_method: &'static str,
    pub institution_fields: &'static [&'static str],
    pub platform: PlatformRule,
    pub category_fields: &'static [&'static str],
    pub title_fields: &'static [&'static str],
    pub section_fields: &'static [&'static str],
    pub term_fields: &'static [&'static str],
    pub notice_fields: &'static [&'static str],
    pub term_rule: TermRule,
    pub aer_fields: &'static [&'static str],
    pub gross_fields: &'static [&'static str],
    pub min_deposit_fields: &'static [&'static str],
    pub max_deposit_fields: &'static [&'static str],
    pub fscs_fields: &'static [&'static str],
    pub frequency_fields: &'static [&'static str],
    pub feature_fields: &'static [&'static str],
    pub scraped_at_fields: &'static [&'static str],
    pub category_policy: CategoryPolicy,
}

const INSTITUTION: &[&str] = &["bankName", "institution", "provider", "bank", "name"];
const CATEGORY: &[&str] = &["accountType", "account_type", "category"];
const TITLE: &[&str] = &["accountName", "productName", "title"];
const SECTION: &[&str] = &["section", "pageSection"];
const TERM: &[&str] = &["term", "termLength", "duration"];
const NOTICE: &[&str] = &["notice", "noticePeriod"];
const AER: &[&str] = &["aer", "aerRate", "rate"];
const GROSS: &[&str] = &["gross", "grossRate"];
const MIN_DEPOSIT: &[&str] = &["minDeposit", "min_deposit", "minimumDeposit"];
const MAX_DEPOSIT: &[&str] = &["maxDeposit", "max_deposit", "maximumDeposit"];
const FSCS: &[&str] = &["fscs", "fscsProtected"];
const FREQUENCY: &[&str] = &["interestPaid", "interestFrequency", "frequency"];
const FEATURES: &[&str] = &["features", "specialFeatures", "notes"];
const SCRAPED_AT: &[&str] = &["scrapedAt", "scraped_at", "capturedAt"];

impl SourceProfile {
    /// Profile used for any tag without a dedicated one
    pub fn generic() -> Self {
        Self {
            tag: GENERIC_SOURCE,
            extraction_method: "generic_fields",
            institution_fields: INSTITUTION,
            platform: PlatformRule::Field {
                fields: &["platform", "platformName"],
                default: DIRECT_PLATFORM,
            },
            category_fields: CATEGORY,
            title_fields: TITLE,
            section_fields: SECTION,
            term_fields: TERM,
            notice_fields: NOTICE,
            term_rule: TermRule::Duration,
            aer_fields: AER,
            gross_fields: GROSS,
            min_deposit_fields: MIN_DEPOSIT,
            max_deposit_fields: MAX_DEPOSIT,
            fscs_fields: FSCS,
            frequency_fields: FREQUENCY,
            feature_fields: FEATURES,
            scraped_at_fields: SCRAPED_AT,
            category_policy: CategoryPolicy::default(),
        }
    }

    /// Aggregator tables: the selling platform is named in the product blurb
    /// and product titles are more reliable than the page section.
    pub fn moneyfacts() -> Self {
        Self {
            tag: MONEYFACTS_SOURCE,
            extraction_method: "aggregator_table",
            institution_fields: &["bankName", "provider", "institution"],
            platform: PlatformRule::Embedded {
                fields: &["platformText", "availability", "notes", "accountName"],
                default: DIRECT_PLATFORM,
            },
            category_policy: CategoryPolicy {
                title_overrides_section: true,
            },
            ..Self::generic()
        }
    }

    pub fn flagstone() -> Self {
        Self {
            tag: FLAGSTONE_SOURCE,
            extraction_method: "platform_listing",
            institution_fields: &["bankName", "bank", "institution"],
            platform: PlatformRule::Fixed("Flagstone"),
            ..Self::generic()
        }
    }

    /// Fixed products carry "fixed until <date>" rather than a duration
    pub fn hargreaves_lansdown() -> Self {
        Self {
            tag: HARGREAVES_LANSDOWN_SOURCE,
            extraction_method: "platform_listing",
            institution_fields: &["bankName", "bank", "provider"],
            platform: PlatformRule::Fixed("Hargreaves Lansdown"),
            term_fields: &["term", "maturity", "productName", "title"],
            term_rule: TermRule::EndDate,
            ..Self::generic()
        }
    }

    pub fn ajbell() -> Self {
        Self {
            tag: AJ_BELL_SOURCE,
            extraction_method: "platform_listing",
            institution_fields: &["bankName", "bank", "provider"],
            platform: PlatformRule::Fixed("AJ Bell"),
            ..Self::generic()
        }
    }

    pub fn built_in() -> Vec<SourceProfile> {
        vec![
            Self::moneyfacts(),
            Self::flagstone(),
            Self::hargreaves_lansdown(),
            Self::ajbell(),
            Self::generic(),
        ]
    }
}
