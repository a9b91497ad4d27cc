/// Source tag constants to ensure consistency across the codebase.
/// User-facing aliases are mapped onto these canonical tags before profile lookup.

pub const MONEYFACTS_SOURCE: &str = "moneyfacts";
pub const FLAGSTONE_SOURCE: &str = "flagstone";
pub const HARGREAVES_LANSDOWN_SOURCE: &str = "hargreaves_lansdown";
pub const AJ_BELL_SOURCE: &str = "ajbell";
pub const GENERIC_SOURCE: &str = "generic";

/// Placeholder institution used when no name candidate is present.
/// The identity resolver treats it as unconditionally unresolved.
pub const UNKNOWN_INSTITUTION: &str = "Unknown Bank";

/// Platform label for products bought straight from the institution
pub const DIRECT_PLATFORM: &str = "Direct";

pub const DEFAULT_PLATFORM_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 2_000;
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_PARTIAL_MULTIPLIER: f64 = 0.9;
pub const DEFAULT_FUZZY_MULTIPLIER: f64 = 0.8;

/// Accepted range, in months, for terms derived from a free-text end date
pub const MIN_DERIVED_TERM_MONTHS: u32 = 3;
pub const MAX_DERIVED_TERM_MONTHS: u32 = 120;

/// Convert a user-supplied source name to the canonical source tag
pub fn canonical_source_tag(source: &str) -> String {
    let lowered = source.trim().to_lowercase().replace(['-', ' '], "_");
    match lowered.as_str() {
        "mf" | "money_facts" => MONEYFACTS_SOURCE.to_string(),
        "hl" | "hargreaves" | "hl_active_savings" => HARGREAVES_LANSDOWN_SOURCE.to_string(),
        "aj_bell" | "ajb" => AJ_BELL_SOURCE.to_string(),
        "flagstone_im" => FLAGSTONE_SOURCE.to_string(),
        _ => lowered,
    }
}

/// Get all built-in source tags
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![
        MONEYFACTS_SOURCE,
        FLAGSTONE_SOURCE,
        HARGREAVES_LANSDOWN_SOURCE,
        AJ_BELL_SOURCE,
        GENERIC_SOURCE,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_map_to_canonical_tags() {
        assert_eq!(canonical_source_tag("HL"), HARGREAVES_LANSDOWN_SOURCE);
        assert_eq!(canonical_source_tag("aj-bell"), AJ_BELL_SOURCE);
        assert_eq!(canonical_source_tag(" Moneyfacts "), MONEYFACTS_SOURCE);
        assert_eq!(canonical_source_tag("something_new"), "something_new");
    }
}
