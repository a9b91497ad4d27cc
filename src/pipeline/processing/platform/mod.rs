//! Platform canonicalization: maps the aggregator or platform label found in a
//! listing onto a canonical platform id using the cached reference table.
//! Unknown labels are registered for review, never dropped.

pub mod cache;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::ports::PlatformReferencePort;
use crate::common::{bounded, Clock};
use crate::domain::{PlatformIdentity, PlatformReferenceEntry};
use crate::observability::metrics;

pub use cache::PlatformCache;

pub const UNKNOWN_PLATFORM_TYPE: &str = "unknown";

/// Why a label resolved (or did not) the way it did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Case-insensitive equality with a known variant
    Exact,
    /// One of label and variant contains the other
    Substring,
    /// Label is already registered and awaiting review
    PendingReview,
    /// Label was unknown and has just been registered
    AutoRegistered,
    /// Label was unknown and registration could not be completed
    RegistrationFailed,
    /// Nothing to canonicalize
    EmptyLabel,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::Exact => "exact",
            MatchReason::Substring => "substring",
            MatchReason::PendingReview => "pending_review",
            MatchReason::AutoRegistered => "auto_registered",
            MatchReason::RegistrationFailed => "registration_failed",
            MatchReason::EmptyLabel => "empty_label",
        }
    }
}

/// Outcome of canonicalizing one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMatch {
    pub canonical_id: String,
    pub display_name: Option<String>,
    pub matched: bool,
    pub reason: MatchReason,
}

impl PlatformMatch {
    fn unmatched(label: &str, reason: MatchReason) -> Self {
        Self {
            canonical_id: label.to_string(),
            display_name: None,
            matched: false,
            reason,
        }
    }

    /// Attach the raw label to produce the identity stored on a record
    pub fn into_identity(self, raw_label: &str) -> PlatformIdentity {
        PlatformIdentity {
            canonical_id: self.canonical_id,
            display_name: self.display_name,
            raw_label: raw_label.to_string(),
            matched: self.matched,
        }
    }
}

/// Pure matching decision over the cached active entries.
///
/// Exact case-insensitive equality is tried across all entries first; then
/// the first entry in table order where either string contains the other.
pub fn match_label<'a>(
    label: &str,
    entries: &'a [PlatformReferenceEntry],
) -> Option<(&'a PlatformReferenceEntry, MatchReason)> {
    let needle = label.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    if let Some(entry) = entries
        .iter()
        .find(|e| e.raw_variant.trim().to_lowercase() == needle)
    {
        return Some((entry, MatchReason::Exact));
    }

    entries
        .iter()
        .find(|e| {
            let variant = e.raw_variant.trim().to_lowercase();
            !variant.is_empty() && (needle.contains(&variant) || variant.contains(&needle))
        })
        .map(|e| (e, MatchReason::Substring))
}

/// Canonicalizer owning its reference cache
pub struct PlatformCanonicalizer {
    port: Arc<dyn PlatformReferencePort>,
    clock: Arc<dyn Clock>,
    cache: Mutex<PlatformCache>,
    lookup_timeout: Duration,
}

impl PlatformCanonicalizer {
    pub fn new(
        port: Arc<dyn PlatformReferencePort>,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            port,
            clock,
            cache: Mutex::new(PlatformCache::new(ttl)),
            lookup_timeout,
        }
    }

    /// Resolve a raw platform label to its canonical identity
    pub async fn canonicalize(&self, raw_label: &str, source_tag: &str) -> PlatformMatch {
        let label = raw_label.trim();
        if label.is_empty() {
            return PlatformMatch::unmatched("unknown", MatchReason::EmptyLabel);
        }

        let mut cache = self.cache.lock().await;
        let now = self.clock.now();
        if cache.is_stale(now) {
            self.reload(&mut cache, now).await;
        }

        if let Some((entry, reason)) = match_label(label, cache.active()) {
            metrics::platform::label_matched(reason.as_str());
            debug!(
                "Platform '{}' -> '{}' ({})",
                label,
                entry.canonical_id,
                reason.as_str()
            );
            return PlatformMatch {
                canonical_id: entry.canonical_id.clone(),
                display_name: Some(entry.display_name.clone()),
                matched: true,
                reason,
            };
        }

        if let Some(reason) = cache.unmatched_reason(label) {
            metrics::platform::label_unmatched(reason.as_str());
            return PlatformMatch::unmatched(label, reason);
        }

        let reason = self.register_unknown(label, source_tag, now).await;
        cache.remember_unmatched(label, reason.clone());
        metrics::platform::label_unmatched(reason.as_str());
        PlatformMatch::unmatched(label, reason)
    }

    /// Number of active variants currently cached
    pub async fn cached_variants(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn reload(&self, cache: &mut PlatformCache, now: chrono::DateTime<chrono::Utc>) {
        match bounded(
            "platform reference load",
            self.lookup_timeout,
            self.port.load_variants(),
        )
        .await
        {
            Ok(entries) => {
                info!("Loaded {} platform reference variants", entries.len());
                cache.replace(entries, now);
                metrics::platform::cache_reloaded();
            }
            Err(e) => {
                // Serve the previous table until the next TTL boundary
                warn!("Platform reference load failed, keeping cached table: {}", e);
                cache.mark_attempted(now);
                metrics::platform::lookup_error("load");
            }
        }
    }

    async fn register_unknown(
        &self,
        label: &str,
        source_tag: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> MatchReason {
        match bounded(
            "platform variant check",
            self.lookup_timeout,
            self.port.variant_exists(label),
        )
        .await
        {
            Ok(true) => return MatchReason::PendingReview,
            Ok(false) => {}
            Err(e) => {
                warn!("Could not check platform variant '{}': {}", label, e);
                metrics::platform::lookup_error("exists");
                return MatchReason::RegistrationFailed;
            }
        }

        let entry = PlatformReferenceEntry {
            raw_variant: label.to_string(),
            canonical_id: label.to_string(),
            display_name: label.to_string(),
            platform_type: UNKNOWN_PLATFORM_TYPE.to_string(),
            active: false,
            notes: Some(format!(
                "Auto-detected unknown platform label from {}; needs review",
                source_tag
            )),
            source: Some(source_tag.to_string()),
            created_at: Some(now),
        };

        match bounded(
            "platform variant registration",
            self.lookup_timeout,
            self.port.register_variant(&entry),
        )
        .await
        {
            Ok(()) => {
                info!(
                    "Registered unknown platform '{}' from {} for review",
                    label, source_tag
                );
                metrics::platform::auto_registered();
                MatchReason::AutoRegistered
            }
            Err(e) => {
                warn!("Failed to register platform '{}': {}", label, e);
                metrics::platform::lookup_error("register");
                MatchReason::RegistrationFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use crate::pipeline::storage::InMemoryReferenceStore;
    use chrono::{TimeZone, Utc};

    fn entry(variant: &str, canonical: &str) -> PlatformReferenceEntry {
        PlatformReferenceEntry {
            raw_variant: variant.to_string(),
            canonical_id: canonical.to_string(),
            display_name: variant.to_string(),
            platform_type: "aggregator".to_string(),
            active: true,
            notes: None,
            source: None,
            created_at: None,
        }
    }

    fn canonicalizer(
        store: Arc<InMemoryReferenceStore>,
        clock: Arc<ManualClock>,
    ) -> PlatformCanonicalizer {
        PlatformCanonicalizer::new(
            store,
            clock,
            chrono::Duration::minutes(5),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_exact_beats_earlier_substring() {
        let entries = vec![entry("Raisin", "raisin"), entry("Raisin UK", "raisin_uk")];
        let (hit, reason) = match_label("raisin uk", &entries).unwrap();
        assert_eq!(hit.canonical_id, "raisin_uk");
        assert_eq!(reason, MatchReason::Exact);
    }

    #[test]
    fn test_substring_is_bidirectional_and_first_wins() {
        let entries = vec![
            entry("Hargreaves Lansdown", "hl"),
            entry("Hargreaves Lansdown Active Savings", "hl_active"),
        ];
        let (hit, reason) = match_label("Hargreaves Lansdown Active", &entries).unwrap();
        assert_eq!(hit.canonical_id, "hl");
        assert_eq!(reason, MatchReason::Substring);

        let (hit, _) = match_label("Lansdown", &entries).unwrap();
        assert_eq!(hit.canonical_id, "hl");
    }

    #[test]
    fn test_no_match_for_unrelated_label() {
        let entries = vec![entry("Raisin", "raisin")];
        assert!(match_label("Flagstone", &entries).is_none());
        assert!(match_label("   ", &entries).is_none());
    }

    #[tokio::test]
    async fn test_unknown_label_registered_once() {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.add_platform(entry("Raisin", "raisin"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let canon = canonicalizer(store.clone(), clock);

        let first = canon.canonicalize("Shiny New Platform", "moneyfacts").await;
        assert!(!first.matched);
        assert_eq!(first.reason, MatchReason::AutoRegistered);
        assert_eq!(first.canonical_id, "Shiny New Platform");

        let second = canon.canonicalize("shiny new platform", "moneyfacts").await;
        assert!(!second.matched);
        assert_eq!(second.reason, MatchReason::AutoRegistered);

        let registered: Vec<_> = store
            .platform_entries()
            .into_iter()
            .filter(|e| !e.active)
            .collect();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].platform_type, UNKNOWN_PLATFORM_TYPE);
        assert_eq!(registered[0].source.as_deref(), Some("moneyfacts"));
    }

    #[tokio::test]
    async fn test_cache_reused_within_ttl_and_reloaded_after() {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.add_platform(entry("Raisin", "raisin"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        ));
        let canon = canonicalizer(store.clone(), clock.clone());

        assert!(canon.canonicalize("Raisin", "flagstone").await.matched);
        assert_eq!(store.platform_loads(), 1);

        // A human adds a variant; not visible until the TTL elapses
        store.add_platform(entry("Flagstone", "flagstone"));
        clock.advance(chrono::Duration::minutes(2));
        let miss = canon.canonicalize("Flagstone", "flagstone").await;
        assert!(!miss.matched);
        assert_eq!(store.platform_loads(), 1);

        clock.advance(chrono::Duration::minutes(4));
        let hit = canon.canonicalize("Flagstone", "flagstone").await;
        assert!(hit.matched);
        assert_eq!(hit.canonical_id, "flagstone");
        assert_eq!(store.platform_loads(), 2);
    }

    #[tokio::test]
    async fn test_empty_label_is_not_registered() {
        let store = Arc::new(InMemoryReferenceStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let canon = canonicalizer(store.clone(), clock);

        let result = canon.canonicalize("  ", "generic").await;
        assert_eq!(result.reason, MatchReason::EmptyLabel);
        assert!(store.platform_entries().is_empty());
    }
}
