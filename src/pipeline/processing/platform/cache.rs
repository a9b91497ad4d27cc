use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::PlatformReferenceEntry;

use super::MatchReason;

/// Process-lifetime copy of the platform reference table.
///
/// Active entries keep their store order so substring matching is stable.
/// Inactive entries only contribute to the set of labels already awaiting
/// review, which is what stops a label from being registered twice.
#[derive(Debug)]
pub struct PlatformCache {
    active: Vec<PlatformReferenceEntry>,
    unmatched: HashMap<String, MatchReason>,
    loaded_at: Option<DateTime<Utc>>,
    ttl: chrono::Duration,
}

impl PlatformCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            active: Vec::new(),
            unmatched: HashMap::new(),
            loaded_at: None,
            ttl,
        }
    }

    /// A never-loaded cache is always stale
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.loaded_at {
            Some(loaded_at) => now - loaded_at >= self.ttl,
            None => true,
        }
    }

    /// Replace the cached table with a fresh read
    pub fn replace(&mut self, entries: Vec<PlatformReferenceEntry>, now: DateTime<Utc>) {
        self.unmatched.clear();
        self.active.clear();
        for entry in entries {
            if entry.active {
                self.active.push(entry);
            } else {
                self.unmatched
                    .insert(entry.raw_variant.to_lowercase(), MatchReason::PendingReview);
            }
        }
        self.loaded_at = Some(now);
    }

    /// Keep serving what we have until the next TTL boundary
    pub fn mark_attempted(&mut self, now: DateTime<Utc>) {
        self.loaded_at = Some(now);
    }

    pub fn active(&self) -> &[PlatformReferenceEntry] {
        &self.active
    }

    pub fn unmatched_reason(&self, label: &str) -> Option<MatchReason> {
        self.unmatched.get(&label.to_lowercase()).cloned()
    }

    pub fn remember_unmatched(&mut self, label: &str, reason: MatchReason) {
        self.unmatched.insert(label.to_lowercase(), reason);
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(variant: &str, active: bool) -> PlatformReferenceEntry {
        PlatformReferenceEntry {
            raw_variant: variant.to_string(),
            canonical_id: variant.to_lowercase(),
            display_name: variant.to_string(),
            platform_type: "aggregator".to_string(),
            active,
            notes: None,
            source: None,
            created_at: None,
        }
    }

    #[test]
    fn test_staleness_follows_ttl() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut cache = PlatformCache::new(chrono::Duration::minutes(5));
        assert!(cache.is_stale(t0));

        cache.replace(vec![entry("Raisin", true)], t0);
        assert!(!cache.is_stale(t0 + chrono::Duration::minutes(4)));
        assert!(cache.is_stale(t0 + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_inactive_entries_are_pending_not_matchable() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut cache = PlatformCache::new(chrono::Duration::minutes(5));
        cache.replace(vec![entry("Raisin", true), entry("NewCo Savings", false)], t0);

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.unmatched_reason("newco savings"),
            Some(MatchReason::PendingReview)
        );
        assert_eq!(cache.unmatched_reason("raisin"), None);
    }
}
