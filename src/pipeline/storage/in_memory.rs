use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::app::ports::{IdentityReferencePort, PlatformReferencePort, ReviewQueuePort};
use crate::domain::{IdentityReferenceEntry, PlatformReferenceEntry, ReviewQueueEntry};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::identity::text::clean_name;
use crate::pipeline::processing::identity::MatchStrategy;

use super::fold_key;
use super::seed::ReferenceSeed;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory reference store for development and testing.
///
/// Implements all three reference ports. Failure injection and artificial
/// latency let tests exercise the degraded paths of the resolvers.
pub struct InMemoryReferenceStore {
    platforms: Arc<Mutex<Vec<PlatformReferenceEntry>>>,
    identities: Arc<Mutex<Vec<IdentityReferenceEntry>>>,
    reviews: Arc<Mutex<Vec<ReviewQueueEntry>>>,
    platform_loads: AtomicUsize,
    identity_lookups: AtomicUsize,
    fail_platform: AtomicBool,
    fail_identity: AtomicBool,
    fail_review: AtomicBool,
    lookup_delay: Mutex<Option<Duration>>,
}

impl Default for InMemoryReferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self {
            platforms: Arc::new(Mutex::new(Vec::new())),
            identities: Arc::new(Mutex::new(Vec::new())),
            reviews: Arc::new(Mutex::new(Vec::new())),
            platform_loads: AtomicUsize::new(0),
            identity_lookups: AtomicUsize::new(0),
            fail_platform: AtomicBool::new(false),
            fail_identity: AtomicBool::new(false),
            fail_review: AtomicBool::new(false),
            lookup_delay: Mutex::new(None),
        }
    }

    pub fn from_seed(seed: &ReferenceSeed) -> Self {
        let store = Self::new();
        lock(&store.platforms).extend(seed.platforms.iter().cloned());
        lock(&store.identities).extend(seed.institutions.iter().cloned());
        store
    }

    pub fn add_platform(&self, entry: PlatformReferenceEntry) {
        lock(&self.platforms).push(entry);
    }

    pub fn add_identity(&self, entry: IdentityReferenceEntry) {
        lock(&self.identities).push(entry);
    }

    pub fn platform_entries(&self) -> Vec<PlatformReferenceEntry> {
        lock(&self.platforms).clone()
    }

    pub fn review_entries(&self) -> Vec<ReviewQueueEntry> {
        lock(&self.reviews).clone()
    }

    /// Number of full platform table reads served
    pub fn platform_loads(&self) -> usize {
        self.platform_loads.load(Ordering::SeqCst)
    }

    /// Number of identity candidate queries served
    pub fn identity_lookups(&self) -> usize {
        self.identity_lookups.load(Ordering::SeqCst)
    }

    pub fn fail_platform_calls(&self, fail: bool) {
        self.fail_platform.store(fail, Ordering::SeqCst);
    }

    pub fn fail_identity_lookups(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::SeqCst);
    }

    pub fn fail_review_calls(&self, fail: bool) {
        self.fail_review.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every identity candidate query
    pub fn set_lookup_delay(&self, delay: Duration) {
        *lock(&self.lookup_delay) = Some(delay);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(PipelineError::store(format!("injected {} failure", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PlatformReferencePort for InMemoryReferenceStore {
    async fn load_variants(&self) -> Result<Vec<PlatformReferenceEntry>> {
        Self::check(&self.fail_platform, "platform load")?;
        self.platform_loads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.platforms).clone())
    }

    async fn variant_exists(&self, raw_variant: &str) -> Result<bool> {
        Self::check(&self.fail_platform, "platform check")?;
        let needle = fold_key(raw_variant);
        Ok(lock(&self.platforms)
            .iter()
            .any(|e| fold_key(&e.raw_variant) == needle))
    }

    async fn register_variant(&self, entry: &PlatformReferenceEntry) -> Result<()> {
        Self::check(&self.fail_platform, "platform register")?;
        let mut platforms = lock(&self.platforms);
        let needle = fold_key(&entry.raw_variant);
        // Unique on the case-folded variant, like the SQLite index
        if !platforms
            .iter()
            .any(|e| fold_key(&e.raw_variant) == needle)
        {
            debug!("Registered platform variant '{}'", entry.raw_variant);
            platforms.push(entry.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityReferencePort for InMemoryReferenceStore {
    async fn candidates(
        &self,
        strategy: MatchStrategy,
        search_key: &str,
    ) -> Result<Vec<IdentityReferenceEntry>> {
        let delay = *lock(&self.lookup_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::check(&self.fail_identity, "identity lookup")?;
        self.identity_lookups.fetch_add(1, Ordering::SeqCst);

        let identities = lock(&self.identities);
        let rows = match strategy {
            MatchStrategy::Exact => identities
                .iter()
                .filter(|e| clean_name(&e.searchable_name) == search_key)
                .cloned()
                .collect(),
            MatchStrategy::Partial => identities
                .iter()
                .filter(|e| {
                    let searchable = clean_name(&e.searchable_name);
                    !searchable.is_empty()
                        && (search_key.contains(&searchable) || searchable.contains(search_key))
                })
                .cloned()
                .collect(),
            MatchStrategy::Fuzzy => identities.clone(),
        };
        Ok(rows)
    }
}

#[async_trait]
impl ReviewQueuePort for InMemoryReferenceStore {
    async fn is_flagged(&self, raw_institution_name: &str) -> Result<bool> {
        Self::check(&self.fail_review, "review check")?;
        let needle = fold_key(raw_institution_name);
        Ok(lock(&self.reviews)
            .iter()
            .any(|e| fold_key(&e.raw_institution_name) == needle))
    }

    async fn flag(&self, entry: &ReviewQueueEntry) -> Result<()> {
        Self::check(&self.fail_review, "review insert")?;
        lock(&self.reviews).push(entry.clone());
        Ok(())
    }
}
