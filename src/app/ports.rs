use async_trait::async_trait;

use crate::domain::{IdentityReferenceEntry, PlatformReferenceEntry, ReviewQueueEntry};
use crate::envelope::OutputEnvelope;
use crate::error::Result;
use crate::pipeline::processing::identity::MatchStrategy;

/// Platform reference table. Reads are cached by the canonicalizer; the only
/// write is the auto-registration of unknown labels.
#[async_trait]
pub trait PlatformReferencePort: Send + Sync {
    /// All variants in insertion order, active and inactive
    async fn load_variants(&self) -> Result<Vec<PlatformReferenceEntry>>;

    /// Case-insensitive existence check on the raw variant
    async fn variant_exists(&self, raw_variant: &str) -> Result<bool>;

    async fn register_variant(&self, entry: &PlatformReferenceEntry) -> Result<()>;
}

/// Read-only institution identity reference.
#[async_trait]
pub trait IdentityReferencePort: Send + Sync {
    /// Candidate rows for a cleaned, uppercased search key.
    ///
    /// Stores may pre-filter by strategy (equality for exact, containment for
    /// partial); returning a superset is always allowed since the strategy
    /// makes the final decision.
    async fn candidates(
        &self,
        strategy: MatchStrategy,
        search_key: &str,
    ) -> Result<Vec<IdentityReferenceEntry>>;
}

/// Manual-override / review table. This core only appends to it.
#[async_trait]
pub trait ReviewQueuePort: Send + Sync {
    async fn is_flagged(&self, raw_institution_name: &str) -> Result<bool>;

    async fn flag(&self, entry: &ReviewQueueEntry) -> Result<()>;
}

/// Destination for the annotated output of a run
#[async_trait]
pub trait EnvelopeOutputPort: Send + Sync {
    async fn write_envelope(&self, envelope: &OutputEnvelope) -> anyhow::Result<()>;
}
