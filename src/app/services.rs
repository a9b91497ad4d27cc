use std::sync::Arc;

use crate::app::ports::{IdentityReferencePort, PlatformReferencePort, ReviewQueuePort};
use crate::common::Clock;
use crate::config::PipelineConfig;
use crate::pipeline::processing::identity::{IdentityResolver, MatchTuning};
use crate::pipeline::processing::normalize::{NormalizationRegistry, SchemaNormalizer};
use crate::pipeline::processing::platform::PlatformCanonicalizer;

/// The three pipeline components wired against one reference store
pub struct PipelineServices {
    pub platforms: Arc<PlatformCanonicalizer>,
    pub normalizer: Arc<SchemaNormalizer>,
    pub resolver: Arc<IdentityResolver>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineServices {
    pub fn new<S>(config: &PipelineConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: PlatformReferencePort + IdentityReferencePort + ReviewQueuePort + 'static,
    {
        let platforms = Arc::new(PlatformCanonicalizer::new(
            store.clone(),
            clock.clone(),
            config.platform.cache_ttl(),
            config.platform.lookup_timeout(),
        ));
        let registry = NormalizationRegistry::new().with_overrides(&config.sources);
        let normalizer = Arc::new(SchemaNormalizer::new(
            registry,
            platforms.clone(),
            clock.clone(),
        ));
        let resolver = Arc::new(IdentityResolver::new(
            store.clone(),
            store,
            clock.clone(),
            MatchTuning::from(&config.identity),
            config.identity.lookup_timeout(),
        ));

        Self {
            platforms,
            normalizer,
            resolver,
            clock,
        }
    }
}
