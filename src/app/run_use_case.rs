use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Instrument};

use crate::app::ports::EnvelopeOutputPort;
use crate::app::resolution_use_case::ResolutionUseCase;
use crate::common::Clock;
use crate::domain::RawRecord;
use crate::envelope::OutputEnvelope;
use crate::pipeline::processing::identity::IdentityResolver;
use crate::pipeline::processing::normalize::SchemaNormalizer;

/// Full run for one source: normalize, resolve identities, write the envelope
pub struct RunUseCase {
    normalizer: Arc<SchemaNormalizer>,
    resolution: ResolutionUseCase,
    output: Box<dyn EnvelopeOutputPort>,
    clock: Arc<dyn Clock>,
}

impl RunUseCase {
    pub fn new(
        normalizer: Arc<SchemaNormalizer>,
        resolver: Arc<IdentityResolver>,
        output: Box<dyn EnvelopeOutputPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            normalizer,
            resolution: ResolutionUseCase::new(resolver),
            output,
            clock,
        }
    }

    pub async fn run(&self, raw: &[RawRecord], source_tag: &str) -> Result<OutputEnvelope> {
        let span = tracing::info_span!("run", source = %source_tag, records = raw.len());
        async move {
            let mut records = self.normalizer.normalize(raw, source_tag).await;
            let stats = self.resolution.annotate(&mut records).await;

            let source = records
                .first()
                .map(|r| r.provenance.source.clone())
                .unwrap_or_else(|| crate::constants::canonical_source_tag(source_tag));
            let resolved = records.iter().filter(|r| r.is_resolved()).count();
            info!(
                "Run complete: {} records, {} resolved, {} queued for review, cache hit rate {:.1}%",
                records.len(),
                resolved,
                stats.auto_flagged,
                stats.cache_hit_rate() * 100.0
            );

            let envelope = OutputEnvelope::new(
                &source,
                self.normalizer.extraction_method(source_tag),
                self.clock.now(),
                records,
                Some(stats),
            );
            self.output.write_envelope(&envelope).await?;
            Ok(envelope)
        }
        .instrument(span)
        .await
    }
}
