use anyhow::Result;
use std::sync::Arc;

use crate::app::ports::EnvelopeOutputPort;
use crate::common::Clock;
use crate::domain::RawRecord;
use crate::envelope::OutputEnvelope;
use crate::pipeline::processing::normalize::SchemaNormalizer;

/// Use case for normalizing one source's raw records without identity resolution
pub struct NormalizeUseCase {
    normalizer: Arc<SchemaNormalizer>,
    output: Box<dyn EnvelopeOutputPort>,
    clock: Arc<dyn Clock>,
}

impl NormalizeUseCase {
    pub fn new(
        normalizer: Arc<SchemaNormalizer>,
        output: Box<dyn EnvelopeOutputPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            normalizer,
            output,
            clock,
        }
    }

    /// Normalize a batch and write it out as an envelope
    pub async fn normalize_batch(&self, raw: &[RawRecord], source_tag: &str) -> Result<OutputEnvelope> {
        let records = self.normalizer.normalize(raw, source_tag).await;
        let source = records
            .first()
            .map(|r| r.provenance.source.clone())
            .unwrap_or_else(|| crate::constants::canonical_source_tag(source_tag));
        let envelope = OutputEnvelope::new(
            &source,
            self.normalizer.extraction_method(source_tag),
            self.clock.now(),
            records,
            None,
        );
        self.output.write_envelope(&envelope).await?;
        Ok(envelope)
    }
}
