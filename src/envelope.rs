//! Output envelope wrapping the annotated records of one run

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::NormalizedRecord;
use crate::pipeline::processing::identity::ResolutionStats;

pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Schema shipped with the crate, used when no other schema is given
pub const OUTPUT_ENVELOPE_SCHEMA: &str = include_str!("../schemas/output_envelope.v1.json");

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputEnvelope {
    pub envelope_version: String, // "1.0.0"
    pub run_id: Uuid,
    pub source: String,
    pub extraction_method: String,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub records: Vec<NormalizedRecord>,
    /// Present when identity resolution ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionStats>,
}

impl OutputEnvelope {
    pub fn new(
        source: &str,
        extraction_method: &str,
        generated_at: DateTime<Utc>,
        records: Vec<NormalizedRecord>,
        resolution: Option<ResolutionStats>,
    ) -> Self {
        Self {
            envelope_version: ENVELOPE_VERSION.to_string(),
            run_id: Uuid::new_v4(),
            source: source.to_string(),
            extraction_method: extraction_method.to_string(),
            generated_at,
            record_count: records.len(),
            records,
            resolution,
        }
    }
}

/// Compile a JSON Schema for envelope validation.
///
/// jsonschema 0.17 wants a `'static` schema; the parsed value is leaked,
/// which is fine for the handful of schemas a process compiles.
pub fn compile_schema(schema: Value) -> Result<JSONSchema> {
    let schema_static: &'static Value = Box::leak(Box::new(schema));
    JSONSchema::options()
        .compile(schema_static)
        .map_err(|e| anyhow!("Failed to compile JSON Schema: {}", e))
}

/// Validation errors of `instance` against `schema`, as "message at path"
pub fn validation_errors(schema: &JSONSchema, instance: &Value) -> Vec<String> {
    match schema.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|error| format!("{} at {}", error, error.instance_path))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_counts_records() {
        let records = vec![
            crate::domain::test_support::record("Zopa Bank", Some(4.0)),
            crate::domain::test_support::record("Tandem Bank", None),
        ];
        let envelope = OutputEnvelope::new("generic", "generic_fields", Utc::now(), records, None);
        assert_eq!(envelope.record_count, 2);
        assert_eq!(envelope.envelope_version, ENVELOPE_VERSION);
    }

    #[test]
    fn test_serialized_envelope_matches_bundled_schema() {
        let mut record = crate::domain::test_support::record("Zopa Bank", Some(4.0));
        record.identity = Some(crate::domain::IdentityAnnotation {
            regulator_id: Some("718155".to_string()),
            canonical_institution_name: Some("Zopa Bank Limited".to_string()),
            confidence: 1.0,
            match_method: crate::domain::MatchMethod::Exact,
            notes: None,
        });
        let envelope = OutputEnvelope::new(
            "generic",
            "generic_fields",
            Utc::now(),
            vec![record],
            Some(ResolutionStats::default()),
        );

        let schema = compile_schema(serde_json::from_str(OUTPUT_ENVELOPE_SCHEMA).unwrap()).unwrap();
        let instance = serde_json::to_value(&envelope).unwrap();
        assert_eq!(validation_errors(&schema, &instance), Vec::<String>::new());
    }
}
