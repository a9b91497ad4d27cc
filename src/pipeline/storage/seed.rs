use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{IdentityReferenceEntry, PlatformReferenceEntry};
use crate::error::Result;

/// Reference rows loaded from a TOML file:
///
/// ```toml
/// [[platform]]
/// raw_variant = "Raisin"
/// canonical_id = "raisin"
/// display_name = "Raisin UK"
/// platform_type = "aggregator"
/// active = true
///
/// [[institution]]
/// regulator_id = "718155"
/// canonical_name = "Zopa Bank Limited"
/// searchable_name = "ZOPA BANK"
/// base_confidence = 1.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSeed {
    #[serde(default, rename = "platform")]
    pub platforms: Vec<PlatformReferenceEntry>,
    #[serde(default, rename = "institution")]
    pub institutions: Vec<IdentityReferenceEntry>,
}

impl ReferenceSeed {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty() && self.institutions.is_empty()
    }
}
