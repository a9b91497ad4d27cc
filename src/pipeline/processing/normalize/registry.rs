use std::collections::HashMap;
use tracing::debug;

use super::profiles::SourceProfile;
use crate::config::SourceOverride;
use crate::constants::canonical_source_tag;

/// Registry of source profiles keyed by canonical source tag
pub struct NormalizationRegistry {
    profiles: HashMap<String, SourceProfile>,
    fallback: SourceProfile,
}

impl Default for NormalizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NormalizationRegistry {
    /// Create a registry holding the built-in profiles
    pub fn new() -> Self {
        let mut profiles = HashMap::new();
        for profile in SourceProfile::built_in() {
            profiles.insert(profile.tag.to_string(), profile);
        }
        Self {
            profiles,
            fallback: SourceProfile::generic(),
        }
    }

    /// Apply per-source policy overrides from configuration
    pub fn with_overrides(mut self, overrides: &HashMap<String, SourceOverride>) -> Self {
        for (tag, source_override) in overrides {
            let tag = canonical_source_tag(tag);
            if let Some(flag) = source_override.title_overrides_section {
                if let Some(profile) = self.profiles.get_mut(&tag) {
                    debug!("Source '{}': title_overrides_section = {}", tag, flag);
                    profile.category_policy.title_overrides_section = flag;
                }
            }
        }
        self
    }

    /// Register a profile, replacing any existing one for its tag
    pub fn register(&mut self, profile: SourceProfile) {
        self.profiles.insert(profile.tag.to_string(), profile);
    }

    /// Profile for an exact canonical tag
    pub fn get_profile(&self, source_tag: &str) -> Option<&SourceProfile> {
        self.profiles.get(source_tag)
    }

    /// Profile for a user-supplied tag. The flag is false when the tag is
    /// unknown and the generic profile was substituted.
    pub fn resolve(&self, source_tag: &str) -> (&SourceProfile, bool) {
        match self.get_profile(&canonical_source_tag(source_tag)) {
            Some(profile) => (profile, true),
            None => (&self.fallback, false),
        }
    }

    /// List all registered source tags, sorted
    pub fn list_sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.profiles.keys().map(|k| k.as_str()).collect();
        sources.sort_unstable();
        sources
    }
}
