use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::{IdentityReferenceEntry, MatchMethod};

use super::text::{clean_name, similarity, strip_corporate, SearchKey};

/// Shortest searchable name allowed to take part in substring matching
const MIN_PARTIAL_LEN: usize = 4;

/// Scoring knobs for the cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchTuning {
    pub partial_multiplier: f64,
    pub fuzzy_multiplier: f64,
    pub fuzzy_threshold: f64,
}

impl Default for MatchTuning {
    fn default() -> Self {
        Self {
            partial_multiplier: crate::constants::DEFAULT_PARTIAL_MULTIPLIER,
            fuzzy_multiplier: crate::constants::DEFAULT_FUZZY_MULTIPLIER,
            fuzzy_threshold: crate::constants::DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

impl From<&crate::config::IdentityConfig> for MatchTuning {
    fn from(config: &crate::config::IdentityConfig) -> Self {
        Self {
            partial_multiplier: config.partial_multiplier,
            fuzzy_multiplier: config.fuzzy_multiplier,
            fuzzy_threshold: config.fuzzy_threshold,
        }
    }
}

/// A resolved institution identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub regulator_id: String,
    pub canonical_name: String,
    pub confidence: f64,
    pub match_method: MatchMethod,
    pub notes: Option<String>,
}

/// One stage of the lookup cascade. Stages run in `CASCADE` order and the
/// first one returning a match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Partial,
    Fuzzy,
}

impl MatchStrategy {
    pub const CASCADE: [MatchStrategy; 3] =
        [MatchStrategy::Exact, MatchStrategy::Partial, MatchStrategy::Fuzzy];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::Partial => "partial",
            MatchStrategy::Fuzzy => "fuzzy",
        }
    }

    pub fn method(&self) -> MatchMethod {
        match self {
            MatchStrategy::Exact => MatchMethod::Exact,
            MatchStrategy::Partial => MatchMethod::Partial,
            MatchStrategy::Fuzzy => MatchMethod::Fuzzy,
        }
    }

    /// Pick the best candidate for this stage, if any qualifies
    pub fn find(
        &self,
        key: &SearchKey,
        candidates: &[IdentityReferenceEntry],
        tuning: &MatchTuning,
    ) -> Option<IdentityMatch> {
        match self {
            MatchStrategy::Exact => find_exact(key, candidates),
            MatchStrategy::Partial => find_partial(key, candidates, tuning),
            MatchStrategy::Fuzzy => find_fuzzy(key, candidates, tuning),
        }
    }
}

fn find_exact(key: &SearchKey, candidates: &[IdentityReferenceEntry]) -> Option<IdentityMatch> {
    candidates
        .iter()
        .filter(|c| clean_name(&c.searchable_name) == key.cleaned)
        .max_by(|a, b| by_base(a, b))
        .map(|c| IdentityMatch {
            regulator_id: c.regulator_id.clone(),
            canonical_name: c.canonical_name.clone(),
            confidence: clamp(c.base_confidence),
            match_method: MatchMethod::Exact,
            notes: None,
        })
}

/// Relation between input and candidate, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Containment {
    Equal,
    Prefix,
    Suffix,
    Inner,
}

impl Containment {
    fn as_str(&self) -> &'static str {
        match self {
            Containment::Equal => "equal",
            Containment::Prefix => "prefix",
            Containment::Suffix => "suffix",
            Containment::Inner => "inner",
        }
    }
}

/// Token-aligned containment in either direction
fn containment(input: &str, candidate: &str) -> Option<Containment> {
    if input == candidate {
        return Some(Containment::Equal);
    }
    let (longer, shorter) = if input.len() >= candidate.len() {
        (input, candidate)
    } else {
        (candidate, input)
    };
    if longer.starts_with(&format!("{} ", shorter)) {
        Some(Containment::Prefix)
    } else if longer.ends_with(&format!(" {}", shorter)) {
        Some(Containment::Suffix)
    } else if format!(" {} ", longer).contains(&format!(" {} ", shorter)) {
        Some(Containment::Inner)
    } else {
        None
    }
}

fn find_partial(
    key: &SearchKey,
    candidates: &[IdentityReferenceEntry],
    tuning: &MatchTuning,
) -> Option<IdentityMatch> {
    if key.cleaned.len() < MIN_PARTIAL_LEN {
        return None;
    }

    let mut ranked: Vec<(Containment, usize, &IdentityReferenceEntry)> = candidates
        .iter()
        .filter_map(|c| {
            let searchable = clean_name(&c.searchable_name);
            if searchable.len() < MIN_PARTIAL_LEN {
                return None;
            }
            containment(&key.cleaned, &searchable).map(|rel| (rel, searchable.len(), c))
        })
        .collect();

    // equal > prefix > suffix > inner, then shortest, then highest base
    ranked.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then_with(|| by_base(b.2, a.2))
    });

    ranked.first().map(|(rel, _, c)| IdentityMatch {
        regulator_id: c.regulator_id.clone(),
        canonical_name: c.canonical_name.clone(),
        confidence: clamp(c.base_confidence * tuning.partial_multiplier),
        match_method: MatchMethod::Partial,
        notes: Some(format!("{} match on '{}'", rel.as_str(), c.searchable_name)),
    })
}

fn find_fuzzy(
    key: &SearchKey,
    candidates: &[IdentityReferenceEntry],
    tuning: &MatchTuning,
) -> Option<IdentityMatch> {
    let mut best: Option<(f64, &IdentityReferenceEntry)> = None;

    for candidate in candidates {
        let cleaned = clean_name(&candidate.searchable_name);
        let stripped = strip_corporate(&cleaned);
        let score = similarity(&key.cleaned, &cleaned).max(similarity(&key.stripped, &stripped));
        if score < tuning.fuzzy_threshold {
            continue;
        }

        let better = match best {
            None => true,
            Some((best_score, best_entry)) => {
                score > best_score
                    || (score == best_score
                        && candidate.base_confidence > best_entry.base_confidence)
            }
        };
        if better {
            best = Some((score, candidate));
        }
    }

    best.map(|(score, c)| IdentityMatch {
        regulator_id: c.regulator_id.clone(),
        canonical_name: c.canonical_name.clone(),
        confidence: clamp(score * c.base_confidence * tuning.fuzzy_multiplier),
        match_method: MatchMethod::Fuzzy,
        notes: Some(format!(
            "similarity {:.3} to '{}'",
            score, c.searchable_name
        )),
    })
}

fn by_base(a: &IdentityReferenceEntry, b: &IdentityReferenceEntry) -> Ordering {
    a.base_confidence
        .partial_cmp(&b.base_confidence)
        .unwrap_or(Ordering::Equal)
}

fn clamp(confidence: f64) -> f64 {
    confidence.clamp(0.0, 1.0)
}
