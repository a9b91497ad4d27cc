use once_cell::sync::Lazy;
use regex::Regex;

/// Tokens dropped from the stripped comparison form
const CORPORATE_SUFFIXES: &[&str] = &[
    "PLC", "LTD", "LIMITED", "LLP", "INC", "CORP", "CORPORATION", "CO", "COMPANY", "GROUP", "UK",
];

const STOPWORDS: &[&str] = &["THE", "OF", "AND"];

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{M}\p{N} ]+").expect("valid regex"));

/// Cleaned search key: uppercase, ampersands spelled out, punctuation turned
/// into spaces, whitespace collapsed. Letters outside ASCII are kept.
pub fn clean_name(name: &str) -> String {
    let upper = name.to_uppercase().replace('&', " AND ");
    let spaced = NON_ALNUM.replace_all(&upper, " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleaned name with corporate suffixes and stopwords removed
pub fn strip_corporate(cleaned: &str) -> String {
    cleaned
        .split_whitespace()
        .filter(|token| !CORPORATE_SUFFIXES.contains(token) && !STOPWORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized Levenshtein similarity: 1 - distance / max(len)
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
}

/// Pre-computed comparison forms of one input name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
    pub cleaned: String,
    pub stripped: String,
}

impl SearchKey {
    pub fn new(raw: &str) -> Self {
        let cleaned = clean_name(raw);
        let stripped = strip_corporate(&cleaned);
        Self { cleaned, stripped }
    }

    pub fn is_empty(&self) -> bool {
        self.cleaned.is_empty()
    }
}
