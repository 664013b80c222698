use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const MEMO_CAPACITY: usize = 4_096;

/// Stopwords used for generic-concept flagging and definition n-grams.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "for", "and", "or", "in", "on", "to", "with", "by", "from", "is",
    "are", "that", "this", "as", "at", "be", "we", "our", "it", "its",
];

/// Generic concept names that carry no graph value on their own.
pub const GENERIC_CONCEPTS: &[&str] = &[
    "model", "method", "approach", "framework", "system", "algorithm", "technique", "task",
    "problem", "result", "performance", "accuracy", "baseline", "experiment", "data", "dataset",
    "paper", "work", "study", "analysis",
];

/// Memoizing canonicalizer for entity names. The memo is cleared wholesale
/// when it reaches capacity; entries are cheap to recompute.
pub struct Canonicalizer {
    memo: Mutex<HashMap<String, String>>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn canonicalize(&self, name: &str) -> String {
        if let Some(hit) = self.memo.lock().unwrap().get(name) {
            return hit.clone();
        }
        let out = canonicalize(name);
        let mut memo = self.memo.lock().unwrap();
        if memo.len() >= MEMO_CAPACITY {
            memo.clear();
        }
        memo.insert(name.to_string(), out.clone());
        out
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical form of an entity name. Idempotent:
/// `canonicalize(canonicalize(s)) == canonicalize(s)`.
///
/// Lowercase, trim, collapse whitespace, resolve a trailing parenthetical
/// alias (`"X (Y)"` -> `Y`), strip non-word punctuation, and join words
/// with underscores.
pub fn canonicalize(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let aliased = resolve_parenthetical(&lowered);

    let mut cleaned = String::with_capacity(aliased.len());
    for ch in aliased.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            cleaned.push(ch);
        } else if ch == ' ' || ch == '-' || ch.is_whitespace() {
            cleaned.push(' ');
        }
        // Other punctuation is dropped.
    }

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// `"neural radiance field (nerf)"` -> `"nerf"`. Only a trailing,
/// non-empty parenthetical is treated as the preferred alias.
fn resolve_parenthetical(s: &str) -> String {
    if let Some(stripped) = s.strip_suffix(')') {
        if let Some(open) = stripped.rfind('(') {
            let inner = stripped[open + 1..].trim();
            if !inner.is_empty() && open > 0 {
                return inner.to_string();
            }
        }
    }
    s.to_string()
}

/// Alias normalization: lowercase, trim, collapse internal whitespace.
/// Keeps the surface form readable, unlike the canonical key.
pub fn normalize_alias(alias: &str) -> String {
    alias
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

pub fn is_generic_concept(name: &str) -> bool {
    let normalized = normalize_alias(name);
    GENERIC_CONCEPTS.contains(&normalized.as_str())
}

/// Word 3-grams of a definition after stopword removal, used as the
/// shared-phrase signal during entity resolution.
pub fn definition_trigrams(text: &str) -> HashSet<String> {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !is_stopword(w))
        .map(|w| w.to_string())
        .collect();

    let mut grams = HashSet::new();
    for window in words.windows(3) {
        grams.insert(window.join(" "));
    }
    grams
}
