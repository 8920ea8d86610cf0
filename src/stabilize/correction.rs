//! # Fragment Normalization and Fuzzy Correction
//!
//! Recognized fragments are noisy: engines emit bracketed annotations for
//! non-speech audio, inconsistent spacing, and near-miss spellings of words
//! the speaker has said many times before. This module canonicalizes
//! fragments and, when a near-identical high-count spelling exists in the
//! store, substitutes it.

use tracing::trace;

use super::store::CounterStore;

/// Strip bracketed engine annotations like `[BLANK_AUDIO]` or `(noise)`.
pub fn clean_annotations(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(ch),
            _ => {}
        }
    }
    cleaned.trim().to_string()
}

/// Canonical form used as the counter-store key: lowercased, punctuation
/// stripped, whitespace collapsed to single spaces. Alphanumeric covers
/// Hangul and CJK, so Korean text passes through intact.
pub fn normalize_fragment(text: &str) -> String {
    let filtered: String = text
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Non-whitespace character count, the measure behind the minimum-content
/// gate.
pub fn content_len(text: &str) -> usize {
    text.chars().filter(|ch| !ch.is_whitespace()).count()
}

pub struct Corrector {
    similarity_threshold: f64,
    top_k: usize,
}

impl Corrector {
    pub fn new(similarity_threshold: f64, top_k: usize) -> Self {
        Self {
            similarity_threshold,
            top_k,
        }
    }

    /// Replace `fragment` with the closest high-count spelling from the
    /// store, if one clears the similarity threshold.
    ///
    /// Substitution also requires the candidate's count to be strictly
    /// above the fragment's own stored count; a count tie keeps the
    /// incoming text, so two spellings of equal standing never flip back
    /// and forth.
    pub fn correct(&self, fragment: &str, store: &dyn CounterStore) -> String {
        let candidates = match store.top(self.top_k) {
            Ok(candidates) => candidates,
            Err(error) => {
                trace!(%error, "Correction lookup failed, keeping fragment as-is");
                return fragment.to_string();
            }
        };

        let own_count = store.lookup(fragment).unwrap_or(0);

        let mut best: Option<(f64, u64, &str)> = None;
        for candidate in &candidates {
            if candidate.text == fragment || candidate.count <= own_count {
                continue;
            }
            let similarity = strsim::normalized_levenshtein(fragment, &candidate.text);
            if similarity < self.similarity_threshold {
                continue;
            }
            let beats_best = match best {
                Some((best_similarity, best_count, _)) => {
                    similarity > best_similarity
                        || (similarity == best_similarity && candidate.count > best_count)
                }
                None => true,
            };
            if beats_best {
                best = Some((similarity, candidate.count, &candidate.text));
            }
        }

        match best {
            Some((similarity, _, replacement)) => {
                trace!(
                    fragment,
                    replacement,
                    similarity,
                    "Substituted near-miss fragment"
                );
                replacement.to_string()
            }
            None => fragment.to_string(),
        }
    }
}
