//! Keyword-pattern dispatch for natural-language verbs.
//!
//! Services receive phrases such as `"clear cache all"`. An [`IntentTable`]
//! maps keyword patterns to typed handlers, usually variants of a tagged
//! enum, so each service matches on a closed set instead of raw strings.
//!
//! Every keyword of a pattern must appear in the input as a whole word,
//! case-insensitively. When several patterns match, the one with the most
//! keywords wins; ties go to the pattern registered first.

use crate::{LocusError, Result};
use regex::Regex;

struct IntentPattern<H> {
    phrase: String,
    keywords: Vec<Regex>,
    handler: H,
}

impl<H> IntentPattern<H> {
    fn matches(&self, input: &str) -> bool {
        self.keywords.iter().all(|re| re.is_match(input))
    }
}

/// Ordered keyword patterns mapped to handlers.
pub struct IntentTable<H> {
    patterns: Vec<IntentPattern<H>>,
}

impl<H> Default for IntentTable<H> {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }
}

impl<H> IntentTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern. The phrase is split on whitespace into keywords.
    pub fn insert(&mut self, phrase: &str, handler: H) -> Result<()> {
        let keywords = phrase
            .split_whitespace()
            .map(|word| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).map_err(|e| {
                    LocusError::Config {
                        message: format!("Invalid intent keyword '{}': {}", word, e),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if keywords.is_empty() {
            return Err(LocusError::Validation {
                field: "intent".to_string(),
                message: "pattern must contain at least one keyword".to_string(),
            });
        }

        self.patterns.push(IntentPattern {
            phrase: phrase.to_string(),
            keywords,
            handler,
        });
        Ok(())
    }

    /// Builder form of [`IntentTable::insert`].
    pub fn with(mut self, phrase: &str, handler: H) -> Result<Self> {
        self.insert(phrase, handler)?;
        Ok(self)
    }

    /// Find the most specific handler for `input`.
    pub fn resolve(&self, input: &str) -> Option<&H> {
        let mut best: Option<&IntentPattern<H>> = None;
        for pattern in &self.patterns {
            if !pattern.matches(input) {
                continue;
            }
            // Strictly greater keeps the earliest pattern on ties.
            let more_specific = match best {
                None => true,
                Some(b) => pattern.keywords.len() > b.keywords.len(),
            };
            if more_specific {
                best = Some(pattern);
            }
        }
        best.map(|p| &p.handler)
    }

    /// Resolve or fail with `UnknownIntent` naming the capability.
    pub fn dispatch(&self, capability: &str, input: &str) -> Result<&H> {
        self.resolve(input)
            .ok_or_else(|| LocusError::UnknownIntent {
                capability: capability.to_string(),
                input: input.to_string(),
            })
    }

    /// Registered phrases, in registration order.
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.phrase.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Intent {
        Stats,
        Clear,
        ClearAll,
        Disable,
    }

    fn table() -> IntentTable<Intent> {
        IntentTable::new()
            .with("stats", Intent::Stats)
            .unwrap()
            .with("clear", Intent::Clear)
            .unwrap()
            .with("clear all", Intent::ClearAll)
            .unwrap()
            .with("disable", Intent::Disable)
            .unwrap()
    }

    #[test]
    fn test_most_specific_pattern_wins() {
        let t = table();
        assert_eq!(t.resolve("clear cache all"), Some(&Intent::ClearAll));
        assert_eq!(t.resolve("clear cache"), Some(&Intent::Clear));
    }

    #[test]
    fn test_case_insensitive_whole_words() {
        let t = table();
        assert_eq!(t.resolve("Cache STATS please"), Some(&Intent::Stats));
        // "statistics" is not the word "stats"
        assert_eq!(t.resolve("statistics"), None);
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let t = table();
        assert_eq!(t.resolve("disable stats"), Some(&Intent::Stats));
    }

    #[test]
    fn test_dispatch_unknown_intent() {
        let t = table();
        let err = t.dispatch("locator", "fly away").unwrap_err();
        assert!(matches!(err, LocusError::UnknownIntent { ref input, .. } if input == "fly away"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let mut t: IntentTable<Intent> = IntentTable::new();
        assert!(t.insert("   ", Intent::Stats).is_err());
        assert!(t.is_empty());
    }

    #[test]
    fn test_keywords_are_escaped() {
        let t = IntentTable::new().with("c++", 1u8).unwrap();
        assert_eq!(t.phrases().collect::<Vec<_>>(), vec!["c++"]);
        assert_eq!(t.len(), 1);
    }
}
