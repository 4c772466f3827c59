//! Wake word detection
//!
//! Matches recognized text against the configured trigger phrases. Matching is
//! case-insensitive substring containment, so "Hey Cocoro, what's up?" matches
//! the phrase "hey cocoro".

/// Detects wake words in recognized text
///
/// Immutable after construction. An empty word list never matches, which
/// disables wake word gating.
#[derive(Debug, Clone, Default)]
pub struct WakeWordDetector {
    wake_words: Vec<String>,
}

impl WakeWordDetector {
    /// Create a detector from a list of phrases
    ///
    /// Phrases are trimmed and lower-cased; empty and duplicate phrases are dropped.
    #[must_use]
    pub fn new<I, S>(wake_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for word in wake_words {
            let word = word.as_ref().trim().to_lowercase();
            if !word.is_empty() && !normalized.contains(&word) {
                normalized.push(word);
            }
        }

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Self {
            wake_words: normalized,
        }
    }

    /// Parse a comma-separated phrase list, e.g. `"hey cocoro, cocoro"`
    #[must_use]
    pub fn from_comma_separated(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Check if text contains any wake word
    #[must_use]
    pub fn contains_wake_word(&self, text: &str) -> bool {
        let normalized = text.to_lowercase();

        if let Some(wake_word) = self.wake_words.iter().find(|w| normalized.contains(w.as_str())) {
            tracing::info!(wake_word, transcript = text, "wake word detected");
            return true;
        }

        false
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    /// Whether any wake word is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.wake_words.is_empty()
    }
}
