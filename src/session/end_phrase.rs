//! Session-ending phrase detection

use std::borrow::Cow;

use regex::Regex;

use crate::{Error, Result};

/// Phrases that close a session, in English and German
pub const DEFAULT_END_PHRASES: &[&str] = &[
    "bye",
    "bye bye",
    "goodbye",
    "good night",
    "see you",
    "see you later",
    "stop",
    "close",
    "exit",
    "quit",
    "end",
    "okay bye",
    "that's all",
    "that's all, thanks",
    "we're done",
    "tschüss",
    "tschuess",
    "auf wiedersehen",
    "auf wiedersehn",
    "ciao",
    "mach's gut",
    "machts gut",
    "beenden",
];

/// Verbs combined with the wake word ("bye jarvis")
const WAKE_WORD_VERBS: &[&str] = &["bye", "stop", "close", "exit", "tschüss"];

/// Build the phrase list for a session: base phrases plus wake-word variants
#[must_use]
pub fn phrases_for(base: &[String], wake_word: &str) -> Vec<String> {
    let wake_word = wake_word.trim();
    let mut phrases = base.to_vec();
    if !wake_word.is_empty() {
        phrases.extend(WAKE_WORD_VERBS.iter().map(|verb| format!("{verb} {wake_word}")));
    }
    phrases
}

/// Case-insensitive whole-phrase matcher, compiled once
#[derive(Debug, Clone)]
pub struct EndPhraseMatcher {
    pattern: Option<Regex>,
    phrases: Vec<String>,
}

impl EndPhraseMatcher {
    /// Compile a phrase set into a single alternation
    ///
    /// Blank entries and duplicates are ignored; the input order does not
    /// affect what matches.
    ///
    /// # Errors
    ///
    /// Returns error if the combined pattern fails to compile
    pub fn compile<I, S>(phrases: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        // Longest first, so "bye bye" is reported over "bye" in logs
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        phrases.dedup();

        if phrases.is_empty() {
            return Ok(Self {
                pattern: None,
                phrases,
            });
        }

        let joined = phrases
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{joined})\b"))
            .map_err(|e| Error::Config(format!("invalid end phrase pattern: {e}")))?;

        tracing::debug!(phrases = phrases.len(), "end phrases compiled");

        Ok(Self {
            pattern: Some(pattern),
            phrases,
        })
    }

    /// Whether `text` contains an end phrase at word boundaries
    #[must_use]
    pub fn is_end_phrase(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// The first end phrase found in `text`
    #[must_use]
    pub fn find<'t>(&self, text: &'t str) -> Option<Cow<'t, str>> {
        let pattern = self.pattern.as_ref()?;
        let text = normalize_apostrophes(text);
        match text {
            Cow::Borrowed(text) => pattern.find(text).map(|m| Cow::Borrowed(m.as_str())),
            Cow::Owned(text) => pattern
                .find(&text)
                .map(|m| Cow::Owned(m.as_str().to_string())),
        }
    }

    /// Compiled phrases, longest first
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

/// Recognizers often emit typographic apostrophes ("that’s all")
fn normalize_apostrophes(text: &str) -> Cow<'_, str> {
    if text.contains('\u{2019}') {
        Cow::Owned(text.replace('\u{2019}', "'"))
    } else {
        Cow::Borrowed(text)
    }
}
