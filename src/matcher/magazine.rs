//! Keyword match with escalation to the classification oracle.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use whatlang::{Lang, Script};

use crate::ai::ClassificationOracle;
use crate::config::FailurePolicy;
use crate::error::ClassificationError;
use crate::source::Message;

/// Words in a file name or caption that mark an upload as a periodical.
const MAGAZINE_HINTS: &[&str] = &["magazine", "issue", "vol", "edition", "weekly", "monthly"];
const MIN_WORDS_FOR_LANGUAGE: usize = 6;

/// Outcome of the cheap local checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalVerdict {
    Match,
    NoMatch,
    /// Needs the oracle.
    Inconclusive,
}

pub struct MagazineMatcher {
    keywords: String,
    /// Any keyword term as a whole word. `None` when no usable term remains.
    terms: Option<Regex>,
    oracle: Arc<dyn ClassificationOracle>,
    timeout: Duration,
    policy: FailurePolicy,
}

impl MagazineMatcher {
    pub fn new(
        keywords: &str,
        oracle: Arc<dyn ClassificationOracle>,
        timeout: Duration,
        policy: FailurePolicy,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            keywords: keywords.trim().to_string(),
            terms: terms_regex(&split_terms(keywords))?,
            oracle,
            timeout,
            policy,
        })
    }

    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    /// Checks in order: empty text, executable, non-periodical document,
    /// non-English document, keyword hit. Anything left needs the oracle.
    pub fn local_verdict(&self, message: &Message) -> LocalVerdict {
        let text = message.searchable_text();
        if text.trim().is_empty() {
            return LocalVerdict::NoMatch;
        }
        if let Some(doc) = &message.document {
            if doc.is_executable() {
                return LocalVerdict::NoMatch;
            }
            if !doc.is_reading_format() && !has_magazine_hint(&text) {
                return LocalVerdict::NoMatch;
            }
            if !is_likely_english(&text) {
                debug!("Skipping non-English upload: {}", doc.file_name);
                return LocalVerdict::NoMatch;
            }
        }
        if self.terms.as_ref().is_some_and(|re| re.is_match(&text)) {
            return LocalVerdict::Match;
        }
        LocalVerdict::Inconclusive
    }

    pub async fn matches(&self, message: &Message) -> bool {
        match self.local_verdict(message) {
            LocalVerdict::Match => true,
            LocalVerdict::NoMatch => false,
            LocalVerdict::Inconclusive => match self.classify(message).await {
                Ok(relevant) => relevant,
                Err(e) => {
                    warn!(
                        "Classification failed for message {} in {}: {}",
                        message.id, message.chat_title, e
                    );
                    self.policy.on_failure()
                }
            },
        }
    }

    async fn classify(&self, message: &Message) -> Result<bool, ClassificationError> {
        let text = message.searchable_text();
        let judgement = tokio::time::timeout(
            self.timeout,
            self.oracle.classify(&text, &self.keywords),
        )
        .await
        .map_err(|_| ClassificationError::Timeout(self.timeout.as_secs()))??;
        debug!(
            "Message {} judged {:?} ({:.2})",
            message.id, judgement.decision, judgement.confidence
        );
        Ok(judgement.is_match())
    }
}

fn terms_regex(terms: &[String]) -> Result<Option<Regex>, regex::Error> {
    if terms.is_empty() {
        return Ok(None);
    }
    let alternatives: Vec<String> = terms.iter().map(|t| regex::escape(t)).collect();
    // Letters and digits only count as word characters, so `_` and `.` in file names separate words.
    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}])(?:{})(?:[^\p{{L}}\p{{N}}]|$)",
        alternatives.join("|")
    );
    Regex::new(&pattern).map(Some)
}

fn has_magazine_hint(text: &str) -> bool {
    let lower = text.to_lowercase();
    MAGAZINE_HINTS.iter().any(|hint| lower.contains(hint)) || mentions_year(&lower)
}

/// A standalone `20xx` token, as in `Forbes_March_2025`.
fn mentions_year(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_digit())
        .any(|token| token.len() == 4 && token.starts_with("20"))
}

/// Non-Latin scripts are never English. Latin text is only rejected when it is
/// long enough to judge and the detector is confident about another language.
fn is_likely_english(text: &str) -> bool {
    match whatlang::detect_script(text) {
        None => true,
        Some(Script::Latin) => {
            let words = text
                .split(|c: char| !c.is_alphabetic())
                .filter(|w| w.chars().count() > 1)
                .count();
            if words < MIN_WORDS_FOR_LANGUAGE {
                return true;
            }
            whatlang::detect(text)
                .map_or(true, |info| info.lang() == Lang::Eng || !info.is_reliable())
        }
        Some(_) => false,
    }
}

/// Keyword query split on commas and whitespace, case-folded.
/// Single characters are dropped so they cannot match nearly everything.
fn split_terms(keywords: &str) -> Vec<String> {
    keywords
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| t.chars().count() > 1)
        .collect()
}
