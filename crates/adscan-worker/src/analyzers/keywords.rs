//! Advertising keyword matching against a lexicon.
//!
//! Lexicon format: one phrase per line, `#` starts a comment. A trailing `*`
//! matches any word ending (`промокод*` also finds `промокодом`). Matching is
//! case-insensitive and respects Unicode word boundaries.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::{KeywordMatcher, KeywordOutput, TranscriptOutput};
use crate::error::{StageResult, WorkerError, WorkerResult};

const DEFAULT_LEXICON: &str = "\
# Russian
промокод*
скидк*
реклам*
спонсор*
партнер*
партнёр*
розыгрыш*
по ссылке в описании
переходите по ссылке
кэшбэк
бесплатная доставка
# English
promo code
discount code
use code
sponsor*
affiliate link
link in bio
giveaway
";

#[derive(Debug, Clone)]
struct LexiconEntry {
    phrase: String,
    pattern: Regex,
}

/// Lexicon-based [`KeywordMatcher`].
#[derive(Debug, Clone)]
pub struct LexiconMatcher {
    entries: Vec<LexiconEntry>,
    saturation: usize,
}

impl LexiconMatcher {
    /// Build from lexicon text.
    pub fn parse(lexicon: &str, saturation: usize) -> WorkerResult<Self> {
        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();

        for line in lexicon.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (phrase, prefix) = match line.strip_suffix('*') {
                Some(stem) => (stem.trim().to_lowercase(), true),
                None => (line.to_lowercase(), false),
            };
            if phrase.is_empty() || !seen.insert((phrase.clone(), prefix)) {
                continue;
            }

            let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
            let body = words.join(r"\s+");
            let tail = if prefix { r"\w*" } else { r"\b" };
            let pattern = Regex::new(&format!(r"(?i)\b{body}{tail}"))
                .map_err(|e| WorkerError::config_error(format!("bad lexicon entry {line:?}: {e}")))?;
            entries.push(LexiconEntry { phrase, pattern });
        }

        if entries.is_empty() {
            return Err(WorkerError::config_error("keyword lexicon is empty"));
        }

        Ok(Self {
            entries,
            saturation: saturation.max(1),
        })
    }

    pub fn with_defaults(saturation: usize) -> WorkerResult<Self> {
        Self::parse(DEFAULT_LEXICON, saturation)
    }

    /// Load a lexicon file.
    pub async fn from_file(path: &Path, saturation: usize) -> WorkerResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let matcher = Self::parse(&text, saturation)?;
        info!(path = %path.display(), entries = matcher.len(), "Loaded keyword lexicon");
        Ok(matcher)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct lexicon phrases found in `text`.
    pub fn find(&self, text: &str) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|entry| entry.pattern.is_match(text))
            .map(|entry| entry.phrase.clone())
            .collect()
    }

    pub fn text_score(&self, distinct_hits: usize) -> f64 {
        (distinct_hits as f64 / self.saturation as f64).min(1.0)
    }
}

#[async_trait]
impl KeywordMatcher for LexiconMatcher {
    async fn match_keywords(&self, transcript: &TranscriptOutput) -> StageResult<KeywordOutput> {
        let keywords = self.find(&transcript.text);
        Ok(KeywordOutput {
            text_score: self.text_score(keywords.len()),
            keywords,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lexicon_finds_promo_code() {
        let matcher = LexiconMatcher::with_defaults(3).unwrap();
        let hits = matcher.find("Используйте ПРОМОКОД blog и получите скидку");
        assert!(hits.contains("промокод"));
        assert!(hits.contains("скидк"));
    }

    #[test]
    fn test_prefix_entries_match_inflections() {
        let matcher = LexiconMatcher::with_defaults(3).unwrap();
        assert!(matcher.find("воспользуйтесь промокодом").contains("промокод"));
    }

    #[test]
    fn test_word_boundaries() {
        let matcher = LexiconMatcher::parse("code\nlink in bio", 2).unwrap();
        assert!(matcher.find("barcodes everywhere").is_empty());
        assert_eq!(
            matcher.find("The LINK  in\tbio, and the code."),
            BTreeSet::from(["code".to_string(), "link in bio".to_string()])
        );
    }

    #[test]
    fn test_comments_blank_lines_and_duplicates() {
        let matcher = LexiconMatcher::parse("# header\n\nPromo # trailing\npromo\n", 1).unwrap();
        assert_eq!(matcher.len(), 1);
        assert!(LexiconMatcher::parse("# nothing\n", 1).is_err());
    }

    #[test]
    fn test_text_score_saturates() {
        let matcher = LexiconMatcher::parse("a\nb", 3).unwrap();
        assert_eq!(matcher.text_score(0), 0.0);
        assert!((matcher.text_score(1) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(matcher.text_score(5), 1.0);
    }

    #[tokio::test]
    async fn test_match_keywords_output() {
        let matcher = LexiconMatcher::with_defaults(3).unwrap();
        let transcript = TranscriptOutput {
            text: "Ссылка по ссылке в описании, промокод NEWS".to_string(),
            ..TranscriptOutput::default()
        };
        let output = matcher.match_keywords(&transcript).await.unwrap();
        assert_eq!(output.keywords.len(), 2);
        assert!((output.text_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lexicon_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.txt");
        tokio::fs::write(&path, "erid\nреклама\n").await.unwrap();
        let matcher = LexiconMatcher::from_file(&path, 2).await.unwrap();
        assert_eq!(matcher.len(), 2);
    }
}
