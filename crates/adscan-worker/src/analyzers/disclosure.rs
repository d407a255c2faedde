//! Advertising disclosure detection.
//!
//! A rule matcher always runs. An optional classifier adds a probability;
//! both land in the same [`DisclosureOutput`].

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use adscan_ml_client::{DisclosureClassification, MlClient};
use adscan_models::clamp_unit;

use super::{DisclosureDetector, DisclosureOutput, TranscriptOutput};
use crate::error::{StageResult, WorkerError, WorkerResult};

/// Classifier probability at which its labels count as markers.
const CLASSIFIER_MARKER_THRESHOLD: f64 = 0.5;

/// One labelled pattern and how strongly it indicates a disclosure.
#[derive(Debug, Clone)]
pub struct DisclosureRule {
    pub label: String,
    pub pattern: Regex,
    pub weight: f64,
}

impl DisclosureRule {
    pub fn new(label: impl Into<String>, pattern: &str, weight: f64) -> WorkerResult<Self> {
        let label = label.into();
        let pattern = Regex::new(pattern)
            .map_err(|e| WorkerError::config_error(format!("bad disclosure pattern for {label}: {e}")))?;
        Ok(Self {
            label,
            pattern,
            weight: clamp_unit(weight),
        })
    }
}

/// The mandatory rule matcher.
#[derive(Debug, Clone)]
pub struct DisclosureRules {
    rules: Vec<DisclosureRule>,
}

impl DisclosureRules {
    pub fn new(rules: Vec<DisclosureRule>) -> Self {
        Self { rules }
    }

    /// Russian ad-marking requirements plus common English disclosures.
    pub fn defaults() -> WorkerResult<Self> {
        Ok(Self::new(vec![
            // Ad token issued by the advertising registry.
            DisclosureRule::new("erid", r"(?i)\berid\s*[:：=]?\s*[0-9a-z]{4,}", 1.0)?,
            DisclosureRule::new("на правах рекламы", r"(?i)\bна\s+правах\s+рекламы\b", 1.0)?,
            DisclosureRule::new("реклама", r"(?i)\bреклама\b", 0.9)?,
            DisclosureRule::new("#ad", r"(?i)(?:^|\s)#(?:ad|ads|sponsored|реклама)\b", 0.9)?,
            DisclosureRule::new("партнерский материал", r"(?i)\bпартн[её]рск\w*\s+материал\w*", 0.8)?,
            DisclosureRule::new("paid partnership", r"(?i)\bpaid\s+partnership\b", 0.8)?,
            DisclosureRule::new("advertisement", r"(?i)\badvertisement\b", 0.8)?,
            DisclosureRule::new("рекламодатель", r"(?i)\bрекламодател\w*", 0.7)?,
            DisclosureRule::new("sponsored", r"(?i)\bsponsored\b", 0.7)?,
        ]))
    }

    /// Build from pattern-set text: one `label<TAB>weight<TAB>regex` rule per line.
    ///
    /// Blank lines and lines starting with `#` are skipped. Weights must lie in `[0, 1]`.
    pub fn parse(text: &str) -> WorkerResult<Self> {
        let mut rules = Vec::new();
        let mut labels = BTreeSet::new();

        for (n, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, '\t');
            let (Some(label), Some(weight), Some(pattern)) = (fields.next(), fields.next(), fields.next()) else {
                return Err(WorkerError::config_error(format!(
                    "disclosure pattern line {}: expected label<TAB>weight<TAB>regex",
                    n + 1
                )));
            };

            let label = label.trim();
            if label.is_empty() || pattern.trim().is_empty() {
                return Err(WorkerError::config_error(format!(
                    "disclosure pattern line {}: empty label or pattern",
                    n + 1
                )));
            }
            if !labels.insert(label.to_string()) {
                return Err(WorkerError::config_error(format!("duplicate disclosure label {label:?}")));
            }
            let weight: f64 = weight
                .trim()
                .parse()
                .ok()
                .filter(|w: &f64| (0.0..=1.0).contains(w))
                .ok_or_else(|| {
                    WorkerError::config_error(format!(
                        "disclosure pattern line {}: weight {:?} is not in [0, 1]",
                        n + 1,
                        weight.trim()
                    ))
                })?;

            rules.push(DisclosureRule::new(label, pattern.trim(), weight)?);
        }

        if rules.is_empty() {
            return Err(WorkerError::config_error("disclosure pattern set is empty"));
        }
        Ok(Self::new(rules))
    }

    /// Load a pattern-set file.
    pub async fn from_file(path: &Path) -> WorkerResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let rules = Self::parse(&text)?;
        info!(path = %path.display(), rules = rules.len(), "Loaded disclosure patterns");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Matched labels and the strongest matched weight.
    pub fn evaluate(&self, text: &str) -> (BTreeSet<String>, f64) {
        let mut markers = BTreeSet::new();
        let mut score: f64 = 0.0;
        for rule in &self.rules {
            if rule.pattern.is_match(text) {
                markers.insert(rule.label.clone());
                score = score.max(rule.weight);
            }
        }
        (markers, score)
    }
}

/// Secondary classifier, consulted only when enabled.
#[async_trait]
pub trait DisclosureClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> StageResult<DisclosureClassification>;
}

/// LLM classifier hosted by the ML service.
pub struct MlDisclosureClassifier {
    ml: MlClient,
}

impl MlDisclosureClassifier {
    pub fn new(ml: MlClient) -> Self {
        Self { ml }
    }
}

#[async_trait]
impl DisclosureClassifier for MlDisclosureClassifier {
    async fn classify(&self, text: &str) -> StageResult<DisclosureClassification> {
        Ok(self.ml.classify_disclosure(text).await?)
    }
}

/// Rules plus the optional classifier.
pub struct CompositeDisclosureDetector {
    rules: DisclosureRules,
    classifier: Option<Arc<dyn DisclosureClassifier>>,
}

impl CompositeDisclosureDetector {
    pub fn new(rules: DisclosureRules, classifier: Option<Arc<dyn DisclosureClassifier>>) -> Self {
        Self { rules, classifier }
    }

    pub fn rules_only(rules: DisclosureRules) -> Self {
        Self::new(rules, None)
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }
}

#[async_trait]
impl DisclosureDetector for CompositeDisclosureDetector {
    async fn detect(&self, transcript: &TranscriptOutput) -> StageResult<DisclosureOutput> {
        let (mut markers, rule_score) = self.rules.evaluate(&transcript.text);

        let classifier_probability = match &self.classifier {
            Some(classifier) if !transcript.text.trim().is_empty() => {
                let verdict = classifier.classify(&transcript.text).await?;
                let probability = clamp_unit(verdict.probability);
                if probability >= CLASSIFIER_MARKER_THRESHOLD {
                    markers.extend(verdict.labels.into_iter().filter(|l| !l.trim().is_empty()));
                }
                debug!(probability, "Disclosure classifier verdict");
                Some(probability)
            }
            _ => None,
        };

        Ok(DisclosureOutput {
            disclosure_score: rule_score.max(classifier_probability.unwrap_or(0.0)),
            markers,
            rule_score,
            classifier_probability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedClassifier {
        verdict: StageResult<DisclosureClassification>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DisclosureClassifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> StageResult<DisclosureClassification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    fn transcript(text: &str) -> TranscriptOutput {
        TranscriptOutput {
            text: text.to_string(),
            ..TranscriptOutput::default()
        }
    }

    #[test]
    fn test_default_rules() {
        let rules = DisclosureRules::defaults().unwrap();

        let (markers, score) = rules.evaluate("Реклама. ООО Ромашка, erid: 2VtzqxYz1");
        assert!(markers.contains("erid"));
        assert!(markers.contains("реклама"));
        assert_eq!(score, 1.0);

        let (markers, score) = rules.evaluate("Этот ролик #ad для бренда");
        assert_eq!(markers, BTreeSet::from(["#ad".to_string()]));
        assert!((score - 0.9).abs() < 1e-9);

        let (markers, score) = rules.evaluate("обычный влог без рекламных вставок");
        assert!(markers.is_empty());
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn test_rules_only() {
        let detector = CompositeDisclosureDetector::rules_only(DisclosureRules::defaults().unwrap());
        let out = detector.detect(&transcript("This is a paid partnership")).await.unwrap();
        assert!(out.classifier_probability.is_none());
        assert!((out.disclosure_score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_classifier_raises_score_and_adds_labels() {
        let classifier = Arc::new(FixedClassifier {
            verdict: Ok(DisclosureClassification {
                probability: 0.95,
                labels: vec!["implicit_ad".to_string()],
            }),
            calls: AtomicU32::new(0),
        });
        let detector = CompositeDisclosureDetector::new(DisclosureRules::defaults().unwrap(), Some(classifier.clone()));

        let out = detector.detect(&transcript("Мне очень нравится этот крем")).await.unwrap();
        assert_eq!(out.rule_score, 0.0);
        assert_eq!(out.classifier_probability, Some(0.95));
        assert_eq!(out.disclosure_score, 0.95);
        assert!(out.markers.contains("implicit_ad"));

        detector.detect(&transcript("   ")).await.unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_low_probability_keeps_rule_score() {
        let classifier = Arc::new(FixedClassifier {
            verdict: Ok(DisclosureClassification {
                probability: 0.2,
                labels: vec!["maybe".to_string()],
            }),
            calls: AtomicU32::new(0),
        });
        let detector = CompositeDisclosureDetector::new(DisclosureRules::defaults().unwrap(), Some(classifier));

        let out = detector.detect(&transcript("Реклама")).await.unwrap();
        assert!((out.disclosure_score - 0.9).abs() < 1e-9);
        assert!(!out.markers.contains("maybe"));
    }

    #[tokio::test]
    async fn test_classifier_failure_is_a_stage_failure() {
        let classifier = Arc::new(FixedClassifier {
            verdict: Err(StageError::transient("ML service unavailable (503)")),
            calls: AtomicU32::new(0),
        });
        let detector = CompositeDisclosureDetector::new(DisclosureRules::defaults().unwrap(), Some(classifier));
        assert!(detector.detect(&transcript("text")).await.unwrap_err().is_transient());
    }

    #[test]
    fn test_parse_pattern_set() {
        let text = "# label\tweight\tregex\n\nerid\t1.0\t(?i)\\berid\\b\npromo\t0.4\t(?i)promo\\s+code\n";
        let rules = DisclosureRules::parse(text).unwrap();
        assert_eq!(rules.len(), 2);

        let (markers, score) = rules.evaluate("Use PROMO  code NEWS");
        assert_eq!(markers.into_iter().collect::<Vec<_>>(), vec!["promo".to_string()]);
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_bad_pattern_sets() {
        for text in [
            "",
            "# only comments\n",
            "erid 1.0 erid\n",
            "erid\t1.5\terid\n",
            "erid\theavy\terid\n",
            "erid\t1.0\t(unclosed\n",
            "erid\t1.0\terid\nerid\t0.5\tERID\n",
            "\t1.0\terid\n",
        ] {
            assert!(DisclosureRules::parse(text).is_err(), "accepted {text:?}");
        }
    }

    #[tokio::test]
    async fn test_pattern_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disclosure.tsv");
        tokio::fs::write(&path, "реклама\t0.9\t(?i)\\bреклама\\b\n").await.unwrap();
        let rules = DisclosureRules::from_file(&path).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.evaluate("Это реклама").0.contains("реклама"));
        assert!(DisclosureRules::from_file(&dir.path().join("missing.tsv")).await.is_err());
    }
}
