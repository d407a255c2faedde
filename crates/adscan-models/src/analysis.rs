//! Analysis result models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::{JobId, Platform};

/// A brand/logo detected in the video frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectedBrand {
    /// Brand name as reported by the detector
    pub name: String,
    /// Highest confidence observed (0.0 - 1.0)
    pub confidence: f64,
    /// Seconds into the media where the brand was seen, ascending
    pub timestamps: Vec<f64>,
}

impl DetectedBrand {
    pub fn new(name: impl Into<String>, confidence: f64, timestamp: f64) -> Self {
        Self {
            name: name.into(),
            confidence: clamp_unit(confidence),
            timestamps: vec![timestamp],
        }
    }
}

/// Merge brand hits by case-insensitive name.
///
/// Keeps the first-seen display name, the highest confidence and the sorted,
/// de-duplicated union of timestamps. Output order follows first appearance.
pub fn merge_brands<I>(hits: I) -> Vec<DetectedBrand>
where
    I: IntoIterator<Item = DetectedBrand>,
{
    let mut merged: Vec<DetectedBrand> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in hits {
        let key = hit.name.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(&i) => {
                let entry = &mut merged[i];
                entry.confidence = entry.confidence.max(clamp_unit(hit.confidence));
                entry.timestamps.extend(hit.timestamps);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(DetectedBrand {
                    name: hit.name.trim().to_string(),
                    confidence: clamp_unit(hit.confidence),
                    timestamps: hit.timestamps,
                });
            }
        }
    }

    for brand in &mut merged {
        brand.timestamps.retain(|t| t.is_finite());
        brand.timestamps.sort_by(f64::total_cmp);
        brand.timestamps.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    }

    merged
}

/// The four per-stage component scores.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ComponentScores {
    pub visual: f64,
    pub audio: f64,
    pub text: f64,
    pub disclosure: f64,
}

impl ComponentScores {
    pub fn as_array(&self) -> [f64; 4] {
        [self.visual, self.audio, self.text, self.disclosure]
    }
}

/// Aggregated outcome of a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    pub job_id: JobId,
    pub platform: Platform,

    pub visual_score: f64,
    pub audio_score: f64,
    pub text_score: f64,
    pub disclosure_score: f64,

    /// Weighted combination of the component scores
    pub confidence_score: f64,
    /// `confidence_score >= threshold`
    pub has_advertising: bool,

    pub detected_brands: Vec<DetectedBrand>,
    pub detected_keywords: BTreeSet<String>,
    pub transcript: String,
    pub disclosure_markers: BTreeSet<String>,

    /// Number of frames the visual stage analyzed
    #[serde(default)]
    pub frames_analyzed: u32,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn component_scores(&self) -> ComponentScores {
        ComponentScores {
            visual: self.visual_score,
            audio: self.audio_score,
            text: self.text_score,
            disclosure: self.disclosure_score,
        }
    }
}

/// Clamp into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
