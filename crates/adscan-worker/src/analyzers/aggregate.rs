//! Score aggregation.
//!
//! Pure: no I/O, no clock, no randomness. The same scores and weights
//! always give the same verdict.

use serde::{Deserialize, Serialize};

use adscan_models::{clamp_unit, ComponentScores};

/// Per-component weights of the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub visual: f64,
    pub audio: f64,
    pub text: f64,
    pub disclosure: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            visual: 0.35,
            audio: 0.15,
            text: 0.30,
            disclosure: 0.20,
        }
    }
}

impl ScoreWeights {
    pub fn as_array(&self) -> [f64; 4] {
        [self.visual, self.audio, self.text, self.disclosure]
    }

    pub fn validate(&self) -> Result<(), String> {
        let weights = self.as_array();
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(format!("score weights must be finite and non-negative, got {bad}"));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err("at least one score weight must be positive".to_string());
        }
        Ok(())
    }
}

/// Output of the Aggregate stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateOutput {
    pub scores: ComponentScores,
    pub confidence: f64,
    pub has_advertising: bool,
}

/// Combines the four component scores into one verdict.
pub trait ScoreAggregator: Send + Sync {
    fn aggregate(&self, scores: &ComponentScores) -> AggregateOutput;
}

/// Weighted mean with a decision threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedAggregator {
    weights: ScoreWeights,
    threshold: f64,
}

impl WeightedAggregator {
    pub fn new(weights: ScoreWeights, threshold: f64) -> Self {
        Self { weights, threshold }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for WeightedAggregator {
    fn default() -> Self {
        Self::new(ScoreWeights::default(), 0.4)
    }
}

impl ScoreAggregator for WeightedAggregator {
    fn aggregate(&self, scores: &ComponentScores) -> AggregateOutput {
        let scores = ComponentScores {
            visual: clamp_unit(scores.visual),
            audio: clamp_unit(scores.audio),
            text: clamp_unit(scores.text),
            disclosure: clamp_unit(scores.disclosure),
        };

        let weights = self.weights.as_array();
        let total: f64 = weights.iter().sum();
        let confidence = if total > 0.0 {
            let weighted: f64 = weights.iter().zip(scores.as_array()).map(|(w, s)| w * s).sum();
            clamp_unit(weighted / total)
        } else {
            0.0
        };

        AggregateOutput {
            scores,
            confidence,
            has_advertising: confidence >= self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scores(visual: f64, audio: f64, text: f64, disclosure: f64) -> ComponentScores {
        ComponentScores {
            visual,
            audio,
            text,
            disclosure,
        }
    }

    #[test]
    fn test_default_weights() {
        let out = WeightedAggregator::default().aggregate(&scores(1.0, 0.0, 1.0, 0.0));
        assert!((out.confidence - 0.65).abs() < 1e-9);
        assert!(out.has_advertising);

        let out = WeightedAggregator::default().aggregate(&scores(0.0, 1.0, 0.0, 1.0));
        assert!((out.confidence - 0.35).abs() < 1e-9);
        assert!(!out.has_advertising);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let aggregator = WeightedAggregator::new(
            ScoreWeights {
                visual: 1.0,
                audio: 0.0,
                text: 0.0,
                disclosure: 0.0,
            },
            0.5,
        );
        assert!(aggregator.aggregate(&scores(0.5, 0.0, 0.0, 0.0)).has_advertising);
        assert!(!aggregator.aggregate(&scores(0.49, 0.0, 0.0, 0.0)).has_advertising);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let out = WeightedAggregator::default().aggregate(&scores(f64::NAN, 7.0, -1.0, 1.0));
        assert_eq!(out.scores, scores(0.0, 1.0, 0.0, 1.0));
        assert!((out.confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_weight_validation() {
        assert!(ScoreWeights::default().validate().is_ok());
        let zero = ScoreWeights {
            visual: 0.0,
            audio: 0.0,
            text: 0.0,
            disclosure: 0.0,
        };
        assert!(zero.validate().is_err());
        let negative = ScoreWeights {
            visual: -0.1,
            ..ScoreWeights::default()
        };
        assert!(negative.validate().is_err());
        let nan = ScoreWeights {
            text: f64::NAN,
            ..ScoreWeights::default()
        };
        assert!(nan.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_aggregate_is_pure_and_bounded(
            v in 0.0f64..=1.0, a in 0.0f64..=1.0, t in 0.0f64..=1.0, d in 0.0f64..=1.0,
            threshold in 0.0f64..=1.0,
        ) {
            let aggregator = WeightedAggregator::new(ScoreWeights::default(), threshold);
            let input = scores(v, a, t, d);
            let first = aggregator.aggregate(&input);
            let second = aggregator.aggregate(&input);

            prop_assert_eq!(first, second);
            prop_assert!((0.0..=1.0).contains(&first.confidence));
            prop_assert_eq!(first.has_advertising, first.confidence >= threshold);
        }
    }
}
