//! Pipeline stage bookkeeping.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ArtifactRef;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Download,
    Transcribe,
    VisualDetect,
    KeywordDetect,
    DisclosureDetect,
    Aggregate,
    PersistReport,
}

impl StageName {
    /// Execution order.
    pub const ORDER: [StageName; 7] = [
        StageName::Download,
        StageName::Transcribe,
        StageName::VisualDetect,
        StageName::KeywordDetect,
        StageName::DisclosureDetect,
        StageName::Aggregate,
        StageName::PersistReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Download => "download",
            StageName::Transcribe => "transcribe",
            StageName::VisualDetect => "visual_detect",
            StageName::KeywordDetect => "keyword_detect",
            StageName::DisclosureDetect => "disclosure_detect",
            StageName::Aggregate => "aggregate",
            StageName::PersistReport => "persist_report",
        }
    }

    /// Zero-based position in [`StageName::ORDER`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::ORDER
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Outcome of a single stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// One attempt of one stage, kept for retry decisions and observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageAttempt {
    pub stage: StageName,
    /// 1-based attempt number within the current run
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record that a stage finished and where its output lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageCheckpoint {
    pub stage: StageName,
    pub artifact: ArtifactRef,
    /// Lowercase hex SHA-256 of the artifact bytes
    pub digest: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_index() {
        for (i, stage) in StageName::ORDER.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(stage.as_str().parse::<StageName>().unwrap(), *stage);
        }
        assert!(StageName::Download < StageName::PersistReport);
    }

    #[test]
    fn test_stage_serde_matches_as_str() {
        let json = serde_json::to_string(&StageName::VisualDetect).unwrap();
        assert_eq!(json, "\"visual_detect\"");
    }
}
