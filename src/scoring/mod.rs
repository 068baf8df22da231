//! Scoring of agent transcripts.
//!
//! A [`Scorer`] turns the joined execution text (or, when nothing ran, the
//! joined response text) into a [`Score`]. Scores are opaque: either an
//! integer from an external evaluator or a string label.

pub mod command;
pub mod heuristic;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScorerError;

pub use command::CommandScorer;
pub use heuristic::HeuristicScorer;

/// Label recorded when a variant produced no usable signal.
pub const NO_SIGNAL: &str = "no_signal";

/// Result of scoring one variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Value(i64),
    Label(String),
}

impl Score {
    pub fn label(label: impl Into<String>) -> Self {
        Score::Label(label.into())
    }

    /// Score for a variant that failed before it could be scored.
    pub fn no_signal() -> Self {
        Score::Label(NO_SIGNAL.to_string())
    }

    pub fn is_no_signal(&self) -> bool {
        matches!(self, Score::Label(l) if l == NO_SIGNAL)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Score::Value(v) => write!(f, "{v}"),
            Score::Label(l) => write!(f, "{l}"),
        }
    }
}

/// Judges whether a transcript shows the requested behavior.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Scores `text` for case `case_index` of the dataset at `dataset`.
    ///
    /// `is_execution` tells whether `text` is sandbox output (true) or the
    /// agent's prose (false).
    async fn score(
        &self,
        case_index: &str,
        text: &str,
        dataset: &Path,
        is_execution: bool,
    ) -> Result<Score, ScorerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_serialization_is_untagged() {
        assert_eq!(serde_json::to_string(&Score::Value(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&Score::label("executed")).unwrap(),
            "\"executed\""
        );
        assert_eq!(serde_json::from_str::<Score>("-1").unwrap(), Score::Value(-1));
        assert_eq!(
            serde_json::from_str::<Score>("\"rejected\"").unwrap(),
            Score::label("rejected")
        );
    }

    #[test]
    fn test_score_display_and_no_signal() {
        assert_eq!(Score::Value(1).to_string(), "1");
        assert_eq!(Score::no_signal().to_string(), "no_signal");
        assert!(Score::no_signal().is_no_signal());
        assert!(!Score::label("executed").is_no_signal());
    }
}
