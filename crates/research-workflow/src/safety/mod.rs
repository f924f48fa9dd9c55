//! Safety gate
//!
//! A [`SafetyPolicy`] turns a source or a draft into an [`Assessment`].
//! [`RulePolicy`] applies domain and keyword rules locally;
//! [`LlmSafetyPolicy`] asks a language model; [`LayeredPolicy`] runs the
//! rules first and escalates only uncertain cases to the model.

mod review;
mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::state::Verdict;

pub use review::{LayeredPolicy, LlmSafetyPolicy};
pub use rules::{ContentModerator, RulePolicy, UrlValidator};

/// What is being classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetySubject<'a> {
    Source { url: &'a str, content: &'a str },
    Draft(&'a str),
}

impl SafetySubject<'_> {
    /// Label stored on the resulting safety record
    pub fn label(&self) -> String {
        match self {
            Self::Source { url, .. } => url.to_string(),
            Self::Draft(_) => "draft".to_string(),
        }
    }
}

/// A single classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub verdict: Verdict,
    pub confidence: f32,
    pub reason: String,
    #[serde(default)]
    pub flagged: Vec<String>,
}

impl Assessment {
    pub fn new(verdict: Verdict, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            flagged: Vec::new(),
        }
    }

    pub fn safe(confidence: f32, reason: impl Into<String>) -> Self {
        Self::new(Verdict::Safe, confidence, reason)
    }

    pub fn unsafe_(confidence: f32, reason: impl Into<String>) -> Self {
        Self::new(Verdict::Unsafe, confidence, reason)
    }

    pub fn uncertain(confidence: f32, reason: impl Into<String>) -> Self {
        Self::new(Verdict::Uncertain, confidence, reason)
    }

    pub fn with_flagged(mut self, flagged: Vec<String>) -> Self {
        self.flagged = flagged;
        self
    }

    pub fn is_safe(&self) -> bool {
        self.verdict == Verdict::Safe
    }
}

/// Safety classification capability
#[async_trait]
pub trait SafetyPolicy: Send + Sync {
    async fn classify(&self, subject: &SafetySubject<'_>) -> Result<Assessment, CollaboratorError>;
}

/// Combine several checks: any unsafe wins, then any uncertain, else safe.
/// Confidence is the lowest among the checks that decided the verdict.
pub fn aggregate(assessments: &[Assessment]) -> Assessment {
    if assessments.is_empty() {
        return Assessment::uncertain(0.0, "no checks performed");
    }

    let verdict = if assessments.iter().any(|a| a.verdict == Verdict::Unsafe) {
        Verdict::Unsafe
    } else if assessments.iter().any(|a| a.verdict == Verdict::Uncertain) {
        Verdict::Uncertain
    } else {
        Verdict::Safe
    };

    let deciding: Vec<&Assessment> = assessments.iter().filter(|a| a.verdict == verdict).collect();
    let confidence = deciding
        .iter()
        .map(|a| a.confidence)
        .fold(f32::INFINITY, f32::min);
    let reason = deciding
        .iter()
        .map(|a| a.reason.as_str())
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    let mut flagged: Vec<String> = Vec::new();
    for item in assessments.iter().flat_map(|a| a.flagged.iter()) {
        if !flagged.contains(item) {
            flagged.push(item.clone());
        }
    }

    Assessment::new(verdict, confidence, reason).with_flagged(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_unsafe_wins() {
        let checks = vec![
            Assessment::safe(0.9, "trusted domain"),
            Assessment::safe(0.8, "no blocked keywords"),
            Assessment::unsafe_(0.7, "blocked keywords").with_flagged(vec!["violence".into()]),
        ];
        let combined = aggregate(&checks);
        assert_eq!(combined.verdict, Verdict::Unsafe);
        assert!(!combined.is_safe());
        assert!((combined.confidence - 0.7).abs() < 1e-6);
        assert_eq!(combined.flagged, vec!["violence"]);
    }

    #[test]
    fn test_aggregate_uncertain_over_safe() {
        let checks = vec![
            Assessment::safe(0.9, "a"),
            Assessment::uncertain(0.5, "unknown domain"),
        ];
        let combined = aggregate(&checks);
        assert_eq!(combined.verdict, Verdict::Uncertain);
        assert_eq!(combined.reason, "unknown domain");
    }

    #[test]
    fn test_aggregate_all_safe_takes_min_confidence() {
        let checks = vec![Assessment::safe(0.9, "a"), Assessment::safe(0.8, "b")];
        let combined = aggregate(&checks);
        assert_eq!(combined.verdict, Verdict::Safe);
        assert!((combined.confidence - 0.8).abs() < 1e-6);
        assert_eq!(combined.reason, "a; b");
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate(&[]).verdict, Verdict::Uncertain);
    }

    #[test]
    fn test_subject_label() {
        let subject = SafetySubject::Source {
            url: "https://arxiv.org/abs/1",
            content: "",
        };
        assert_eq!(subject.label(), "https://arxiv.org/abs/1");
        assert_eq!(SafetySubject::Draft("text").label(), "draft");
    }
}
