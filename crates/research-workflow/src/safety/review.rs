//! Language-model safety review

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Assessment, RulePolicy, SafetyPolicy, SafetySubject};
use crate::error::CollaboratorError;
use crate::llm::{CompletionProvider, CompletionSettings};
use crate::parser::parse_verdict;
use crate::prompts::ResearchPrompts;
use crate::state::Verdict;

/// Asks a language model for a verdict
pub struct LlmSafetyPolicy {
    llm: Arc<dyn CompletionProvider>,
    settings: CompletionSettings,
}

impl LlmSafetyPolicy {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self {
            llm,
            settings: CompletionSettings {
                temperature: 0.0,
                max_tokens: 256,
            },
        }
    }

    pub fn with_settings(mut self, settings: CompletionSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[async_trait]
impl SafetyPolicy for LlmSafetyPolicy {
    async fn classify(&self, subject: &SafetySubject<'_>) -> Result<Assessment, CollaboratorError> {
        let prompt = ResearchPrompts::safety_review(subject);
        let response = self.llm.complete(&prompt, &self.settings).await?;
        parse_verdict(&response)
    }
}

/// Rules first; uncertain rule verdicts go to the reviewer when one is set.
pub struct LayeredPolicy {
    rules: RulePolicy,
    reviewer: Option<LlmSafetyPolicy>,
}

impl LayeredPolicy {
    pub fn new(rules: RulePolicy) -> Self {
        Self {
            rules,
            reviewer: None,
        }
    }

    pub fn with_reviewer(mut self, reviewer: LlmSafetyPolicy) -> Self {
        self.reviewer = Some(reviewer);
        self
    }
}

#[async_trait]
impl SafetyPolicy for LayeredPolicy {
    async fn classify(&self, subject: &SafetySubject<'_>) -> Result<Assessment, CollaboratorError> {
        let ruled = self.rules.assess(subject);
        let reviewer = match (&ruled.verdict, &self.reviewer) {
            (Verdict::Uncertain, Some(reviewer)) => reviewer,
            _ => return Ok(ruled),
        };

        debug!(subject = %subject.label(), reason = %ruled.reason, "Escalating to LLM safety review");
        let mut reviewed = reviewer.classify(subject).await?;
        reviewed.reason = format!("{}; llm review: {}", ruled.reason, reviewed.reason);
        Ok(reviewed)
    }
}
