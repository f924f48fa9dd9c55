//! Language-model collaborator
//!
//! Stages only need "prompt in, text out". [`CompletionProvider`] is that
//! seam; [`RigCompletionProvider`] backs it with any Rig agent and
//! [`Retrying`] adds backoff for transient errors.

mod retry;
mod rig_provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub use self::retry::Retrying;
pub use self::rig_provider::RigCompletionProvider;

/// Sampling settings forwarded with every completion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub temperature: f64,
    pub max_tokens: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl CompletionSettings {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Text completion capability used by Plan, Synthesize, Reflexion and the
/// LLM safety reviewer.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        settings: &CompletionSettings,
    ) -> Result<String, CollaboratorError>;

    /// Name for logging
    fn name(&self) -> &str {
        "completion"
    }
}
