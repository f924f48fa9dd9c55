//! Rig-backed completion provider

use async_trait::async_trait;
use std::sync::Arc;

use rig::agent::Agent;
use rig::completion::{Completion, CompletionModel, Message as RigMessage};
use rig::message::AssistantContent;
use rig::OneOrMany;

use super::{CompletionProvider, CompletionSettings};
use crate::error::CollaboratorError;

/// Wraps a Rig `Agent<M>` so any Rig provider can drive the workflow.
///
/// ```rust,ignore
/// use rig::client::{CompletionClient, ProviderClient};
///
/// let client = rig::providers::gemini::Client::from_env();
/// let agent = client.agent("gemini-1.5-flash").build();
/// let provider = RigCompletionProvider::new(agent, "gemini");
/// ```
pub struct RigCompletionProvider<M>
where
    M: CompletionModel + Send + Sync,
{
    agent: Arc<Agent<M>>,
    name: String,
}

impl<M> RigCompletionProvider<M>
where
    M: CompletionModel + Send + Sync,
{
    pub fn new(agent: Agent<M>, name: impl Into<String>) -> Self {
        Self {
            agent: Arc::new(agent),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<M> CompletionProvider for RigCompletionProvider<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    async fn complete(
        &self,
        prompt: &str,
        settings: &CompletionSettings,
    ) -> Result<String, CollaboratorError> {
        let builder = self
            .agent
            .completion(RigMessage::user(prompt), Vec::new())
            .await
            .map_err(|e| classify_error(e.to_string()))?;

        let response = builder
            .temperature(settings.temperature)
            .max_tokens(settings.max_tokens)
            .send()
            .await
            .map_err(|e| classify_error(e.to_string()))?;

        Ok(text_from_choice(&response.choice))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<M> std::fmt::Debug for RigCompletionProvider<M>
where
    M: CompletionModel + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigCompletionProvider")
            .field("name", &self.name)
            .finish()
    }
}

/// Rig surfaces provider failures as strings; pick out throttling.
fn classify_error(message: String) -> CollaboratorError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        CollaboratorError::rate_limited(message)
    } else {
        CollaboratorError::unavailable(message)
    }
}

fn text_from_choice(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|item| match item {
            AssistantContent::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}
