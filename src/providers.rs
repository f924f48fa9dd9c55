//! # Collaborator Wiring
//!
//! Builds the language-model, search and safety collaborators from the
//! application configuration. Every outbound call goes through one shared
//! [`RateGate`], so concurrent sessions in this process draw from the same
//! token bucket. Language-model calls retry transient errors with backoff,
//! taking a fresh token per attempt.

use anyhow::{Context, Result};
use rig::client::{CompletionClient, ProviderClient};
use rig::providers::{gemini, ollama};
use std::sync::Arc;
use tracing::{debug, info};

use research_workflow::{
    Collaborators, CompletionProvider, LayeredPolicy, LlmSafetyPolicy, RateGate,
    ResearchPrompts, Retrying, RigCompletionProvider, RulePolicy, SafetyPolicy,
    TavilySearchProvider, Throttled,
};

use crate::config::{AppConfig, Provider};

/// Build all collaborators for a run.
pub fn build_collaborators(config: &AppConfig) -> Result<Collaborators> {
    let gate = Arc::new(RateGate::from_config(&config.workflow.rate_limit));

    let llm = build_llm(config, gate.clone());

    let tavily_key = config
        .tavily_api_key
        .clone()
        .context("TAVILY_API_KEY is not set")?;
    let search = Arc::new(Throttled::new(TavilySearchProvider::new(tavily_key), gate));

    let rules = RulePolicy::from_config(&config.workflow.safety)
        .context("Invalid safety policy configuration")?;
    let safety: Arc<dyn SafetyPolicy> = if config.workflow.safety.llm_review {
        debug!("LLM review enabled for uncertain safety verdicts");
        Arc::new(LayeredPolicy::new(rules).with_reviewer(LlmSafetyPolicy::new(llm.clone())))
    } else {
        Arc::new(rules)
    };

    Ok(Collaborators::new(llm, search, safety))
}

fn build_llm(config: &AppConfig, gate: Arc<RateGate>) -> Arc<dyn CompletionProvider> {
    let model = config.model();
    let retry = config.workflow.llm_retry.clone();

    match config.provider {
        Provider::Gemini => {
            // Reads GEMINI_API_KEY, which validate() has already checked
            let client = gemini::Client::from_env();
            let agent = client
                .agent(model)
                .preamble(ResearchPrompts::system())
                .build();
            info!(model = %model, "Using Gemini");
            let throttled = Throttled::new(RigCompletionProvider::new(agent, "gemini"), gate);
            Arc::new(Retrying::new(throttled, retry))
        }
        Provider::Ollama => {
            // ollama::Client::from_env() reads OLLAMA_API_BASE_URL
            std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
            let client = ollama::Client::from_env();
            let agent = client
                .agent(model)
                .preamble(ResearchPrompts::system())
                .build();
            info!(model = %model, host = %config.ollama_host, "Using Ollama");
            let throttled = Throttled::new(RigCompletionProvider::new(agent, "ollama"), gate);
            Arc::new(Retrying::new(throttled, retry))
        }
    }
}
