//! # Configuration Module
//!
//! Loads the application configuration from environment variables (and a
//! `.env` file when present). Library-level knobs end up in a
//! [`WorkflowConfig`]; everything else (provider choice, API keys, paths)
//! stays here.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::env;
use std::fmt::Write as _;
use std::path::PathBuf;

use research_workflow::{RateLimitConfig, WorkflowConfig};

// =============================================================================
// PROVIDER SELECTION
// =============================================================================
/// Which language-model backend drives the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Google Gemini (needs GEMINI_API_KEY)
    Gemini,
    /// Local Ollama server
    Ollama,
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => anyhow::bail!("LLM_PROVIDER must be 'gemini' or 'ollama', got: {}", other),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: Provider,

    /// Gemini model name (e.g., "gemini-2.0-flash")
    pub gemini_model: String,
    pub gemini_api_key: Option<String>,

    /// Ollama model name (e.g., "llama3.2")
    pub ollama_model: String,
    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    pub tavily_api_key: Option<String>,

    /// One sub-directory per research thread
    pub checkpoint_dir: PathBuf,
    pub checkpoint_compression: bool,

    pub reports_dir: PathBuf,

    pub workflow: WorkflowConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_api_key: None,
            ollama_model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            tavily_api_key: None,
            checkpoint_dir: PathBuf::from("checkpoints"),
            checkpoint_compression: false,
            reports_dir: PathBuf::from("reports"),
            workflow: WorkflowConfig::default(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Unset keys keep their
    /// defaults; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(val) = get("LLM_PROVIDER") {
            config.provider = val.parse()?;
        }
        if let Some(val) = get("GEMINI_MODEL") {
            config.gemini_model = val;
        }
        config.gemini_api_key = get("GEMINI_API_KEY");
        if let Some(val) = get("OLLAMA_MODEL") {
            config.ollama_model = val;
        }
        if let Some(val) = get("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }
        config.tavily_api_key = get("TAVILY_API_KEY");

        if let Some(val) = get("CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(val);
        }
        if let Some(val) = get("CHECKPOINT_COMPRESSION") {
            config.checkpoint_compression = parse_bool(&val)
                .context("CHECKPOINT_COMPRESSION must be true or false")?;
        }
        if let Some(val) = get("REPORTS_DIR") {
            config.reports_dir = PathBuf::from(val);
        }

        let workflow = &mut config.workflow;
        if let Some(val) = get("MAX_RETRIES") {
            workflow.max_retries = val
                .parse()
                .context("MAX_RETRIES must be a non-negative integer")?;
            // keep the runaway guard above what the retry budget needs
            workflow.max_transitions = workflow
                .max_transitions
                .max(5 + 6 * workflow.max_retries as usize);
        }
        if let Some(val) = get("LLM_MAX_RETRIES") {
            workflow.llm_retry.max_retries = val
                .parse()
                .context("LLM_MAX_RETRIES must be a non-negative integer")?;
        }
        if let Some(val) = get("MAX_SEARCH_RESULTS") {
            workflow.max_search_results = val
                .parse()
                .context("MAX_SEARCH_RESULTS must be a valid positive integer")?;
        }
        if let Some(val) = get("TEMPERATURE") {
            workflow.completion.temperature = val
                .parse()
                .context("TEMPERATURE must be a valid floating-point number (e.g., 0.7)")?;
        }
        if let Some(val) = get("MAX_TOKENS") {
            workflow.completion.max_tokens = val
                .parse()
                .context("MAX_TOKENS must be a valid positive integer")?;
        }
        if let Some(val) = get("RATE_LIMIT_PER_MINUTE") {
            let requests = val
                .parse()
                .context("RATE_LIMIT_PER_MINUTE must be a valid positive integer")?;
            workflow.rate_limit = RateLimitConfig::per_minute(requests);
        }
        if let Some(val) = get("LLM_SAFETY_REVIEW") {
            workflow.safety.llm_review =
                parse_bool(&val).context("LLM_SAFETY_REVIEW must be true or false")?;
        }

        Ok(config)
    }

    /// Model name for the selected provider
    pub fn model(&self) -> &str {
        match self.provider {
            Provider::Gemini => &self.gemini_model,
            Provider::Ollama => &self.ollama_model,
        }
    }

    /// Override the model of the selected provider
    pub fn set_model(&mut self, model: impl Into<String>) {
        match self.provider {
            Provider::Gemini => self.gemini_model = model.into(),
            Provider::Ollama => self.ollama_model = model.into(),
        }
    }

    /// Validate everything a research run needs. Fails fast with the name
    /// of the missing or invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.workflow
            .validate()
            .context("Invalid workflow configuration")?;

        if self.model().is_empty() {
            anyhow::bail!("Model name cannot be empty");
        }
        if self.provider == Provider::Gemini && self.gemini_api_key.is_none() {
            anyhow::bail!("GEMINI_API_KEY is required when LLM_PROVIDER=gemini");
        }
        if self.tavily_api_key.is_none() {
            anyhow::bail!("TAVILY_API_KEY is required for web search");
        }

        Ok(())
    }

    /// Human-readable summary without secrets
    pub fn safe_summary(&self) -> String {
        let status = |key: &Option<String>| if key.is_some() { "set" } else { "missing" };
        let w = &self.workflow;

        let mut out = String::new();
        let _ = writeln!(out, "Provider:            {:?}", self.provider);
        let _ = writeln!(out, "Model:               {}", self.model());
        if self.provider == Provider::Ollama {
            let _ = writeln!(out, "Ollama host:         {}", self.ollama_host);
        }
        let _ = writeln!(out, "GEMINI_API_KEY:      {}", status(&self.gemini_api_key));
        let _ = writeln!(out, "TAVILY_API_KEY:      {}", status(&self.tavily_api_key));
        let _ = writeln!(out, "Max retries:         {}", w.max_retries);
        let _ = writeln!(out, "LLM retries:         {}", w.llm_retry.max_retries);
        let _ = writeln!(out, "Max search results:  {}", w.max_search_results);
        let _ = writeln!(out, "Temperature:         {}", w.completion.temperature);
        let _ = writeln!(out, "Max tokens:          {}", w.completion.max_tokens);
        let _ = writeln!(
            out,
            "Rate limit:          {} requests / {:?}",
            w.rate_limit.requests, w.rate_limit.period
        );
        let _ = writeln!(out, "LLM safety review:   {}", w.safety.llm_review);
        let _ = writeln!(
            out,
            "Checkpoints:         {} (compression: {})",
            self.checkpoint_dir.display(),
            self.checkpoint_compression
        );
        let _ = write!(out, "Reports:             {}", self.reports_dir.display());
        out
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.model(), "gemini-2.0-flash");
        assert_eq!(config.workflow.max_retries, 3);
        assert_eq!(config.workflow.max_search_results, 10);
        assert!(config.tavily_api_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("LLM_PROVIDER", "ollama"),
            ("OLLAMA_MODEL", "qwen2.5"),
            ("MAX_RETRIES", "12"),
            ("TEMPERATURE", "0.2"),
            ("RATE_LIMIT_PER_MINUTE", "30"),
            ("LLM_SAFETY_REVIEW", "off"),
            ("LLM_MAX_RETRIES", "5"),
            ("TAVILY_API_KEY", "tvly-123"),
        ])
        .unwrap();

        assert_eq!(config.workflow.llm_retry.max_retries, 5);
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.model(), "qwen2.5");
        assert_eq!(config.workflow.max_retries, 12);
        assert_eq!(config.workflow.max_transitions, 77);
        assert_eq!(config.workflow.rate_limit.requests, 30);
        assert!(!config.workflow.safety.llm_review);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(from_pairs(&[("LLM_PROVIDER", "openai")]).is_err());
        assert!(from_pairs(&[("MAX_RETRIES", "-1")]).is_err());
        assert!(from_pairs(&[("TEMPERATURE", "warm")]).is_err());
    }

    #[test]
    fn test_validation_requires_keys() {
        let config = from_pairs(&[("TAVILY_API_KEY", "tvly-123")]).unwrap();
        assert!(config.validate().is_err(), "gemini without a key");

        let config = from_pairs(&[("GEMINI_API_KEY", "g-123")]).unwrap();
        assert!(config.validate().is_err(), "no search key");

        let config =
            from_pairs(&[("GEMINI_API_KEY", "g-123"), ("TAVILY_API_KEY", "tvly-123")]).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_temperature() {
        let mut config =
            from_pairs(&[("GEMINI_API_KEY", "g-123"), ("TAVILY_API_KEY", "tvly-123")]).unwrap();
        config.workflow.completion.temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_safe_summary_hides_secrets() {
        let config = from_pairs(&[
            ("GEMINI_API_KEY", "super-secret"),
            ("TAVILY_API_KEY", "tvly-secret"),
        ])
        .unwrap();
        let summary = config.safe_summary();

        assert!(!summary.contains("super-secret"));
        assert!(!summary.contains("tvly-secret"));
        assert!(summary.contains("GEMINI_API_KEY:      set"));
    }

    #[test]
    fn test_set_model_targets_selected_provider() {
        let mut config = from_pairs(&[("LLM_PROVIDER", "ollama")]).unwrap();
        config.set_model("mistral");
        assert_eq!(config.ollama_model, "mistral");
        assert_eq!(config.gemini_model, "gemini-2.0-flash");
    }
}
