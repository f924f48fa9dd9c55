//! Workflow configuration
//!
//! Retry budget, search breadth, completion settings, rate limits and the
//! rule lists used by the safety gate. Every field has a default so a
//! partial JSON document deserializes cleanly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::WorkflowError;
use crate::llm::CompletionSettings;

/// Domains whose content passes the URL check without review
pub const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "arxiv.org",
    "github.com",
    "stackoverflow.com",
    "nature.com",
    "science.org",
    "sciencedirect.com",
    "springer.com",
    "ieee.org",
    "acm.org",
    "nih.gov",
    "nasa.gov",
    "who.int",
    "europa.eu",
    "mit.edu",
    "stanford.edu",
    "britannica.com",
    "reuters.com",
    "bbc.co.uk",
    "docs.rs",
];

/// Keywords that make content unsafe
pub const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "violence",
    "hate",
    "harassment",
    "self-harm",
    "terrorism",
    "extremism",
    "weapon",
    "exploit",
    "malware",
];

/// Workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Reflexion budget per session
    pub max_retries: u32,

    /// Upper bound on sources kept after a Search
    pub max_search_results: usize,

    /// How many planned queries a single Search issues
    pub max_queries_per_search: usize,

    /// Safety net against routing bugs; a run that exceeds it ends FailedFatal
    pub max_transitions: usize,

    pub completion: CompletionSettings,

    /// Backoff for transient language-model errors, applied inside the
    /// collaborator before a stage sees the failure
    pub llm_retry: RetryPolicy,

    pub rate_limit: RateLimitConfig,

    pub safety: SafetyPolicyConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_search_results: 10,
            max_queries_per_search: 3,
            max_transitions: 64,
            completion: CompletionSettings::default(),
            llm_retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            safety: SafetyPolicyConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_search_results(mut self, max: usize) -> Self {
        self.max_search_results = max;
        self
    }

    pub fn with_max_queries_per_search(mut self, max: usize) -> Self {
        self.max_queries_per_search = max;
        self
    }

    pub fn with_max_transitions(mut self, max: usize) -> Self {
        self.max_transitions = max;
        self
    }

    pub fn with_completion(mut self, settings: CompletionSettings) -> Self {
        self.completion = settings;
        self
    }

    pub fn with_llm_retry(mut self, policy: RetryPolicy) -> Self {
        self.llm_retry = policy;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_safety(mut self, safety: SafetyPolicyConfig) -> Self {
        self.safety = safety;
        self
    }

    /// Load from a JSON document, filling gaps with defaults.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WorkflowError::config(format!("invalid workflow config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.max_search_results == 0 {
            return Err(WorkflowError::config("max_search_results must be at least 1"));
        }
        if self.max_queries_per_search == 0 {
            return Err(WorkflowError::config(
                "max_queries_per_search must be at least 1",
            ));
        }
        // Enough room for one full pass plus every reflexion round trip
        let minimum = 5 + (self.max_retries as usize) * 6;
        if self.max_transitions < minimum {
            return Err(WorkflowError::config(format!(
                "max_transitions ({}) is too small for max_retries {} (need at least {})",
                self.max_transitions, self.max_retries, minimum
            )));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(WorkflowError::config("temperature must be within 0.0..=2.0"));
        }
        if self.completion.max_tokens == 0 {
            return Err(WorkflowError::config("max_tokens must be at least 1"));
        }
        if self.llm_retry.backoff_base > self.llm_retry.backoff_max {
            return Err(WorkflowError::config(
                "llm_retry.backoff_base must not exceed llm_retry.backoff_max",
            ));
        }
        self.rate_limit.validate()
    }
}

/// Retry policy for transient collaborator errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(multiplier).min(self.backoff_max)
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }
}

/// Token bucket settings shared by the throttled collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size and tokens restored per `period`
    pub requests: u32,

    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            period: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            period: Duration::from_secs(60),
        }
    }

    pub fn refill_per_second(&self) -> f64 {
        self.requests as f64 / self.period.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.requests == 0 {
            return Err(WorkflowError::config("rate_limit.requests must be at least 1"));
        }
        if self.period.is_zero() {
            return Err(WorkflowError::config("rate_limit.period must be non-zero"));
        }
        Ok(())
    }
}

/// Rule lists for the safety gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicyConfig {
    pub trusted_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub blocked_keywords: Vec<String>,
    /// Escalate uncertain rule verdicts to a language-model reviewer
    pub llm_review: bool,
}

impl Default for SafetyPolicyConfig {
    fn default() -> Self {
        Self {
            trusted_domains: DEFAULT_TRUSTED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            blocked_domains: Vec::new(),
            blocked_keywords: DEFAULT_BLOCKED_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            llm_review: true,
        }
    }
}

impl SafetyPolicyConfig {
    pub fn with_trusted_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blocked_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_llm_review(mut self, enabled: bool) -> Self {
        self.llm_review = enabled;
        self
    }
}
