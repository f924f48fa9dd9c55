//! Rule-based safety checks

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;

use super::{aggregate, Assessment, SafetyPolicy, SafetySubject};
use crate::config::SafetyPolicyConfig;
use crate::error::{CollaboratorError, WorkflowError};

/// Classifies URLs by domain
#[derive(Debug, Clone)]
pub struct UrlValidator {
    trusted: Vec<String>,
    blocked: Vec<String>,
}

impl UrlValidator {
    pub fn new<I, S>(trusted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            trusted: normalize_domains(trusted),
            blocked: Vec::new(),
        }
    }

    pub fn with_blocked<I, S>(mut self, blocked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked = normalize_domains(blocked);
        self
    }

    /// Trusted domains pass, blocked domains fail, everything else is
    /// uncertain.
    pub fn validate_url(&self, url: &str) -> Assessment {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return Assessment::unsafe_(0.7, format!("unparseable URL: {}", e)),
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return Assessment::unsafe_(0.8, format!("unsupported scheme: {}", parsed.scheme()));
        }
        let Some(host) = parsed.host_str() else {
            return Assessment::unsafe_(0.7, "URL has no host");
        };
        let host = host.to_ascii_lowercase();

        if let Some(domain) = self.blocked.iter().find(|d| domain_matches(&host, d)) {
            return Assessment::unsafe_(0.95, format!("blocked domain: {}", domain))
                .with_flagged(vec![domain.clone()]);
        }
        if let Some(domain) = self.trusted.iter().find(|d| domain_matches(&host, d)) {
            return Assessment::safe(0.9, format!("trusted domain: {}", domain));
        }
        Assessment::uncertain(0.5, format!("domain not in trusted list: {}", host))
    }
}

/// Flags text containing blocked keywords (whole words, case-insensitive)
#[derive(Debug, Clone)]
pub struct ContentModerator {
    pattern: Option<Regex>,
}

impl ContentModerator {
    pub fn new<I, S>(keywords: I) -> Result<Self, WorkflowError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .map_err(|e| WorkflowError::config(format!("invalid blocked keyword list: {}", e)))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn moderate(&self, text: &str) -> Assessment {
        let mut flagged: Vec<String> = Vec::new();
        if let Some(pattern) = &self.pattern {
            for m in pattern.find_iter(text) {
                let word = m.as_str().to_lowercase();
                if !flagged.contains(&word) {
                    flagged.push(word);
                }
            }
        }

        if flagged.is_empty() {
            return Assessment::safe(0.8, "no blocked keywords");
        }
        let confidence = (0.6 + 0.1 * flagged.len() as f32).min(0.95);
        Assessment::unsafe_(confidence, format!("blocked keywords: {}", flagged.join(", ")))
            .with_flagged(flagged)
    }
}

/// Domain and keyword rules, no network calls
#[derive(Debug, Clone)]
pub struct RulePolicy {
    urls: UrlValidator,
    content: ContentModerator,
}

impl RulePolicy {
    pub fn new(urls: UrlValidator, content: ContentModerator) -> Self {
        Self { urls, content }
    }

    pub fn from_config(config: &SafetyPolicyConfig) -> Result<Self, WorkflowError> {
        Ok(Self {
            urls: UrlValidator::new(&config.trusted_domains).with_blocked(&config.blocked_domains),
            content: ContentModerator::new(&config.blocked_keywords)?,
        })
    }

    pub fn assess(&self, subject: &SafetySubject<'_>) -> Assessment {
        match subject {
            SafetySubject::Source { url, content } => {
                aggregate(&[self.urls.validate_url(url), self.content.moderate(content)])
            }
            SafetySubject::Draft(text) => self.content.moderate(text),
        }
    }
}

#[async_trait]
impl SafetyPolicy for RulePolicy {
    async fn classify(&self, subject: &SafetySubject<'_>) -> Result<Assessment, CollaboratorError> {
        Ok(self.assess(subject))
    }
}

fn normalize_domains<I, S>(domains: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    domains
        .into_iter()
        .map(|d| {
            d.as_ref()
                .trim()
                .trim_start_matches("www.")
                .trim_start_matches('.')
                .to_ascii_lowercase()
        })
        .filter(|d| !d.is_empty())
        .collect()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
