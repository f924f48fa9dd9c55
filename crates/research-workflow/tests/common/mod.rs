//! Deterministic collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use research_workflow::{
    Assessment, Collaborators, CollaboratorError, CompletionProvider, CompletionSettings,
    SafetyPolicy, SafetySubject, SearchHit, SearchProvider,
};

/// A reply every parser accepts: a plan summary, a draft and a critique.
pub const DRAFT_REPLY: &str = "Renewable energy lowers emissions and operating costs. \
Retry with broader queries if sources are thin.\nConfidence: 0.87";

/// Returns the same text for every prompt and counts calls
pub struct FixedLlm {
    reply: String,
    pub calls: AtomicUsize,
}

impl FixedLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionProvider for FixedLlm {
    async fn complete(
        &self,
        _prompt: &str,
        _settings: &CompletionSettings,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Pops one scripted reply per call, then answers with [`DRAFT_REPLY`].
/// Keeps every prompt it was sent.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<String, CollaboratorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    async fn complete(
        &self,
        prompt: &str,
        _settings: &CompletionSettings,
    ) -> Result<String, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(DRAFT_REPLY.to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Pops one scripted result per call, then repeats `fallback`
pub struct ScriptedSearch {
    script: Mutex<VecDeque<Vec<SearchHit>>>,
    fallback: Vec<SearchHit>,
    pub calls: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new(script: Vec<Vec<SearchHit>>, fallback: Vec<SearchHit>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(hits: Vec<SearchHit>) -> Self {
        Self::new(Vec::new(), hits)
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut hits = next.unwrap_or_else(|| self.fallback.clone());
        hits.truncate(max_results);
        Ok(hits)
    }
}

/// Sources whose URL contains "blocked" are unsafe. Drafts are safe unless
/// `unsafe_drafts` is set.
pub struct FakePolicy {
    pub unsafe_drafts: bool,
}

#[async_trait]
impl SafetyPolicy for FakePolicy {
    async fn classify(&self, subject: &SafetySubject<'_>) -> Result<Assessment, CollaboratorError> {
        Ok(match subject {
            SafetySubject::Source { url, .. } if url.contains("blocked") => {
                Assessment::unsafe_(0.95, "blocked domain").with_flagged(vec![url.to_string()])
            }
            SafetySubject::Source { .. } => Assessment::safe(0.9, "trusted domain"),
            SafetySubject::Draft(_) if self.unsafe_drafts => {
                Assessment::unsafe_(0.8, "blocked keywords")
            }
            SafetySubject::Draft(_) => Assessment::safe(0.8, "no blocked content"),
        })
    }
}

/// Every source is safe; every draft is uncertain
pub struct UndecidedDrafts;

#[async_trait]
impl SafetyPolicy for UndecidedDrafts {
    async fn classify(&self, subject: &SafetySubject<'_>) -> Result<Assessment, CollaboratorError> {
        Ok(match subject {
            SafetySubject::Source { .. } => Assessment::safe(0.9, "trusted domain"),
            SafetySubject::Draft(_) => Assessment::uncertain(0.5, "reviewer could not decide"),
        })
    }
}

/// `safe` hits from trusted sites followed by `blocked` hits
pub fn hits(safe: usize, blocked: usize) -> Vec<SearchHit> {
    let safe_hits = (0..safe).map(|i| {
        SearchHit::new(format!("https://en.wikipedia.org/wiki/Energy_{}", i), "Energy")
            .with_excerpt("Solar and wind capacity keeps growing.")
            .with_score(0.8)
    });
    let blocked_hits = (0..blocked).map(|i| {
        SearchHit::new(format!("https://blocked.example/{}", i), "Spam")
            .with_excerpt("Buy now")
            .with_score(0.3)
    });
    safe_hits.chain(blocked_hits).collect()
}

pub fn collaborators(search: ScriptedSearch, unsafe_drafts: bool) -> Collaborators {
    Collaborators::new(
        Arc::new(FixedLlm::new(DRAFT_REPLY)),
        Arc::new(search),
        Arc::new(FakePolicy { unsafe_drafts }),
    )
}
