//! Search collaborator

mod tavily;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::state::Source;

pub use tavily::{SearchDepth, TavilySearchProvider, Topic};

/// One search result as returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub score: f32,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            excerpt: String::new(),
            score: 0.0,
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Convert into a session source, remembering which query found it.
    pub fn into_source(self, query: &str) -> Source {
        Source::new(self.url, self.title)
            .with_excerpt(self.excerpt)
            .with_score(self.score)
            .with_provenance(query)
    }
}

/// Web search capability used by the Search stage.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError>;

    fn name(&self) -> &str {
        "search"
    }
}
