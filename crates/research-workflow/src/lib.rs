//! research-workflow: a checkpointed, self-correcting research state machine
//!
//! A research session moves through a fixed set of stages:
//!
//! ```text
//!  ┌──────┐   ┌────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//!  │ Plan │──▶│ Search │──▶│ Validate │──▶│ Synthesize │──▶│ SafetyCheck  │──▶ Success
//!  └──────┘   └────────┘   └──────────┘   └────────────┘   └──────────────┘
//!     ▲            │             │               │                 │
//!     │            └─────────────┴───────┬───────┴─────────────────┘
//!     │                                  ▼ (failed, budget left)
//!     │                            ┌───────────┐
//!     └────────────────────────────│ Reflexion │        (budget spent) ──▶ FailedMaxRetries
//!                                  └───────────┘
//! ```
//!
//! - [`stages`]: pure stage functions `(SessionState, collaborators) -> (SessionState, StageOutcome)`
//! - [`router`]: exhaustive transition table
//! - [`checkpoint`]: keyed snapshot persistence (memory, file, SQLite)
//! - [`engine`]: the driver loop that executes, routes and checkpoints
//!
//! External capabilities are narrow traits so tests can substitute
//! deterministic fakes:
//!
//! - [`CompletionProvider`] for plans, drafts, critiques and LLM safety review
//! - [`SearchProvider`] for candidate sources
//! - [`SafetyPolicy`] for verdicts on sources and drafts
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use research_workflow::{
//!     Collaborators, MemoryCheckpointStore, RulePolicy, WorkflowConfig, WorkflowEngine,
//! };
//!
//! let config = WorkflowConfig::default();
//! let safety = Arc::new(RulePolicy::from_config(&config.safety)?);
//! let collaborators = Collaborators::new(llm, search, safety);
//! let engine = WorkflowEngine::new(collaborators, Arc::new(MemoryCheckpointStore::new()), config)?;
//!
//! let state = engine.run("benefits of renewable energy", None).await?;
//! println!("{:?}: {}", state.status, state.draft);
//! ```

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod parser;
pub mod prompts;
pub mod rate_limit;
pub mod router;
pub mod safety;
pub mod search;
pub mod stages;
pub mod state;

// Re-exports for convenience
pub use checkpoint::{
    create_store, Checkpoint, CheckpointStore, CheckpointerConfig, FileCheckpointStore,
    MemoryCheckpointStore,
};
#[cfg(feature = "checkpointer-sqlite")]
pub use checkpoint::SqliteCheckpointStore;
pub use config::{RateLimitConfig, RetryPolicy, SafetyPolicyConfig, WorkflowConfig};
pub use engine::WorkflowEngine;
pub use error::{CheckpointError, CollaboratorError, RouteError, StageError, WorkflowError};
pub use llm::{CompletionProvider, CompletionSettings, Retrying, RigCompletionProvider};
pub use parser::{parse_plan, parse_reflexion, parse_synthesis, parse_verdict, SynthesisOutput};
pub use prompts::ResearchPrompts;
pub use rate_limit::{RateGate, Throttled, TokenBucket};
pub use router::{Decision, Router};
pub use safety::{
    aggregate, Assessment, ContentModerator, LayeredPolicy, LlmSafetyPolicy, RulePolicy,
    SafetyPolicy, SafetySubject, UrlValidator,
};
pub use search::{SearchHit, SearchProvider, TavilySearchProvider};
pub use stages::{Collaborators, StageResult};
pub use state::{
    Cursor, HistoryEntry, HistoryOutcome, OutcomeKind, ReflexionCritique, ResearchPlan,
    SafetyRecord, SessionState, SessionStatus, Source, Stage, StageOutcome, Verdict,
};
