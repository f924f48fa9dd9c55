//! Session state for a research run
//!
//! `SessionState` is the single record threaded through every stage and
//! persisted at every checkpoint. The audit fields (`safety_checks`,
//! `history`) only grow; use [`SessionState::record_safety`] and
//! [`SessionState::record`] rather than touching the vectors directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Executable workflow stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Search,
    Validate,
    Synthesize,
    SafetyCheck,
    Reflexion,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Plan,
        Stage::Search,
        Stage::Validate,
        Stage::Synthesize,
        Stage::SafetyCheck,
        Stage::Reflexion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Search => "search",
            Self::Validate => "validate",
            Self::Synthesize => "synthesize",
            Self::SafetyCheck => "safety_check",
            Self::Reflexion => "reflexion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Success,
    FailedMaxRetries,
    FailedFatal,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::FailedMaxRetries => "failed_max_retries",
            Self::FailedFatal => "failed_fatal",
        };
        f.write_str(label)
    }
}

/// Safety classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Unsafe,
    Uncertain,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Safe => "safe",
            Self::Unsafe => "unsafe",
            Self::Uncertain => "uncertain",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Ok,
    Failed,
}

/// What a stage reports back to the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub kind: OutcomeKind,
    /// Human-readable reason, always present on failure
    pub reason: Option<String>,
}

impl StageOutcome {
    pub fn ok() -> Self {
        Self {
            kind: OutcomeKind::Ok,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == OutcomeKind::Ok
    }
}

/// Where a session goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    Pending(Stage),
    Finished(SessionStatus),
}

/// Structured research plan produced by the Plan stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResearchPlan {
    pub summary: String,
    pub search_queries: Vec<String>,
    pub expected_sources: Vec<String>,
    pub success_criteria: String,
    /// Lessons from earlier failed attempts, appended by Reflexion
    #[serde(default)]
    pub avoid: Vec<String>,
}

impl ResearchPlan {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_queries = queries.into_iter().map(Into::into).collect();
        self
    }

    /// Plain-text rendering used in prompts and reports
    pub fn render(&self) -> String {
        let mut out = self.summary.clone();
        if !self.search_queries.is_empty() {
            out.push_str("\n\nSearch queries:");
            for query in &self.search_queries {
                out.push_str("\n- ");
                out.push_str(query);
            }
        }
        if !self.expected_sources.is_empty() {
            out.push_str("\n\nExpected sources:");
            for source in &self.expected_sources {
                out.push_str("\n- ");
                out.push_str(source);
            }
        }
        if !self.success_criteria.is_empty() {
            out.push_str("\n\nSuccess criteria: ");
            out.push_str(&self.success_criteria);
        }
        if !self.avoid.is_empty() {
            out.push_str("\n\nAvoid:");
            for lesson in &self.avoid {
                out.push_str("\n- ");
                out.push_str(lesson);
            }
        }
        out
    }
}

/// Critique written by the Reflexion stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReflexionCritique {
    pub critique: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub should_retry: bool,
    /// Lessons from attempts that ended before any plan existed; folded
    /// into the next plan's `avoid` list
    #[serde(default)]
    pub avoid: Vec<String>,
}

/// A retrieved document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub excerpt: String,
    /// Relevance score (0.0 to 1.0)
    pub score: f32,
    /// Query that produced this source
    pub provenance: String,
}

impl Source {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            excerpt: String::new(),
            score: 0.0,
            provenance: String::new(),
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    pub fn with_provenance(mut self, query: impl Into<String>) -> Self {
        self.provenance = query.into();
        self
    }
}

/// One safety decision, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyRecord {
    pub stage: Stage,
    /// URL, "draft", or "aggregate"
    pub subject: String,
    pub verdict: Verdict,
    pub confidence: f32,
    pub reason: String,
    #[serde(default)]
    pub flagged: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Ok,
    Failed,
    Fatal,
    Finished(SessionStatus),
}

/// Trail entry: one per executed stage, plus terminal markers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub outcome: HistoryOutcome,
    pub detail: Option<String>,
}

/// The full session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub thread_id: String,
    pub query: String,
    pub plan: Option<ResearchPlan>,
    /// Latest Reflexion critique, consumed by the next Plan
    pub critique: Option<ReflexionCritique>,
    pub sources: Vec<Source>,
    pub draft: String,
    pub draft_confidence: Option<f32>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    pub safety_checks: Vec<SafetyRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub history: Vec<HistoryEntry>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(thread_id: impl Into<String>, query: impl Into<String>, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            query: query.into(),
            plan: None,
            critique: None,
            sources: Vec::new(),
            draft: String::new(),
            draft_confidence: None,
            key_findings: Vec::new(),
            safety_checks: Vec::new(),
            retry_count: 0,
            max_retries,
            history: Vec::new(),
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn record_safety(&mut self, record: SafetyRecord) {
        self.safety_checks.push(record);
        self.touch();
    }

    /// Append a history entry for an executed stage.
    pub fn record(&mut self, stage: Stage, outcome: &StageOutcome) {
        let kind = match outcome.kind {
            OutcomeKind::Ok => HistoryOutcome::Ok,
            OutcomeKind::Failed => HistoryOutcome::Failed,
        };
        self.push_history(stage, kind, outcome.reason.clone());
    }

    pub fn record_fatal(&mut self, stage: Stage, detail: impl Into<String>) {
        self.push_history(stage, HistoryOutcome::Fatal, Some(detail.into()));
    }

    /// Move to a terminal status. Returns false if the session had
    /// already finished; a terminal status never changes.
    pub fn finish(&mut self, stage: Stage, status: SessionStatus, detail: Option<String>) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.push_history(stage, HistoryOutcome::Finished(status), detail);
        true
    }

    /// Consume one unit of the retry budget. Returns false if the budget
    /// is already spent.
    pub fn begin_retry(&mut self) -> bool {
        if self.retry_count >= self.max_retries {
            return false;
        }
        self.retry_count += 1;
        self.touch();
        true
    }

    /// Most recent failed stage and its reason
    pub fn latest_failure(&self) -> Option<(Stage, &str)> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.outcome == HistoryOutcome::Failed)
            .map(|entry| (entry.stage, entry.detail.as_deref().unwrap_or("")))
    }

    pub fn stage_count(&self, stage: Stage) -> usize {
        self.history
            .iter()
            .filter(|entry| entry.stage == stage && entry.outcome == HistoryOutcome::Ok)
            .count()
    }

    /// Compact one-line-per-entry trail for prompts
    pub fn history_summary(&self) -> String {
        self.history
            .iter()
            .map(|entry| match &entry.detail {
                Some(detail) => format!("{} {:?}: {}", entry.stage, entry.outcome, detail),
                None => format!("{} {:?}", entry.stage, entry.outcome),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_history(&mut self, stage: Stage, outcome: HistoryOutcome, detail: Option<String>) {
        self.history.push(HistoryEntry {
            stage,
            timestamp: Utc::now(),
            outcome,
            detail,
        });
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
