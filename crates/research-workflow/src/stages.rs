//! Stage functions
//!
//! Each stage takes the session by value, may call collaborators, and
//! returns the updated session plus an outcome. Modeled failures (empty
//! plan, no sources, unsafe draft, transient collaborator trouble) are
//! `Ok(StageResult)` with a failed outcome; only contract violations come
//! back as [`StageError`].

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::error::{CollaboratorError, StageError};
use crate::llm::CompletionProvider;
use crate::parser::{parse_plan, parse_reflexion, parse_synthesis};
use crate::prompts::ResearchPrompts;
use crate::safety::{Assessment, SafetyPolicy, SafetySubject};
use crate::search::SearchProvider;
use crate::state::{ReflexionCritique, SafetyRecord, SessionState, Stage, StageOutcome, Verdict};

/// External capabilities the stages call
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn CompletionProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub safety: Arc<dyn SafetyPolicy>,
}

impl Collaborators {
    pub fn new(
        llm: Arc<dyn CompletionProvider>,
        search: Arc<dyn SearchProvider>,
        safety: Arc<dyn SafetyPolicy>,
    ) -> Self {
        Self {
            llm,
            search,
            safety,
        }
    }
}

/// Updated session plus what happened
#[derive(Debug, Clone)]
pub struct StageResult {
    pub state: SessionState,
    pub outcome: StageOutcome,
}

impl StageResult {
    fn ok(state: SessionState) -> Self {
        Self {
            state,
            outcome: StageOutcome::ok(),
        }
    }

    fn failed(state: SessionState, reason: impl Into<String>) -> Self {
        Self {
            state,
            outcome: StageOutcome::failed(reason),
        }
    }
}

/// Run one stage.
pub async fn execute(
    stage: Stage,
    state: SessionState,
    collaborators: &Collaborators,
    config: &WorkflowConfig,
) -> Result<StageResult, StageError> {
    match stage {
        Stage::Plan => plan(state, collaborators, config).await,
        Stage::Search => search(state, collaborators, config).await,
        Stage::Validate => validate(state, collaborators).await,
        Stage::Synthesize => synthesize(state, collaborators, config).await,
        Stage::SafetyCheck => safety_check(state, collaborators).await,
        Stage::Reflexion => reflexion(state, collaborators, config).await,
    }
}

/// Transient collaborator errors become a failed outcome; anything else is
/// fatal.
fn recover(
    stage: Stage,
    state: SessionState,
    error: CollaboratorError,
) -> Result<StageResult, StageError> {
    if error.is_transient() {
        warn!(stage = %stage, error = %error, "Collaborator unavailable, failing stage");
        Ok(StageResult::failed(state, error.to_string()))
    } else {
        Err(StageError::collaborator(stage, error))
    }
}

/// Produce or revise the research plan.
pub async fn plan(
    mut state: SessionState,
    collaborators: &Collaborators,
    config: &WorkflowConfig,
) -> Result<StageResult, StageError> {
    let prompt = match &state.critique {
        Some(critique) => ResearchPrompts::replan(&state.query, state.plan.as_ref(), critique),
        None => ResearchPrompts::plan(&state.query),
    };

    let text = match collaborators.llm.complete(&prompt, &config.completion).await {
        Ok(text) => text,
        Err(e) => return recover(Stage::Plan, state, e),
    };

    let Some(mut new_plan) = parse_plan(&text, &state.query) else {
        return Ok(StageResult::failed(state, "language model returned an empty plan"));
    };

    // Lessons survive re-planning
    if let Some(previous) = state.plan.take() {
        new_plan.avoid = previous.avoid;
    }
    if let Some(critique) = state.critique.take() {
        new_plan.avoid.extend(critique.avoid);
    }
    info!(queries = new_plan.search_queries.len(), "Research plan ready");
    state.plan = Some(new_plan);
    Ok(StageResult::ok(state))
}

/// Retrieve candidate sources for the planned queries.
pub async fn search(
    mut state: SessionState,
    collaborators: &Collaborators,
    config: &WorkflowConfig,
) -> Result<StageResult, StageError> {
    let plan = state
        .plan
        .as_ref()
        .ok_or_else(|| StageError::precondition(Stage::Search, "no research plan"))?;

    let queries: Vec<String> = plan
        .search_queries
        .iter()
        .take(config.max_queries_per_search)
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    let mut last_error = None;

    for query in &queries {
        match collaborators.search.search(query, config.max_search_results).await {
            Ok(hits) => {
                debug!(query = %query, hits = hits.len(), "Search query returned");
                for hit in hits {
                    if seen.insert(hit.url.clone()) {
                        sources.push(hit.into_source(query));
                    }
                }
            }
            Err(e) if e.is_transient() => {
                warn!(query = %query, error = %e, "Search query failed");
                last_error = Some(e);
            }
            Err(e) => return Err(StageError::collaborator(Stage::Search, e)),
        }
    }

    sources.truncate(config.max_search_results);
    state.sources = sources;

    if state.sources.is_empty() {
        let reason = match last_error {
            Some(e) => e.to_string(),
            None => "search returned zero sources".to_string(),
        };
        return Ok(StageResult::failed(state, reason));
    }

    info!(sources = state.sources.len(), "Search complete");
    Ok(StageResult::ok(state))
}

/// Drop unsafe sources and record every removal.
pub async fn validate(
    mut state: SessionState,
    collaborators: &Collaborators,
) -> Result<StageResult, StageError> {
    let candidates = std::mem::take(&mut state.sources);
    let total = candidates.len();
    let mut kept = Vec::with_capacity(total);
    let (mut safe, mut uncertain, mut removed) = (0usize, 0usize, 0usize);

    for source in candidates {
        let subject = SafetySubject::Source {
            url: &source.url,
            content: &source.excerpt,
        };
        let assessment = match collaborators.safety.classify(&subject).await {
            Ok(assessment) => assessment,
            Err(e) if e.is_transient() => {
                warn!(url = %source.url, error = %e, "Safety classifier unavailable");
                Assessment::uncertain(0.0, format!("classifier unavailable: {}", e))
            }
            Err(e) => return Err(StageError::collaborator(Stage::Validate, e)),
        };

        match assessment.verdict {
            Verdict::Unsafe => {
                removed += 1;
                state.record_safety(record(Stage::Validate, subject.label(), assessment));
            }
            Verdict::Safe => {
                safe += 1;
                kept.push(source);
            }
            Verdict::Uncertain => {
                uncertain += 1;
                kept.push(source);
            }
        }
    }

    state.sources = kept;

    let verdict = if safe > 0 {
        Verdict::Safe
    } else if uncertain > 0 {
        Verdict::Uncertain
    } else {
        Verdict::Unsafe
    };
    let confidence = if total == 0 { 0.0 } else { safe as f32 / total as f32 };
    let summary = format!(
        "{} of {} sources safe, {} uncertain, {} removed",
        safe, total, uncertain, removed
    );
    state.record_safety(record(
        Stage::Validate,
        "aggregate".to_string(),
        Assessment::new(verdict, confidence, summary.clone()),
    ));
    info!(safe, uncertain, removed, "Validation complete");

    if safe == 0 {
        let reason = if total == 0 {
            "no sources to validate".to_string()
        } else {
            format!("no source passed the safety gate ({})", summary)
        };
        return Ok(StageResult::failed(state, reason));
    }
    Ok(StageResult::ok(state))
}

/// Draft an answer from the validated sources.
pub async fn synthesize(
    mut state: SessionState,
    collaborators: &Collaborators,
    config: &WorkflowConfig,
) -> Result<StageResult, StageError> {
    let plan = state
        .plan
        .as_ref()
        .ok_or_else(|| StageError::precondition(Stage::Synthesize, "no research plan"))?;
    if state.sources.is_empty() {
        return Ok(StageResult::failed(state, "no validated sources to synthesize from"));
    }

    let prompt = ResearchPrompts::synthesize(&state.query, plan, &state.sources);
    let text = match collaborators.llm.complete(&prompt, &config.completion).await {
        Ok(text) => text,
        Err(e) => return recover(Stage::Synthesize, state, e),
    };

    let Some(output) = parse_synthesis(&text) else {
        return Ok(StageResult::failed(
            state,
            "language model returned an empty or degenerate draft",
        ));
    };

    info!(confidence = output.confidence, findings = output.key_findings.len(), "Draft ready");
    state.draft = output.summary;
    state.draft_confidence = Some(output.confidence);
    state.key_findings = output.key_findings;
    Ok(StageResult::ok(state))
}

/// Gate the draft. Uncertain counts as a failure.
pub async fn safety_check(
    mut state: SessionState,
    collaborators: &Collaborators,
) -> Result<StageResult, StageError> {
    if state.draft.trim().is_empty() {
        return Ok(StageResult::failed(state, "draft is empty"));
    }

    let classified = collaborators
        .safety
        .classify(&SafetySubject::Draft(&state.draft))
        .await;
    let assessment = match classified {
        Ok(assessment) => assessment,
        Err(e) => return recover(Stage::SafetyCheck, state, e),
    };

    let verdict = assessment.verdict;
    let reason = assessment.reason.clone();
    state.record_safety(record(Stage::SafetyCheck, "draft".to_string(), assessment));

    match verdict {
        Verdict::Safe => Ok(StageResult::ok(state)),
        Verdict::Unsafe => Ok(StageResult::failed(state, format!("draft flagged unsafe: {}", reason))),
        Verdict::Uncertain => Ok(StageResult::failed(
            state,
            format!("draft safety uncertain: {}", reason),
        )),
    }
}

/// Critique the latest failure and annotate the plan for the next attempt.
/// Any language-model error here is fatal.
pub async fn reflexion(
    mut state: SessionState,
    collaborators: &Collaborators,
    config: &WorkflowConfig,
) -> Result<StageResult, StageError> {
    let (failed_stage, reason) = state
        .latest_failure()
        .map(|(stage, reason)| (stage, reason.to_string()))
        .unwrap_or((Stage::Plan, String::new()));

    let prompt = ResearchPrompts::reflect(
        &state.query,
        state.plan.as_ref(),
        failed_stage,
        &reason,
        &state.history_summary(),
    );
    let text = collaborators
        .llm
        .complete(&prompt, &config.completion)
        .await
        .map_err(|e| StageError::collaborator(Stage::Reflexion, e))?;

    let mut critique = parse_reflexion(&text).unwrap_or_else(|| ReflexionCritique {
        critique: format!("{} failed: {}", failed_stage, reason),
        issues: vec![reason.clone()],
        suggestions: Vec::new(),
        should_retry: true,
        avoid: Vec::new(),
    });

    if let Some(previous) = state.critique.take() {
        critique.avoid = previous.avoid;
    }
    let lesson = format!(
        "attempt {}: {} failed ({})",
        state.retry_count, failed_stage, reason
    );
    match state.plan.as_mut() {
        Some(plan) => plan.avoid.push(lesson),
        // carried by the critique until the next plan exists
        None => critique.avoid.push(lesson),
    }
    info!(failed_stage = %failed_stage, should_retry = critique.should_retry, "Reflexion complete");
    state.critique = Some(critique);
    Ok(StageResult::ok(state))
}

fn record(stage: Stage, subject: String, assessment: Assessment) -> SafetyRecord {
    SafetyRecord {
        stage,
        subject,
        verdict: assessment.verdict,
        confidence: assessment.confidence,
        reason: assessment.reason,
        flagged: assessment.flagged,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use crate::state::ResearchPlan;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Pops one reply per call and keeps every prompt it was sent
    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, CollaboratorError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, CollaboratorError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedLlm {
        async fn complete(
            &self,
            prompt: &str,
            _settings: &crate::llm::CompletionSettings,
        ) -> Result<String, CollaboratorError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(CollaboratorError::unavailable("script exhausted"));
            }
            replies.remove(0)
        }
    }

    struct FixedSearch(Result<Vec<SearchHit>, CollaboratorError>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
            self.0.clone()
        }
    }

    /// Unsafe when the URL contains "bad", uncertain when it contains "meh".
    /// Drafts mentioning "forbidden" are unsafe, "unclear" uncertain.
    struct UrlPolicy;

    #[async_trait]
    impl SafetyPolicy for UrlPolicy {
        async fn classify(
            &self,
            subject: &SafetySubject<'_>,
        ) -> Result<Assessment, CollaboratorError> {
            Ok(match subject {
                SafetySubject::Source { url, .. } if url.contains("bad") => {
                    Assessment::unsafe_(0.9, "bad url")
                }
                SafetySubject::Source { url, .. } if url.contains("meh") => {
                    Assessment::uncertain(0.5, "meh url")
                }
                SafetySubject::Draft(text) if text.contains("forbidden") => {
                    Assessment::unsafe_(0.9, "forbidden word")
                }
                SafetySubject::Draft(text) if text.contains("unclear") => {
                    Assessment::uncertain(0.5, "could not decide")
                }
                _ => Assessment::safe(0.9, "fine"),
            })
        }
    }

    fn collaborators(
        llm: Arc<dyn CompletionProvider>,
        search: Result<Vec<SearchHit>, CollaboratorError>,
    ) -> Collaborators {
        Collaborators::new(llm, Arc::new(FixedSearch(search)), Arc::new(UrlPolicy))
    }

    fn planned_state() -> SessionState {
        let mut state = SessionState::new("t", "solar adoption", 3);
        state.plan = Some(ResearchPlan::new("survey").with_queries(["solar adoption"]));
        state
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit::new(url, "title").with_excerpt("excerpt")
    }

    #[tokio::test]
    async fn test_plan_parses_response() {
        let llm = ScriptedLlm::new(vec![Ok(
            "Research Plan: look at adoption\nSearch Queries:\n- solar 2023".into()
        )]);
        let ctx = collaborators(llm, Ok(vec![]));
        let result = plan(SessionState::new("t", "solar", 3), &ctx, &WorkflowConfig::default())
            .await
            .unwrap();

        assert!(result.outcome.is_ok());
        let plan = result.state.plan.unwrap();
        assert_eq!(plan.search_queries, vec!["solar 2023"]);
    }

    #[tokio::test]
    async fn test_plan_empty_response_fails() {
        let ctx = collaborators(ScriptedLlm::new(vec![Ok("   ".into())]), Ok(vec![]));
        let result = plan(SessionState::new("t", "solar", 3), &ctx, &WorkflowConfig::default())
            .await
            .unwrap();
        assert!(!result.outcome.is_ok());
        assert!(result.state.plan.is_none());
    }

    #[tokio::test]
    async fn test_plan_transient_error_fails_stage() {
        let ctx = collaborators(
            ScriptedLlm::new(vec![Err(CollaboratorError::rate_limited("429"))]),
            Ok(vec![]),
        );
        let result = plan(SessionState::new("t", "solar", 3), &ctx, &WorkflowConfig::default())
            .await
            .unwrap();
        assert!(!result.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_plan_malformed_error_is_fatal() {
        let ctx = collaborators(
            ScriptedLlm::new(vec![Err(CollaboratorError::malformed("garbage"))]),
            Ok(vec![]),
        );
        let err = plan(SessionState::new("t", "solar", 3), &ctx, &WorkflowConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Plan);
    }

    #[tokio::test]
    async fn test_search_dedupes_and_caps() {
        let hits = vec![hit("https://a.org"), hit("https://a.org"), hit("https://b.org")];
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(hits));
        let config = WorkflowConfig::default().with_max_search_results(10);

        let result = search(planned_state(), &ctx, &config).await.unwrap();
        assert!(result.outcome.is_ok());
        assert_eq!(result.state.sources.len(), 2);
        assert_eq!(result.state.sources[0].provenance, "solar adoption");

        let capped = search(planned_state(), &ctx, &config.with_max_search_results(1))
            .await
            .unwrap();
        assert_eq!(capped.state.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_search_zero_results_fails() {
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(vec![]));
        let result = search(planned_state(), &ctx, &WorkflowConfig::default())
            .await
            .unwrap();
        assert_eq!(result.outcome.reason.as_deref(), Some("search returned zero sources"));
    }

    #[tokio::test]
    async fn test_search_requires_plan() {
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(vec![]));
        let err = search(SessionState::new("t", "q", 3), &ctx, &WorkflowConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Precondition { .. }));
    }

    #[tokio::test]
    async fn test_validate_removes_unsafe_and_preserves_order() {
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(vec![]));
        let mut state = planned_state();
        state.sources = ["https://a.org", "https://bad.org/1", "https://meh.org", "https://c.org"]
            .iter()
            .map(|u| hit(u).into_source("q"))
            .collect();

        let result = validate(state, &ctx).await.unwrap();
        assert!(result.outcome.is_ok());

        let urls: Vec<&str> = result.state.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.org", "https://meh.org", "https://c.org"]);

        // one removal record plus the aggregate
        assert_eq!(result.state.safety_checks.len(), 2);
        assert_eq!(result.state.safety_checks[0].subject, "https://bad.org/1");
        assert_eq!(result.state.safety_checks[1].subject, "aggregate");
    }

    #[tokio::test]
    async fn test_validate_only_uncertain_fails() {
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(vec![]));
        let mut state = planned_state();
        state.sources = vec![hit("https://meh.org").into_source("q")];

        let result = validate(state, &ctx).await.unwrap();
        assert!(!result.outcome.is_ok());
        assert_eq!(result.state.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_synthesize_sets_draft() {
        let llm = ScriptedLlm::new(vec![Ok(
            "Solar adoption grew rapidly across Europe. [1]\nConfidence: 0.8".into(),
        )]);
        let ctx = collaborators(llm, Ok(vec![]));
        let mut state = planned_state();
        state.sources = vec![hit("https://a.org").into_source("q")];

        let result = synthesize(state, &ctx, &WorkflowConfig::default()).await.unwrap();
        assert!(result.outcome.is_ok());
        assert!(result.state.draft.contains("Solar adoption"));
        assert_eq!(result.state.draft_confidence, Some(0.8));
    }

    #[tokio::test]
    async fn test_synthesize_degenerate_draft_fails() {
        let ctx = collaborators(ScriptedLlm::new(vec![Ok("ok".into())]), Ok(vec![]));
        let mut state = planned_state();
        state.sources = vec![hit("https://a.org").into_source("q")];

        let result = synthesize(state, &ctx, &WorkflowConfig::default()).await.unwrap();
        assert!(!result.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_safety_check_records_verdict() {
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(vec![]));
        let mut state = planned_state();
        state.draft = "A forbidden draft".into();

        let result = safety_check(state, &ctx).await.unwrap();
        assert!(!result.outcome.is_ok());
        assert_eq!(result.state.safety_checks.len(), 1);
        assert_eq!(result.state.safety_checks[0].verdict, Verdict::Unsafe);
    }

    #[tokio::test]
    async fn test_safety_check_uncertain_draft_fails() {
        let ctx = collaborators(ScriptedLlm::new(vec![]), Ok(vec![]));
        let mut state = planned_state();
        state.draft = "An unclear draft about solar adoption".into();

        let result = safety_check(state, &ctx).await.unwrap();
        assert!(!result.outcome.is_ok());
        assert!(result.outcome.reason.unwrap().contains("uncertain"));
        assert_eq!(result.state.safety_checks.len(), 1);
        assert_eq!(result.state.safety_checks[0].subject, "draft");
        assert_eq!(result.state.safety_checks[0].verdict, Verdict::Uncertain);
    }

    #[tokio::test]
    async fn test_critique_reaches_replan_after_failed_plan() {
        let llm = ScriptedLlm::new(vec![
            Ok("   ".into()),
            Ok("The planner gave nothing back. Use broader queries.".into()),
            Ok("Research Plan: broad survey\nSearch Queries:\n- solar adoption worldwide".into()),
        ]);
        let ctx = collaborators(llm.clone(), Ok(vec![]));
        let config = WorkflowConfig::default();

        let failed = plan(SessionState::new("t", "solar", 3), &ctx, &config)
            .await
            .unwrap();
        assert!(!failed.outcome.is_ok());
        let mut state = failed.state;
        state.record(Stage::Plan, &failed.outcome);
        state.retry_count = 1;

        let reflected = reflexion(state, &ctx, &config).await.unwrap();
        let critique = reflected.state.critique.clone().unwrap();
        assert_eq!(critique.avoid.len(), 1);
        assert!(critique.avoid[0].contains("plan failed"));

        let replanned = plan(reflected.state, &ctx, &config).await.unwrap();
        assert!(replanned.outcome.is_ok());
        assert!(replanned.state.critique.is_none());
        let new_plan = replanned.state.plan.unwrap();
        assert_eq!(new_plan.search_queries, vec!["solar adoption worldwide"]);
        assert_eq!(new_plan.avoid, critique.avoid);

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[2].contains("Use broader queries"));
        assert!(prompts[2].contains("(no plan was produced)"));
    }

    #[tokio::test]
    async fn test_reflexion_annotates_plan() {
        let llm = ScriptedLlm::new(vec![Ok("Queries were too narrow; retry broader.".into())]);
        let ctx = collaborators(llm, Ok(vec![]));
        let mut state = planned_state();
        state.record(Stage::Search, &StageOutcome::failed("search returned zero sources"));
        state.retry_count = 1;

        let result = reflexion(state, &ctx, &WorkflowConfig::default()).await.unwrap();
        assert!(result.outcome.is_ok());
        let critique = result.state.critique.unwrap();
        assert!(critique.should_retry);
        let plan = result.state.plan.unwrap();
        assert_eq!(plan.avoid.len(), 1);
        assert!(plan.avoid[0].contains("search failed"));
    }

    #[tokio::test]
    async fn test_reflexion_llm_error_is_fatal() {
        let ctx = collaborators(
            ScriptedLlm::new(vec![Err(CollaboratorError::unavailable("down"))]),
            Ok(vec![]),
        );
        let err = reflexion(planned_state(), &ctx, &WorkflowConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Reflexion);
    }
}
