//! Prompt templates for the research stages
//!
//! Each template asks for a fenced JSON object and documents a labelled-text
//! fallback, matching what [`crate::parser`] accepts.

use chrono::Utc;

use crate::safety::SafetySubject;
use crate::state::{ResearchPlan, ReflexionCritique, Source, Stage};

/// Excerpts longer than this are cut before being sent to the model
const MAX_EXCERPT_CHARS: usize = 600;

/// Prompt templates for the research workflow
pub struct ResearchPrompts;

impl ResearchPrompts {
    fn current_date() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Agent preamble shared by every stage prompt
    pub fn system() -> &'static str {
        "You are a careful research assistant. You plan searches, read the sources \
you are given and write answers that cite them by number. You never invent \
sources or facts. When asked for JSON you reply with a single fenced JSON object."
    }

    /// First planning pass for a fresh query
    pub fn plan(query: &str) -> String {
        format!(
            r#"# Research Planner

For context, today's date is {date}.

Create a focused research plan for the question below.

## Question
{query}

## Instructions
- Break the question into 2-4 concrete web search queries
- Name the kinds of sources that would answer it well
- State what a complete answer must contain

Respond with a JSON object in a ```json fence:

```json
{{
  "research_plan": "one paragraph describing the approach",
  "search_queries": ["query 1", "query 2"],
  "expected_sources": ["academic papers", "official documentation"],
  "success_criteria": "what a complete answer covers"
}}
```
"#,
            date = Self::current_date(),
            query = query,
        )
    }

    /// Planning pass after Reflexion, carrying the critique forward
    pub fn replan(
        query: &str,
        previous: Option<&ResearchPlan>,
        critique: &ReflexionCritique,
    ) -> String {
        let previous = previous
            .map(ResearchPlan::render)
            .unwrap_or_else(|| "(no plan was produced)".to_string());
        let mut issues = critique.issues.clone();
        issues.extend(critique.avoid.iter().cloned());
        let issues = bullet_list(&issues);
        let suggestions = bullet_list(&critique.suggestions);
        format!(
            r#"# Research Planner (revision)

For context, today's date is {date}.

A previous attempt at this research failed. Write a revised plan that
addresses the critique. Prefer different or broader search queries than
last time.

## Question
{query}

## Previous plan
{previous}

## Critique
{critique}

### Issues
{issues}

### Suggestions
{suggestions}

Respond with the same JSON shape as before:

```json
{{
  "research_plan": "...",
  "search_queries": ["..."],
  "expected_sources": ["..."],
  "success_criteria": "..."
}}
```
"#,
            date = Self::current_date(),
            query = query,
            previous = previous,
            critique = critique.critique,
            issues = issues,
            suggestions = suggestions,
        )
    }

    /// Draft an answer from validated sources
    pub fn synthesize(query: &str, plan: &ResearchPlan, sources: &[Source]) -> String {
        let listing = sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "[{}] {}\nURL: {}\n{}",
                    i + 1,
                    s.title,
                    s.url,
                    clip(&s.excerpt, MAX_EXCERPT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            r#"# Research Synthesizer

Answer the question using ONLY the numbered sources. Cite sources inline
as [n]. Do not invent facts that the sources do not support.

## Question
{query}

## Plan
{plan}

## Sources
{listing}

Respond with a JSON object in a ```json fence:

```json
{{
  "research_summary": "the full answer with [n] citations",
  "key_findings": ["finding 1", "finding 2"],
  "confidence_level": 0.0
}}
```

confidence_level is your confidence in the answer, between 0 and 1.
"#,
            query = query,
            plan = plan.render(),
            listing = listing,
        )
    }

    /// Critique a failed attempt
    pub fn reflect(
        query: &str,
        plan: Option<&ResearchPlan>,
        failed_stage: Stage,
        reason: &str,
        history: &str,
    ) -> String {
        let plan = plan
            .map(ResearchPlan::render)
            .unwrap_or_else(|| "(no plan was produced)".to_string());
        format!(
            r#"# Research Critic

A research attempt failed at the `{stage}` stage.

## Question
{query}

## Plan used
{plan}

## Failure
{reason}

## Trail so far
{history}

Explain what went wrong and how the next attempt should differ. Be
specific: name queries to drop, broaden or add, and source types to
prefer or avoid.

Respond with a JSON object in a ```json fence:

```json
{{
  "critique": "what went wrong",
  "identified_issues": ["issue"],
  "suggestions": ["change for next attempt"],
  "should_retry": true
}}
```
"#,
            stage = failed_stage,
            query = query,
            plan = plan,
            reason = if reason.is_empty() { "(no reason recorded)" } else { reason },
            history = history,
        )
    }

    /// Ask a model for a safety verdict
    pub fn safety_review(subject: &SafetySubject<'_>) -> String {
        let body = match subject {
            SafetySubject::Source { url, content } => {
                format!("A web source.\nURL: {}\nExcerpt:\n{}", url, clip(content, MAX_EXCERPT_CHARS))
            }
            SafetySubject::Draft(text) => format!("A research answer draft:\n{}", text),
        };
        format!(
            r#"# Safety Reviewer

Decide whether the following material is safe to include in a research
answer for a general audience. Unsafe material includes violence, hate,
harassment, self-harm, extremism, malware and deceptive or scam content.

## Material
{body}

Respond with a JSON object only:

{{"verdict": "safe" | "unsafe" | "uncertain", "confidence": 0.0, "reason": "short explanation"}}
"#,
            body = body,
        )
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
