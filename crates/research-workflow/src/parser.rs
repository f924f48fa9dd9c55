//! Structured output parsing for language-model responses
//!
//! Every parser first looks for a JSON object (inside a ```json fence or
//! bare), then falls back to a labelled-text reading. Plans, drafts and
//! critiques degrade to `None` only when the text carries nothing usable;
//! safety verdicts must parse or the response is malformed.

use serde::Deserialize;
use serde_json::Value;

use crate::error::CollaboratorError;
use crate::safety::Assessment;
use crate::state::{ResearchPlan, ReflexionCritique, Verdict};

/// Drafts shorter than this (non-whitespace chars) are degenerate
const MIN_DRAFT_CHARS: usize = 20;

/// Confidence used when a draft states none
pub const DEFAULT_CONFIDENCE: f32 = 0.7;

const RETRY_KEYWORDS: &[&str] = &["retry", "again", "broader", "revise"];

/// Parsed Synthesize output
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub summary: String,
    pub key_findings: Vec<String>,
    /// Always within (0, 1]
    pub confidence: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanPayload {
    #[serde(alias = "summary", alias = "plan")]
    research_plan: String,
    #[serde(alias = "queries")]
    search_queries: Vec<String>,
    expected_sources: Vec<String>,
    success_criteria: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SynthesisPayload {
    #[serde(alias = "summary")]
    research_summary: String,
    key_findings: Vec<String>,
    #[serde(alias = "confidence")]
    confidence_level: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReflexionPayload {
    critique: String,
    #[serde(alias = "issues")]
    identified_issues: Vec<String>,
    #[serde(alias = "improvement_suggestions")]
    suggestions: Vec<String>,
    should_retry: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    verdict: Verdict,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    flagged: Vec<String>,
}

/// Parse a planning response. `query` stands in for the search queries
/// when the response lists none.
pub fn parse_plan(text: &str, query: &str) -> Option<ResearchPlan> {
    if text.trim().is_empty() {
        return None;
    }

    let (summary, mut queries, expected_sources, success_criteria) =
        match extract_json::<PlanPayload>(text) {
            Some(payload) => (
                payload.research_plan.trim().to_string(),
                payload.search_queries,
                payload.expected_sources,
                payload.success_criteria,
            ),
            None => parse_plan_text(text),
        };

    queries.retain(|q| !q.trim().is_empty());
    if summary.is_empty() && queries.is_empty() {
        return None;
    }
    if queries.is_empty() {
        queries.push(query.to_string());
    }
    let summary = if summary.is_empty() {
        format!("Research: {}", query)
    } else {
        summary
    };

    Some(ResearchPlan {
        summary,
        search_queries: queries,
        expected_sources,
        success_criteria,
        avoid: Vec::new(),
    })
}

fn parse_plan_text(text: &str) -> (String, Vec<String>, Vec<String>, String) {
    #[derive(PartialEq)]
    enum Section {
        Free,
        Queries,
        Sources,
        Criteria,
    }

    let mut summary = String::new();
    let mut free_lines = Vec::new();
    let mut queries = Vec::new();
    let mut sources = Vec::new();
    let mut criteria = String::new();
    let mut section = Section::Free;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(rest) = strip_label(line, &["research plan", "plan", "summary"]) {
            summary = rest.to_string();
            section = Section::Free;
        } else if let Some(rest) = strip_label(line, &["search queries", "queries"]) {
            section = Section::Queries;
            if !rest.is_empty() {
                queries.push(unquote(rest));
            }
        } else if let Some(rest) = strip_label(line, &["expected sources", "sources"]) {
            section = Section::Sources;
            if !rest.is_empty() {
                sources.push(rest.to_string());
            }
        } else if let Some(rest) = strip_label(line, &["success criteria"]) {
            criteria = rest.to_string();
            section = Section::Criteria;
        } else if let Some(item) = bullet(line) {
            match section {
                Section::Queries => queries.push(unquote(item)),
                Section::Sources => sources.push(item.to_string()),
                Section::Criteria => {
                    if !criteria.is_empty() {
                        criteria.push_str("; ");
                    }
                    criteria.push_str(item);
                }
                Section::Free => free_lines.push(item),
            }
        } else if section == Section::Free {
            free_lines.push(line);
        }
    }

    if summary.is_empty() {
        summary = free_lines.join(" ");
    }
    (summary, queries, sources, criteria)
}

/// Parse a synthesis response. `None` means the draft is empty or too
/// short to be useful.
pub fn parse_synthesis(text: &str) -> Option<SynthesisOutput> {
    let content_chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if content_chars < MIN_DRAFT_CHARS {
        return None;
    }

    if let Some(payload) = extract_json::<SynthesisPayload>(text) {
        let summary = payload.research_summary.trim().to_string();
        if summary.chars().filter(|c| !c.is_whitespace()).count() >= MIN_DRAFT_CHARS {
            return Some(SynthesisOutput {
                summary,
                key_findings: payload.key_findings,
                confidence: normalize_confidence(payload.confidence_level),
            });
        }
    }

    let mut confidence = None;
    let mut findings = Vec::new();
    let mut body = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_label(trimmed, &["confidence level", "confidence"]) {
            if confidence.is_none() {
                confidence = parse_score(rest);
            }
            continue;
        }
        if let Some(item) = bullet(trimmed) {
            findings.push(item.to_string());
        }
        body.push(line);
    }

    let summary = body.join("\n").trim().to_string();
    if summary.chars().filter(|c| !c.is_whitespace()).count() < MIN_DRAFT_CHARS {
        return None;
    }

    Some(SynthesisOutput {
        summary,
        key_findings: findings,
        confidence: normalize_confidence(confidence),
    })
}

/// Parse a reflexion response. `None` only for an empty response.
pub fn parse_reflexion(text: &str) -> Option<ReflexionCritique> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(payload) = extract_json::<ReflexionPayload>(text) {
        if !payload.critique.trim().is_empty() {
            let should_retry = payload
                .should_retry
                .unwrap_or_else(|| mentions_retry(&payload.critique));
            return Some(ReflexionCritique {
                critique: payload.critique.trim().to_string(),
                issues: payload.identified_issues,
                suggestions: payload.suggestions,
                should_retry,
                avoid: Vec::new(),
            });
        }
    }

    #[derive(PartialEq)]
    enum Section {
        Issues,
        Suggestions,
    }

    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    let mut section = Section::Suggestions;
    for line in trimmed.lines().map(str::trim) {
        if let Some(rest) = strip_label(line, &["issues", "problems", "identified issues"]) {
            section = Section::Issues;
            if !rest.is_empty() {
                issues.push(rest.to_string());
            }
        } else if let Some(rest) = strip_label(line, &["suggestions", "improvements"]) {
            section = Section::Suggestions;
            if !rest.is_empty() {
                suggestions.push(rest.to_string());
            }
        } else if let Some(item) = bullet(line) {
            match section {
                Section::Issues => issues.push(item.to_string()),
                Section::Suggestions => suggestions.push(item.to_string()),
            }
        }
    }

    Some(ReflexionCritique {
        critique: trimmed.to_string(),
        issues,
        suggestions,
        should_retry: mentions_retry(trimmed),
        avoid: Vec::new(),
    })
}

/// Parse a safety reviewer response into an assessment.
pub fn parse_verdict(text: &str) -> Result<Assessment, CollaboratorError> {
    if let Some(payload) = extract_json::<VerdictPayload>(text) {
        let confidence = payload.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
        let reason = if payload.reason.trim().is_empty() {
            "language model review".to_string()
        } else {
            payload.reason.trim().to_string()
        };
        return Ok(Assessment::new(payload.verdict, confidence, reason).with_flagged(payload.flagged));
    }

    for line in text.lines().map(str::trim) {
        if let Some(rest) = strip_label(line, &["verdict"]) {
            let word = rest
                .split(|c: char| !c.is_ascii_alphabetic())
                .find(|w| !w.is_empty())
                .unwrap_or("")
                .to_ascii_lowercase();
            let verdict = match word.as_str() {
                "safe" => Verdict::Safe,
                "unsafe" => Verdict::Unsafe,
                "uncertain" => Verdict::Uncertain,
                _ => continue,
            };
            return Ok(Assessment::new(verdict, 0.5, "language model review"));
        }
    }

    Err(CollaboratorError::malformed(format!(
        "unparseable safety verdict: {}",
        truncate(text.trim(), 120)
    )))
}

fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let fenced = text.find("```json").and_then(|start| {
        let after = &text[start + "```json".len()..];
        after.find("```").map(|end| &after[..end])
    });

    let candidate = match fenced {
        Some(block) => block.trim(),
        None => {
            let start = text.find('{')?;
            let end = text.rfind('}')?;
            if end <= start {
                return None;
            }
            &text[start..=end]
        }
    };

    let value: Value = serde_json::from_str(candidate).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Match `label:` at the start of a line, ignoring case and markdown
/// decoration. Returns the text after the colon.
fn strip_label<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    let cleaned = line
        .trim_start_matches(|c: char| c == '#' || c == '*' || c == '_')
        .trim_start();
    for label in labels {
        let Some(head) = cleaned.get(..label.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(label) {
            continue;
        }
        let rest = cleaned[label.len()..].trim_start_matches(['*', '_']);
        if let Some(after) = rest.strip_prefix(':') {
            return Some(after.trim_matches(|c: char| c == '*' || c == '_').trim());
        }
    }
    None
}

fn bullet(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            let rest = rest.trim();
            return (!rest.is_empty()).then_some(rest);
        }
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(item) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            let item = item.trim();
            return (!item.is_empty()).then_some(item);
        }
    }
    None
}

fn unquote(text: &str) -> String {
    text.trim().trim_matches('"').trim().to_string()
}

fn mentions_retry(text: &str) -> bool {
    let lower = text.to_lowercase();
    RETRY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Read "0.85", "85%" or "85" as a unit score.
fn parse_score(text: &str) -> Option<f32> {
    let number: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f32 = number.parse().ok()?;
    let value = if value > 1.0 { value / 100.0 } else { value };
    (value > 0.0 && value <= 1.0).then_some(value)
}

fn normalize_confidence(value: Option<f32>) -> f32 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.min(1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
