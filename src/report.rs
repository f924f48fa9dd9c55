//! # Markdown Reports
//!
//! Renders a finished session (query, plan, answer, sources and the safety
//! audit) as markdown and writes it under the reports directory.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use research_workflow::{SessionState, SessionStatus};

/// Write the report and return its path:
/// `<dir>/research_<thread>_<YYYYmmdd_HHMMSS>.md`
pub fn save(state: &SessionState, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory {}", dir.display()))?;

    let file_name = format!(
        "research_{}_{}.md",
        state.thread_id,
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(file_name);
    fs::write(&path, render(state))
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(path)
}

pub fn render(state: &SessionState) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Research Report\n");
    let _ = writeln!(out, "**Query:** {}\n", state.query);
    let _ = writeln!(out, "- Thread: `{}`", state.thread_id);
    let _ = writeln!(out, "- Status: {}", state.status);
    let _ = writeln!(out, "- Retries: {} / {}", state.retry_count, state.max_retries);
    if let Some(confidence) = state.draft_confidence {
        let _ = writeln!(out, "- Confidence: {:.0}%", confidence * 100.0);
    }
    let _ = writeln!(
        out,
        "- Generated: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    if state.status != SessionStatus::Success {
        let _ = writeln!(
            out,
            "> This session did not finish successfully; the answer below may be incomplete.\n"
        );
    }

    if let Some(plan) = &state.plan {
        let _ = writeln!(out, "## Research Plan\n\n{}\n", plan.render());
    }

    let _ = writeln!(out, "## Answer\n");
    if state.draft.is_empty() {
        let _ = writeln!(out, "_No answer was produced._\n");
    } else {
        let _ = writeln!(out, "{}\n", state.draft);
    }

    if !state.key_findings.is_empty() {
        let _ = writeln!(out, "## Key Findings\n");
        for finding in &state.key_findings {
            let _ = writeln!(out, "- {}", finding);
        }
        let _ = writeln!(out);
    }

    if !state.sources.is_empty() {
        let _ = writeln!(out, "## Sources\n");
        for (i, source) in state.sources.iter().enumerate() {
            let _ = writeln!(out, "{}. [{}]({})", i + 1, source.title, source.url);
        }
        let _ = writeln!(out);
    }

    if !state.safety_checks.is_empty() {
        let _ = writeln!(out, "## Safety Audit\n");
        let _ = writeln!(out, "| Stage | Subject | Verdict | Confidence | Reason |");
        let _ = writeln!(out, "|-------|---------|---------|------------|--------|");
        for record in &state.safety_checks {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {:.2} | {} |",
                record.stage,
                record.subject,
                record.verdict,
                record.confidence,
                record.reason.replace('|', "/")
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Workflow History\n");
    for entry in &state.history {
        let detail = entry.detail.as_deref().unwrap_or("");
        let _ = writeln!(
            out,
            "- {} `{}` {:?} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.stage,
            entry.outcome,
            detail
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_workflow::{ResearchPlan, Source, Stage, StageOutcome};
    use tempfile::TempDir;

    fn finished_state() -> SessionState {
        let mut state = SessionState::new("t-42", "how do heat pumps work", 3);
        state.plan = Some(ResearchPlan::new("Explain the refrigeration cycle"));
        state.sources = vec![Source::new("https://en.wikipedia.org/wiki/Heat_pump", "Heat pump")];
        state.draft = "Heat pumps move heat using a refrigerant cycle [1].".to_string();
        state.draft_confidence = Some(0.87);
        state.key_findings = vec!["Efficiency above 300%".to_string()];
        state.record(Stage::SafetyCheck, &StageOutcome::ok());
        state.finish(Stage::SafetyCheck, SessionStatus::Success, None);
        state
    }

    #[test]
    fn test_render_sections() {
        let report = render(&finished_state());

        assert!(report.contains("**Query:** how do heat pumps work"));
        assert!(report.contains("- Confidence: 87%"));
        assert!(report.contains("## Research Plan"));
        assert!(report.contains("1. [Heat pump](https://en.wikipedia.org/wiki/Heat_pump)"));
        assert!(report.contains("- Efficiency above 300%"));
        assert!(!report.contains("did not finish successfully"));
    }

    #[test]
    fn test_render_failed_session() {
        let mut state = SessionState::new("t-1", "q", 3);
        state.finish(Stage::Search, SessionStatus::FailedMaxRetries, None);
        let report = render(&state);

        assert!(report.contains("did not finish successfully"));
        assert!(report.contains("_No answer was produced._"));
    }

    #[test]
    fn test_save_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = save(&finished_state(), &dir.path().join("reports")).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("research_t-42_"));
        assert!(name.ends_with(".md"));
        assert!(fs::read_to_string(&path).unwrap().contains("# Research Report"));
    }
}
