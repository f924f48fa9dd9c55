//! # Research Agent
//!
//! Command-line front end for the `research-workflow` state machine: plan,
//! search, validate, synthesize, safety-check, and reflect-and-retry when a
//! stage fails. Every transition is checkpointed to disk, so an interrupted
//! session can be resumed with `--resume`.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- "What are the benefits of renewable energy?"
//! cargo run -- --thread-id my-run --resume
//! cargo run -- --thread-id my-run --history
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

/// Language model, search and safety wiring
mod providers;

/// Markdown reports
mod report;

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use research_workflow::{
    create_store, CheckpointStore, CheckpointerConfig, Cursor, SessionState, SessionStatus,
    WorkflowEngine,
};

use crate::config::{AppConfig, Provider};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "research-agent",
    version,
    about = "A self-correcting research agent with checkpointed, resumable sessions",
    long_about = r#"
Research Agent - plan, search, validate, synthesize, safety-check.

When a stage fails the agent reflects on what went wrong and retries with a
revised plan (up to MAX_RETRIES times). Progress is checkpointed after every
step, so interrupted sessions can be resumed.

ENVIRONMENT:
  LLM_PROVIDER         gemini (default) or ollama
  GEMINI_API_KEY       required for gemini
  OLLAMA_API_BASE_URL  default http://localhost:11434
  TAVILY_API_KEY       required for web search
  MAX_RETRIES          reflexion budget (default 3)
  LLM_MAX_RETRIES      retries of a failed model call before a stage fails (default 3)

EXAMPLES:
  # New research session
  research-agent "What are the latest developments in solid-state batteries?"

  # Named session, resumed later
  research-agent --thread-id batteries "solid-state batteries"
  research-agent --thread-id batteries --resume

  # Audit trail of a session
  research-agent --thread-id batteries --history

  # Local model
  research-agent --provider ollama --model llama3.2 "Rust async runtimes"
"#
)]
struct Args {
    /// The research topic or question to investigate
    #[arg(
        value_name = "QUERY",
        required_unless_present_any = ["resume", "history", "show_config"]
    )]
    query: Option<String>,

    /// Session identifier (generated when omitted)
    #[arg(short = 't', long = "thread-id")]
    thread_id: Option<String>,

    /// Resume the session given by --thread-id
    #[arg(short = 'r', long = "resume", requires = "thread_id")]
    resume: bool,

    /// Print the checkpoint history of --thread-id and exit
    #[arg(long = "history", requires = "thread_id")]
    history: bool,

    /// Print the configuration (without secrets) and exit
    #[arg(long = "config")]
    show_config: bool,

    /// Write a report even if the session did not succeed
    #[arg(short = 's', long = "save-report")]
    save_report: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Language model backend (overrides LLM_PROVIDER)
    #[arg(short = 'p', long = "provider", value_enum)]
    provider: Option<Provider>,

    /// Model name for the selected provider
    #[arg(short = 'm', long = "model")]
    model: Option<String>,
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    let mut config = AppConfig::from_env()?;
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(model) = &args.model {
        info!(model = %model, "Using model from command line");
        config.set_model(model.clone());
    }

    if args.show_config {
        println!("{}", config.safe_summary());
        return Ok(ExitCode::SUCCESS);
    }

    let store = create_store(CheckpointerConfig::File {
        path: config.checkpoint_dir.clone(),
        compression: config.checkpoint_compression,
    })
    .await
    .context("Failed to open checkpoint store")?;

    if args.history {
        // requires = "thread_id" guarantees this is set
        let thread_id = args.thread_id.as_deref().unwrap_or_default();
        print_history(store.as_ref(), thread_id).await?;
        return Ok(ExitCode::SUCCESS);
    }

    config.validate()?;
    info!(
        provider = ?config.provider,
        model = %config.model(),
        max_retries = config.workflow.max_retries,
        "Configuration loaded"
    );

    let collaborators = providers::build_collaborators(&config)?;
    let engine = WorkflowEngine::new(collaborators, store, config.workflow.clone())?;

    let state = match (&args.thread_id, args.resume) {
        (Some(thread_id), true) => engine.resume(thread_id).await?,
        _ => {
            let query = args
                .query
                .as_deref()
                .context("A research query is required")?;
            engine.run(query, args.thread_id.clone()).await?
        }
    };

    print_result(&state);

    if state.status == SessionStatus::Success || args.save_report {
        match report::save(&state, &config.reports_dir) {
            Ok(path) => println!("\nReport saved to {}", path.display()),
            Err(e) => warn!(error = %e, "Failed to save report"),
        }
    }

    match state.status {
        SessionStatus::FailedFatal => {
            error!(thread_id = %state.thread_id, "Research aborted");
            Ok(ExitCode::FAILURE)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

// =============================================================================
// OUTPUT
// =============================================================================
fn print_result(state: &SessionState) {
    println!("\n{}", "=".repeat(60));
    println!("RESEARCH RESULTS");
    println!("{}\n", "=".repeat(60));
    println!("Thread:  {}", state.thread_id);
    println!("Query:   {}", state.query);
    println!("Status:  {}", state.status);
    println!("Retries: {}/{}", state.retry_count, state.max_retries);
    if let Some(confidence) = state.draft_confidence {
        println!("Confidence: {:.0}%", confidence * 100.0);
    }

    match state.status {
        SessionStatus::Success => {
            println!("\n{}", state.draft);
            if !state.sources.is_empty() {
                println!("\nSources:");
                for (i, source) in state.sources.iter().enumerate() {
                    println!("  [{}] {} - {}", i + 1, source.title, source.url);
                }
            }
        }
        _ => {
            if let Some((stage, reason)) = state.latest_failure() {
                println!("\nLast failure: {} ({})", stage, reason);
            }
            if let Some(entry) = state.history.last() {
                if let Some(detail) = &entry.detail {
                    println!("Final step:   {} ({})", entry.stage, detail);
                }
            }
            println!("\nResume with: research-agent --thread-id {} --resume", state.thread_id);
        }
    }
    println!("\n{}", "=".repeat(60));
}

async fn print_history(store: &dyn CheckpointStore, thread_id: &str) -> Result<()> {
    let history = store
        .history(thread_id)
        .await
        .with_context(|| format!("Failed to read history of {}", thread_id))?;
    if history.is_empty() {
        anyhow::bail!("Thread not found: {}", thread_id);
    }

    println!("History of {} ({} checkpoints)\n", thread_id, history.len());
    for checkpoint in &history {
        let next = match checkpoint.next {
            Cursor::Pending(stage) => stage.to_string(),
            Cursor::Finished(status) => format!("[{}]", status),
        };
        println!(
            "{:>4}  {}  {:<12} {:?} -> {:<14} retries={}  {}",
            checkpoint.step,
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.stage.name(),
            checkpoint.outcome.kind,
            next,
            checkpoint.state.retry_count,
            checkpoint.outcome.reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Install the global tracing subscriber. `RUST_LOG` wins unless
/// `--verbose` is given.
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["test", "What is Rust?"]);
        assert_eq!(args.query.as_deref(), Some("What is Rust?"));
        assert!(!args.resume);
        assert!(!args.verbose);
        assert!(args.provider.is_none());
    }

    #[test]
    fn test_args_with_flags() {
        let args = Args::parse_from([
            "test",
            "--verbose",
            "--provider",
            "ollama",
            "--model",
            "llama3.2",
            "--thread-id",
            "t-1",
            "--save-report",
            "Test query",
        ]);

        assert_eq!(args.query.as_deref(), Some("Test query"));
        assert!(args.verbose);
        assert!(args.save_report);
        assert_eq!(args.provider, Some(Provider::Ollama));
        assert_eq!(args.model.as_deref(), Some("llama3.2"));
        assert_eq!(args.thread_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_resume_without_query() {
        let args = Args::parse_from(["test", "--thread-id", "t-1", "--resume"]);
        assert!(args.resume);
        assert!(args.query.is_none());
    }

    #[test]
    fn test_query_required_for_new_session() {
        assert!(Args::try_parse_from(["test"]).is_err());
        assert!(Args::try_parse_from(["test", "--resume"]).is_err());
        assert!(Args::try_parse_from(["test", "--config"]).is_ok());
    }
}
