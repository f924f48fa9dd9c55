//! Workflow engine
//!
//! Drives one session at a time: execute the pending stage, record its
//! outcome, ask the [`Router`] where to go, checkpoint, repeat. Every
//! transition is persisted before the next stage starts, so a process that
//! dies mid-run loses at most the in-flight stage.
//!
//! Fatal conditions (collaborator contract violations, store failures,
//! unmodeled transitions, the transition limit) end the session in
//! `FailedFatal` after one best-effort checkpoint write. They do not
//! surface as `Err`; callers inspect `SessionState::status`.

use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint::{validate_thread_id, Checkpoint, CheckpointStore};
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::router::{Decision, Router};
use crate::stages::{self, Collaborators, StageResult};
use crate::state::{Cursor, SessionState, SessionStatus, Stage, StageOutcome};

pub struct WorkflowEngine {
    collaborators: Collaborators,
    store: Arc<dyn CheckpointStore>,
    router: Router,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    /// Create an engine. Fails if the configuration is invalid.
    pub fn new(
        collaborators: Collaborators,
        store: Arc<dyn CheckpointStore>,
        config: WorkflowConfig,
    ) -> Result<Self, WorkflowError> {
        config.validate()?;
        Ok(Self {
            collaborators,
            store,
            router: Router::new(config.max_retries),
            config,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run a session to a terminal status.
    ///
    /// Without a thread id a fresh UUID is generated. A known thread resumes
    /// from its latest checkpoint; `query` is then ignored.
    pub async fn run(
        &self,
        query: &str,
        thread_id: Option<String>,
    ) -> Result<SessionState, WorkflowError> {
        let thread_id = thread_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_thread_id(&thread_id)?;

        match self.store.load(&thread_id).await? {
            Some(checkpoint) => {
                if checkpoint.state.query != query {
                    warn!(
                        thread_id = %thread_id,
                        stored = %checkpoint.state.query,
                        "Thread exists with a different query, resuming stored session"
                    );
                }
                info!(thread_id = %thread_id, step = checkpoint.step, "Resuming session");
                self.drive(checkpoint.state, checkpoint.next, checkpoint.step + 1, None)
                    .await
            }
            None => {
                info!(thread_id = %thread_id, query = %query, "Starting new session");
                let state = SessionState::new(thread_id, query, self.config.max_retries);
                self.drive(state, Cursor::Pending(Stage::Plan), 0, None).await
            }
        }
    }

    /// Resume an existing session to a terminal status. A session that
    /// already finished is returned unchanged.
    pub async fn resume(&self, thread_id: &str) -> Result<SessionState, WorkflowError> {
        let checkpoint = self.latest(thread_id).await?;
        info!(thread_id = %thread_id, step = checkpoint.step, "Resuming session");
        self.drive(checkpoint.state, checkpoint.next, checkpoint.step + 1, None)
            .await
    }

    /// Execute exactly one pending stage of an existing session.
    pub async fn step(&self, thread_id: &str) -> Result<SessionState, WorkflowError> {
        let checkpoint = self.latest(thread_id).await?;
        self.drive(checkpoint.state, checkpoint.next, checkpoint.step + 1, Some(1))
            .await
    }

    /// Every checkpoint of a thread in step order.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, WorkflowError> {
        let history = self.store.history(thread_id).await?;
        if history.is_empty() {
            return Err(WorkflowError::ThreadNotFound(thread_id.to_string()));
        }
        Ok(history)
    }

    async fn latest(&self, thread_id: &str) -> Result<Checkpoint, WorkflowError> {
        self.store
            .load(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::ThreadNotFound(thread_id.to_string()))
    }

    /// Main loop. `budget` caps the number of stages executed in this call.
    async fn drive(
        &self,
        mut state: SessionState,
        mut cursor: Cursor,
        mut step: usize,
        budget: Option<usize>,
    ) -> Result<SessionState, WorkflowError> {
        let mut executed = 0usize;

        // The engine's budget governs both routing and the retry counter,
        // never dropping below retries already spent
        let retry_budget = self.config.max_retries.max(state.retry_count);
        if matches!(cursor, Cursor::Pending(_)) && state.max_retries != retry_budget {
            info!(
                thread_id = %state.thread_id,
                stored = state.max_retries,
                configured = self.config.max_retries,
                "Applying configured retry budget"
            );
            state.max_retries = retry_budget;
        }

        loop {
            let stage = match cursor {
                Cursor::Finished(status) => {
                    debug!(thread_id = %state.thread_id, status = %status, "Session finished");
                    return Ok(state);
                }
                Cursor::Pending(stage) => stage,
            };

            if budget.is_some_and(|limit| executed >= limit) {
                return Ok(state);
            }

            if step >= self.config.max_transitions {
                let reason = format!(
                    "transition limit of {} reached",
                    self.config.max_transitions
                );
                return Ok(self.abort(state, stage, step, reason).await);
            }

            let before = state.clone();
            let span = info_span!(
                "stage",
                thread_id = %state.thread_id,
                stage = %stage,
                retry_count = state.retry_count
            );
            let result = stages::execute(stage, state, &self.collaborators, &self.config)
                .instrument(span)
                .await;

            let StageResult {
                state: mut next,
                outcome,
            } = match result {
                Ok(result) => result,
                Err(e) => {
                    error!(thread_id = %before.thread_id, stage = %stage, error = %e, "Stage failed fatally");
                    return Ok(self.abort(before, stage, step, e.to_string()).await);
                }
            };

            next.record(stage, &outcome);

            let decision = match self.router.decide(stage, &outcome, &next) {
                Ok(decision) => decision,
                Err(e) => {
                    error!(thread_id = %next.thread_id, error = %e, "Routing failed");
                    return Ok(self.abort(next, stage, step, e.to_string()).await);
                }
            };
            cursor = apply(&mut next, stage, &outcome, decision);

            info!(
                thread_id = %next.thread_id,
                step,
                stage = %stage,
                outcome = ?outcome.kind,
                reason = outcome.reason.as_deref().unwrap_or(""),
                retry_count = next.retry_count,
                next = ?cursor,
                "Transition"
            );

            let checkpoint = Checkpoint::new(step, stage, outcome, cursor, next.clone());
            if let Err(e) = self.store.save(&checkpoint).await {
                error!(thread_id = %next.thread_id, step, error = %e, "Checkpoint write failed");
                return Ok(self.abort(next, stage, step, e.to_string()).await);
            }
            debug!(thread_id = %next.thread_id, step, "Checkpoint saved");

            state = next;
            step += 1;
            executed += 1;
        }
    }

    /// End the session in `FailedFatal` and try to persist that once.
    async fn abort(
        &self,
        mut state: SessionState,
        stage: Stage,
        step: usize,
        reason: String,
    ) -> SessionState {
        state.record_fatal(stage, reason.clone());
        state.finish(stage, SessionStatus::FailedFatal, Some(reason.clone()));

        let checkpoint = Checkpoint::new(
            step,
            stage,
            StageOutcome::failed(reason),
            Cursor::Finished(state.status),
            state.clone(),
        );
        if let Err(e) = self.store.save(&checkpoint).await {
            warn!(thread_id = %state.thread_id, error = %e, "Final checkpoint write failed");
        }
        state
    }
}

/// Apply a routing decision to the session and return the new cursor.
fn apply(
    state: &mut SessionState,
    stage: Stage,
    outcome: &StageOutcome,
    decision: Decision,
) -> Cursor {
    match decision {
        Decision::Advance(next) => Cursor::Pending(next),
        Decision::Reflect => {
            if state.begin_retry() {
                Cursor::Pending(Stage::Reflexion)
            } else {
                // budget lowered below the retries already spent
                state.finish(stage, SessionStatus::FailedMaxRetries, outcome.reason.clone());
                Cursor::Finished(state.status)
            }
        }
        Decision::Finish(status) => {
            state.finish(stage, status, outcome.reason.clone());
            Cursor::Finished(state.status)
        }
    }
}
