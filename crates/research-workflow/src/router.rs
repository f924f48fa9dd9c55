//! Transition table
//!
//! | stage        | outcome | retries left | decision                  |
//! |--------------|---------|--------------|---------------------------|
//! | Plan         | ok      | -            | Search                    |
//! | Search       | ok      | -            | Validate                  |
//! | Validate     | ok      | -            | Synthesize                |
//! | Synthesize   | ok      | -            | SafetyCheck               |
//! | SafetyCheck  | ok      | -            | finish: Success           |
//! | any but Reflexion | failed | yes     | Reflexion (retry_count+1) |
//! | any but Reflexion | failed | no      | finish: FailedMaxRetries  |
//! | Reflexion    | ok      | -            | Plan                      |
//! | Reflexion    | failed  | -            | error (unmodeled)         |
//!
//! The match in [`Router::decide`] is exhaustive over `(Stage, OutcomeKind)`,
//! so adding a stage without a route does not compile.

use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::state::{OutcomeKind, SessionState, SessionStatus, Stage, StageOutcome};

/// What the engine does after a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Advance(Stage),
    /// Spend one retry and run Reflexion
    Reflect,
    Finish(SessionStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Router {
    max_retries: u32,
}

impl Router {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Pure function of the stage, its outcome and the retry counter.
    pub fn decide(
        &self,
        stage: Stage,
        outcome: &StageOutcome,
        state: &SessionState,
    ) -> Result<Decision, RouteError> {
        use OutcomeKind::{Failed, Ok as Passed};

        let decision = match (stage, outcome.kind) {
            (Stage::Plan, Passed) => Decision::Advance(Stage::Search),
            (Stage::Search, Passed) => Decision::Advance(Stage::Validate),
            (Stage::Validate, Passed) => Decision::Advance(Stage::Synthesize),
            (Stage::Synthesize, Passed) => Decision::Advance(Stage::SafetyCheck),
            (Stage::SafetyCheck, Passed) => Decision::Finish(SessionStatus::Success),
            (Stage::Reflexion, Passed) => Decision::Advance(Stage::Plan),

            (
                Stage::Plan | Stage::Search | Stage::Validate | Stage::Synthesize | Stage::SafetyCheck,
                Failed,
            ) => {
                if state.retry_count < self.max_retries {
                    Decision::Reflect
                } else {
                    Decision::Finish(SessionStatus::FailedMaxRetries)
                }
            }

            (Stage::Reflexion, Failed) => {
                return Err(RouteError::Unmodeled {
                    stage,
                    outcome: Failed,
                })
            }
        };

        Ok(decision)
    }
}
