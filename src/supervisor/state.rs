//! Attempt state machine for one tool invocation.
//!
//! ```text
//! pending -> running -> succeeded
//!                    -> failed    -> pending (attempts left) | done
//!                    -> timed_out -> pending (attempts left) | failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl InvocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    fn can_transition(self, to: Self) -> bool {
        use InvocationState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Failed, Pending)
                | (TimedOut, Pending)
                | (TimedOut, Failed)
        )
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub attempt: u32,
    pub state: InvocationState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: InvocationState,
        to: InvocationState,
    },
    #[error("invocation already finished in state {state}")]
    Finished { state: InvocationState },
}

/// Result of a finished attempt as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// What the supervisor should do after recording an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retry,
    Done,
}

#[derive(Debug, Clone)]
pub struct InvocationStateMachine {
    state: InvocationState,
    attempt: u32,
    max_attempts: u32,
    finished: bool,
    log: Vec<Transition>,
}

impl InvocationStateMachine {
    /// Starts in `pending` for attempt 1. `max_attempts` is at least 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: InvocationState::Pending,
            attempt: 1,
            max_attempts: max_attempts.max(1),
            finished: false,
            log: vec![Transition {
                attempt: 1,
                state: InvocationState::Pending,
                at: Utc::now(),
                detail: None,
            }],
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Current attempt number, 1-based.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempts that reached `running`.
    pub fn attempts_made(&self) -> u32 {
        self.log
            .iter()
            .filter(|t| t.state == InvocationState::Running)
            .count() as u32
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn log(&self) -> &[Transition] {
        &self.log
    }

    pub fn into_log(self) -> Vec<Transition> {
        self.log
    }

    fn transition(&mut self, to: InvocationState, detail: Option<String>) -> Result<(), StateError> {
        if self.finished {
            return Err(StateError::Finished { state: self.state });
        }
        if !self.state.can_transition(to) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.log.push(Transition {
            attempt: self.attempt,
            state: to,
            at: Utc::now(),
            detail,
        });
        Ok(())
    }

    /// `pending -> running`.
    pub fn start(&mut self) -> Result<u32, StateError> {
        self.transition(InvocationState::Running, None)?;
        Ok(self.attempt)
    }

    /// Records the end of the running attempt and decides whether to retry.
    pub fn record(
        &mut self,
        outcome: AttemptOutcome,
        detail: Option<String>,
    ) -> Result<Step, StateError> {
        let state = match outcome {
            AttemptOutcome::Succeeded => InvocationState::Succeeded,
            AttemptOutcome::Failed => InvocationState::Failed,
            AttemptOutcome::TimedOut => InvocationState::TimedOut,
        };
        self.transition(state, detail)?;

        if state == InvocationState::Succeeded {
            self.finished = true;
            return Ok(Step::Done);
        }

        if self.attempt < self.max_attempts {
            self.attempt += 1;
            self.transition(InvocationState::Pending, None)?;
            return Ok(Step::Retry);
        }

        if state == InvocationState::TimedOut {
            self.transition(
                InvocationState::Failed,
                Some(format!("attempts exhausted after {}", self.attempt)),
            )?;
        }
        self.finished = true;
        Ok(Step::Done)
    }

    /// Fails the invocation without retrying, from `pending` or `running`.
    pub fn abort(&mut self, detail: impl Into<String>) -> Result<(), StateError> {
        self.transition(InvocationState::Failed, Some(detail.into()))?;
        self.finished = true;
        Ok(())
    }
}
