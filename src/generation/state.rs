//! Generation session state machine
//!
//! `Idle -> Sending -> (ToolLoop -> Sending)* -> Finalizing -> terminal`.
//! The transition function is pure; the orchestrator performs the I/O each
//! state calls for.

use super::{ChatError, GenerationOutcome};
use thiserror::Error;

/// Upper bound on model turns in one session
pub const MAX_STEPS: usize = 256;

#[derive(Debug, Clone)]
pub enum GenerationState {
    Idle,
    /// Waiting on (or streaming) model turn `step`
    Sending { step: usize },
    /// Executing the tool calls that ended turn `step`
    ToolLoop { step: usize, pending: usize },
    /// Stamping open reasoning and persisting before reaching `outcome`
    Finalizing { outcome: GenerationOutcome },
    Completed,
    Cancelled,
    Failed { error: ChatError },
}

#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Start,
    /// Model turn ended with `pending` unanswered tool calls
    TurnEnded { pending: usize },
    ToolsAnswered,
    Cancel,
    Fail(ChatError),
    Finalized,
}

#[derive(Debug, Clone, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Cancelled | GenerationState::Failed { .. }
        )
    }

    /// Whether a session in this state is talking to the model or its tools
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            GenerationState::Sending { .. } | GenerationState::ToolLoop { .. }
        )
    }
}

/// Pure transition function
pub fn transition(
    state: &GenerationState,
    event: GenerationEvent,
) -> Result<GenerationState, TransitionError> {
    use GenerationEvent as E;
    use GenerationState as S;

    match (state, event) {
        (S::Idle, E::Start) => Ok(S::Sending { step: 0 }),

        (S::Sending { .. }, E::TurnEnded { pending: 0 }) => Ok(S::Finalizing {
            outcome: GenerationOutcome::Completed,
        }),
        (S::Sending { step }, E::TurnEnded { pending }) => Ok(S::ToolLoop {
            step: *step,
            pending,
        }),

        // The step budget ends the loop as a normal completion
        (S::ToolLoop { step, .. }, E::ToolsAnswered) if step + 1 >= MAX_STEPS => {
            Ok(S::Finalizing {
                outcome: GenerationOutcome::Completed,
            })
        }
        (S::ToolLoop { step, .. }, E::ToolsAnswered) => Ok(S::Sending { step: step + 1 }),

        (S::Idle | S::Sending { .. } | S::ToolLoop { .. }, E::Cancel) => Ok(S::Finalizing {
            outcome: GenerationOutcome::Cancelled,
        }),
        (S::Idle | S::Sending { .. } | S::ToolLoop { .. }, E::Fail(error)) => Ok(S::Finalizing {
            outcome: GenerationOutcome::Failed(error),
        }),

        (S::Finalizing { outcome }, E::Finalized) => Ok(match outcome {
            GenerationOutcome::Completed => S::Completed,
            GenerationOutcome::Cancelled => S::Cancelled,
            GenerationOutcome::Failed(error) => S::Failed {
                error: error.clone(),
            },
        }),

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    fn run(events: Vec<GenerationEvent>) -> GenerationState {
        events
            .into_iter()
            .fold(GenerationState::Idle, |state, event| {
                transition(&state, event).unwrap()
            })
    }

    #[test]
    fn test_plain_turn_completes() {
        let state = run(vec![
            GenerationEvent::Start,
            GenerationEvent::TurnEnded { pending: 0 },
            GenerationEvent::Finalized,
        ]);
        assert!(matches!(state, GenerationState::Completed));
    }

    #[test]
    fn test_tool_loop_advances_step() {
        let state = run(vec![
            GenerationEvent::Start,
            GenerationEvent::TurnEnded { pending: 2 },
            GenerationEvent::ToolsAnswered,
        ]);
        assert!(matches!(state, GenerationState::Sending { step: 1 }));
        assert!(state.is_busy());
    }

    #[test]
    fn test_step_budget_completes() {
        let state = GenerationState::ToolLoop {
            step: MAX_STEPS - 1,
            pending: 1,
        };
        let next = transition(&state, GenerationEvent::ToolsAnswered).unwrap();
        assert!(matches!(
            next,
            GenerationState::Finalizing {
                outcome: GenerationOutcome::Completed
            }
        ));
    }

    #[test]
    fn test_cancel_and_failure_still_finalize() {
        let cancelled = run(vec![
            GenerationEvent::Start,
            GenerationEvent::TurnEnded { pending: 1 },
            GenerationEvent::Cancel,
        ]);
        assert!(matches!(
            cancelled,
            GenerationState::Finalizing {
                outcome: GenerationOutcome::Cancelled
            }
        ));

        let failed = run(vec![
            GenerationEvent::Start,
            GenerationEvent::Fail(ChatError::Llm(LlmError::network("reset"))),
            GenerationEvent::Finalized,
        ]);
        assert!(failed.is_terminal());
        assert!(matches!(failed, GenerationState::Failed { error: ChatError::Llm(_) }));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        assert!(transition(&GenerationState::Idle, GenerationEvent::Finalized).is_err());
        assert!(transition(&GenerationState::Completed, GenerationEvent::Start).is_err());
        assert!(transition(
            &GenerationState::Sending { step: 0 },
            GenerationEvent::ToolsAnswered
        )
        .is_err());
    }
}
