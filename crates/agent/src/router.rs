//! Turn state machine
//!
//! `Agent` asks the model, `Tools` runs the requested calls, `End` is
//! terminal. Each `Agent -> Tools` edge spends one round trip of the budget.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use tune_provider::ModelTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteState {
    Agent,
    Tools,
    End,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteState::Agent => "Agent",
            RouteState::Tools => "Tools",
            RouteState::End => "End",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("turn budget of {0} round trips exhausted")]
    BudgetExceeded(u32),
}

#[derive(Debug, Clone)]
pub struct Router {
    state: RouteState,
    path: Vec<RouteState>,
    round_trips: u32,
    max_round_trips: u32,
}

impl Router {
    pub fn new(max_round_trips: u32) -> Self {
        Self::resume(RouteState::Agent, 0, max_round_trips)
    }

    /// Continue a turn that already spent `round_trips` of its budget
    pub fn resume(state: RouteState, round_trips: u32, max_round_trips: u32) -> Self {
        Self {
            state,
            path: vec![state],
            round_trips,
            max_round_trips,
        }
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub fn path(&self) -> &[RouteState] {
        &self.path
    }

    pub fn round_trips(&self) -> u32 {
        self.round_trips
    }

    pub fn max_round_trips(&self) -> u32 {
        self.max_round_trips
    }

    pub fn is_done(&self) -> bool {
        self.state == RouteState::End
    }

    /// Route on the model's output. An over-budget tool request ends the turn.
    pub fn on_model_output(&mut self, turn: &ModelTurn) -> Result<RouteState, RouteError> {
        debug_assert_eq!(self.state, RouteState::Agent);
        match turn {
            ModelTurn::Final { .. } => Ok(self.enter(RouteState::End)),
            ModelTurn::ToolRequest { .. } => {
                if self.round_trips >= self.max_round_trips {
                    self.enter(RouteState::End);
                    return Err(RouteError::BudgetExceeded(self.max_round_trips));
                }
                self.round_trips += 1;
                Ok(self.enter(RouteState::Tools))
            }
        }
    }

    /// Every issued call has a result
    pub fn on_tools_complete(&mut self) -> RouteState {
        debug_assert_eq!(self.state, RouteState::Tools);
        self.enter(RouteState::Agent)
    }

    /// Terminate after a fatal error
    pub fn abort(&mut self) {
        if self.state != RouteState::End {
            self.enter(RouteState::End);
        }
    }

    fn enter(&mut self, state: RouteState) -> RouteState {
        self.state = state;
        self.path.push(state);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tune_provider::ToolCall;

    fn final_answer() -> ModelTurn {
        ModelTurn::Final {
            text: "done".into(),
        }
    }

    fn tool_request() -> ModelTurn {
        ModelTurn::ToolRequest {
            content: String::new(),
            calls: vec![ToolCall::new("c1", "search_tracks", json!({}))],
        }
    }

    #[test]
    fn test_direct_answer() {
        let mut router = Router::new(8);
        assert_eq!(
            router.on_model_output(&final_answer()).unwrap(),
            RouteState::End
        );
        assert_eq!(router.path(), &[RouteState::Agent, RouteState::End]);
        assert!(router.is_done());
    }

    #[test]
    fn test_single_round_trip_path() {
        let mut router = Router::new(8);
        router.on_model_output(&tool_request()).unwrap();
        router.on_tools_complete();
        router.on_model_output(&final_answer()).unwrap();

        assert_eq!(
            router.path(),
            &[
                RouteState::Agent,
                RouteState::Tools,
                RouteState::Agent,
                RouteState::End
            ]
        );
        assert_eq!(router.round_trips(), 1);
    }

    #[test]
    fn test_budget_exceeded_for_endless_tool_requests() {
        let mut router = Router::new(3);
        for _ in 0..3 {
            router.on_model_output(&tool_request()).unwrap();
            router.on_tools_complete();
        }
        let err = router.on_model_output(&tool_request()).unwrap_err();
        assert_eq!(err, RouteError::BudgetExceeded(3));
        assert_eq!(router.state(), RouteState::End);
    }

    #[test]
    fn test_zero_budget_still_allows_final_answer() {
        let mut router = Router::new(0);
        assert!(router.on_model_output(&final_answer()).is_ok());

        let mut router = Router::new(0);
        assert!(router.on_model_output(&tool_request()).is_err());
    }

    #[test]
    fn test_resume_counts_prior_round_trips() {
        let mut router = Router::resume(RouteState::Tools, 2, 2);
        router.on_tools_complete();
        assert_eq!(
            router.on_model_output(&tool_request()).unwrap_err(),
            RouteError::BudgetExceeded(2)
        );
    }

    #[test]
    fn test_abort_ends_once() {
        let mut router = Router::new(8);
        router.abort();
        router.abort();
        assert_eq!(router.path(), &[RouteState::Agent, RouteState::End]);
    }
}
