//! Workflow state enums.
//!
//! States are stored as TEXT columns and converted at the edges; unknown
//! values read from the database are surfaced as [`StateParseError`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a stored state string is not recognized.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {entity} state '{value}'")]
pub struct StateParseError {
    pub entity: &'static str,
    pub value: String,
}

/// Aggregate state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullRequestState {
    Idle,
    Pending,
    Approved,
    Declined,
    Closed,
}

impl PullRequestState {
    pub const fn as_str(self) -> &'static str {
        match self {
            PullRequestState::Idle => "idle",
            PullRequestState::Pending => "pending",
            PullRequestState::Approved => "approved",
            PullRequestState::Declined => "declined",
            PullRequestState::Closed => "closed",
        }
    }

    /// States in which the pull request still participates in the workflow.
    pub const fn is_active(self) -> bool {
        !matches!(self, PullRequestState::Closed)
    }
}

impl fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullRequestState {
    type Err = StateParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(PullRequestState::Idle),
            "pending" => Ok(PullRequestState::Pending),
            "approved" => Ok(PullRequestState::Approved),
            "declined" => Ok(PullRequestState::Declined),
            "closed" => Ok(PullRequestState::Closed),
            other => Err(StateParseError {
                entity: "pull request",
                value: other.to_string(),
            }),
        }
    }
}

/// State of a single reviewer's review on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewState {
    Idle,
    Pending,
    Approved,
    Declined,
}

impl ReviewState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReviewState::Idle => "idle",
            ReviewState::Pending => "pending",
            ReviewState::Approved => "approved",
            ReviewState::Declined => "declined",
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewState {
    type Err = StateParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(ReviewState::Idle),
            "pending" => Ok(ReviewState::Pending),
            "approved" => Ok(ReviewState::Approved),
            "declined" => Ok(ReviewState::Declined),
            other => Err(StateParseError {
                entity: "review",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_request_state_round_trips() {
        for state in [
            PullRequestState::Idle,
            PullRequestState::Pending,
            PullRequestState::Approved,
            PullRequestState::Declined,
            PullRequestState::Closed,
        ] {
            assert_eq!(state.as_str().parse::<PullRequestState>().unwrap(), state);
        }
    }

    #[test]
    fn review_state_rejects_unknown() {
        let err = "merged".parse::<ReviewState>().unwrap_err();
        assert_eq!(err.value, "merged");
    }

    #[test]
    fn closed_is_not_active() {
        assert!(!PullRequestState::Closed.is_active());
        assert!(PullRequestState::Pending.is_active());
    }
}
