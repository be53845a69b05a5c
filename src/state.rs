//! Pool lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reported before the lifecycle task published its first status
pub const UNDEFINED: &str = "UNDEFINED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolState {
    Creating,
    Bootstrapping,
    Ready,
    Terminating,
    Terminated,
    /// Terminal after an unrecovered error; resources were released
    Failed,
}

impl PoolState {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolState::Creating => "CREATING",
            PoolState::Bootstrapping => "BOOTSTRAPPING",
            PoolState::Ready => "READY",
            PoolState::Terminating => "TERMINATING",
            PoolState::Terminated => "TERMINATED",
            PoolState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PoolState::Terminated | PoolState::Failed)
    }

    /// Termination already requested or done
    pub fn is_shutting_down(self) -> bool {
        matches!(self, PoolState::Terminating | PoolState::Terminated | PoolState::Failed)
    }

    pub fn can_transition_to(self, next: PoolState) -> bool {
        use PoolState::*;
        matches!(
            (self, next),
            (Creating, Bootstrapping)
                | (Bootstrapping, Ready)
                | (Creating | Bootstrapping | Ready, Terminating)
                | (Terminating, Terminated | Failed)
        )
    }

    pub fn ensure_transition(self, next: PoolState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status string for a possibly unpublished state
pub fn status_of(state: Option<PoolState>) -> &'static str {
    state.map(PoolState::as_str).unwrap_or(UNDEFINED)
}
