use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the remote capture session as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Start failed. Terminal until a new authenticated period.
    Error,
}

impl SessionPhase {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `Starting -> Stopped` covers a stop or logout while the start call is
    /// still in flight.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Error, Stopped)
        )
    }

    /// A start has been dispatched and not yet torn down
    pub fn is_live(self) -> bool {
        matches!(self, SessionPhase::Starting | SessionPhase::Running)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionPhase::Stopped => "stopped",
            SessionPhase::Starting => "starting",
            SessionPhase::Running => "running",
            SessionPhase::Error => "error",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
