use std::fmt;

/// State of a crawl run
///
/// `Idle -> Running -> {Completed, Stopped, Failed}`; the three outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Running,
    /// Frontier drained or budget exhausted
    Completed,
    /// Halted by adaptive stop or external cancel
    Stopped,
    /// No healthy browser remained or an unrecoverable error occurred
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Checks a run state transition
    ///
    /// # Arguments
    ///
    /// * `next` - The state the run would move to
    ///
    /// # Returns
    ///
    /// `true` only for `Idle -> Running`, `Idle -> Failed`, and the three
    /// exits out of `Running`
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Idle, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Stopped)
                | (Self::Running, Self::Failed)
        )
    }

    /// Process exit code for a run ending in this state
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Stopped => 1,
            Self::Failed => 2,
            Self::Idle | Self::Running => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
