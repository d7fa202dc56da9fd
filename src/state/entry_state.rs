/// Entry state definitions for tracking a URL through the crawl
use std::fmt;
use std::time::Duration;

/// Represents the current state of a frontier entry
///
/// ```text
/// Pending -> InFlight -> Done
///                     -> Failed
///                     -> RetryScheduled(delay, attempt) -> InFlight -> ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    // ===== Active States =====
    /// Admitted to the frontier, waiting for a worker
    Pending,

    /// A worker is fetching it right now
    InFlight,

    /// The last attempt failed and a retry was authorized
    RetryScheduled {
        /// Backoff to wait before the next attempt
        delay: Duration,
        /// Number of the attempt that will run next (1-based retries)
        attempt: u32,
    },

    // ===== Terminal States =====
    /// Fetched and processed successfully
    Done,

    /// Permanently failed; no further attempts
    Failed,
}

impl EntryState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the entry may still be fetched
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: &EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Done)
                | (InFlight, Failed)
                | (InFlight, RetryScheduled { .. })
                | (RetryScheduled { .. }, InFlight)
        )
    }

    /// Short name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryScheduled { delay, attempt } => {
                write!(f, "retry_scheduled(attempt {}, {:?})", attempt, delay)
            }
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry() -> EntryState {
        EntryState::RetryScheduled {
            delay: Duration::from_millis(500),
            attempt: 1,
        }
    }

    #[test]
    fn test_is_terminal() {
        assert!(!EntryState::Pending.is_terminal());
        assert!(!EntryState::InFlight.is_terminal());
        assert!(!retry().is_terminal());

        assert!(EntryState::Done.is_terminal());
        assert!(EntryState::Failed.is_terminal());
    }

    #[test]
    fn test_is_success() {
        assert!(EntryState::Done.is_success());
        assert!(!EntryState::Failed.is_success());
        assert!(!EntryState::Pending.is_success());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(EntryState::Pending.can_transition_to(&EntryState::InFlight));
        assert!(EntryState::InFlight.can_transition_to(&EntryState::Done));
        assert!(EntryState::InFlight.can_transition_to(&EntryState::Failed));
        assert!(EntryState::InFlight.can_transition_to(&retry()));
        assert!(retry().can_transition_to(&EntryState::InFlight));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!EntryState::Pending.can_transition_to(&EntryState::Done));
        assert!(!EntryState::Done.can_transition_to(&EntryState::InFlight));
        assert!(!EntryState::Failed.can_transition_to(&retry()));
        assert!(!retry().can_transition_to(&EntryState::Done));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", EntryState::Pending), "pending");
        assert_eq!(format!("{}", EntryState::InFlight), "in_flight");
        assert_eq!(
            format!("{}", retry()),
            "retry_scheduled(attempt 1, 500ms)"
        );
    }
}
