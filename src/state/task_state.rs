/// Task state definitions for tracking scheduled work
///
/// This module defines the lifecycle states a task moves through between
/// submission and its single terminal notification.
use std::fmt;

/// Represents the current state of a task in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Waiting States =====
    /// Task is queued and has not been attempted yet
    Queued,

    /// Task failed retryably and is waiting out its backoff in the queue
    Retrying,

    // ===== In-Flight State =====
    /// Task is currently being fetched
    Active,

    // ===== Terminal States =====
    /// Fetch succeeded
    Completed,

    /// Retries exhausted, fatal error, or cancellation
    Failed,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing happens)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the task sits in the queue waiting for dispatch
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Queued | Self::Retrying)
    }

    /// Checks whether moving from this state to `next` is a legal lifecycle step
    ///
    /// Terminal states are immutable. Waiting tasks may also fail directly
    /// (breaker rejection, cancellation) without ever becoming active.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Queued | Self::Retrying, Self::Active) => true,
            (Self::Queued | Self::Retrying, Self::Failed) => true,
            (Self::Queued | Self::Retrying, Self::Queued | Self::Retrying) => true,
            (Self::Active, Self::Retrying | Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }

    /// Converts the task state to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Retrying => "retrying",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns all possible task states
    pub fn all_states() -> [Self; 5] {
        [
            Self::Queued,
            Self::Retrying,
            Self::Active,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
