use crate::state::TaskState;
use crate::TaskError;
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

/// Opaque handle identifying a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value of this id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Rejected lifecycle step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

/// A unit of scheduled work, owned by the scheduler until it is terminal
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Opaque descriptor handed to the fetch capability
    pub target: String,

    /// Higher values are dispatched first
    pub priority: i32,

    pub state: TaskState,

    /// Fetch attempts made so far
    pub attempt: u32,

    pub created_at: Instant,

    /// The task is not dispatched before this instant
    pub next_eligible_at: Instant,

    pub last_error: Option<TaskError>,

    /// Set while the task waits out a rate-limiter denial
    pub rate_limited: bool,
}

impl TaskRecord {
    /// Creates a freshly submitted task in the `Queued` state
    pub fn new(id: TaskId, target: String, priority: i32, now: Instant) -> Self {
        Self {
            id,
            target,
            priority,
            state: TaskState::Queued,
            attempt: 0,
            created_at: now,
            next_eligible_at: now,
            last_error: None,
            rate_limited: false,
        }
    }

    fn transition(&mut self, to: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Marks the task as dispatched and counts the attempt
    pub fn activate(&mut self) -> Result<u32, TransitionError> {
        self.transition(TaskState::Active)?;
        self.attempt += 1;
        self.rate_limited = false;
        Ok(self.attempt)
    }

    /// Pushes eligibility back without counting an attempt
    ///
    /// Used for admission denials (rate limit, open breaker with requeue), which
    /// are not attempt failures.
    pub fn defer(&mut self, until: Instant, rate_limited: bool) -> Result<(), TransitionError> {
        let waiting = self.state;
        self.transition(waiting)?;
        self.next_eligible_at = until;
        self.rate_limited = rate_limited;
        Ok(())
    }

    /// Returns an active task to the queue after a retryable failure
    pub fn schedule_retry(&mut self, until: Instant, error: TaskError) -> Result<(), TransitionError> {
        self.transition(TaskState::Retrying)?;
        self.next_eligible_at = until;
        self.last_error = Some(error);
        Ok(())
    }

    /// Marks the task as successfully completed
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskState::Completed)
    }

    /// Marks the task as terminally failed
    pub fn fail(&mut self, error: TaskError) -> Result<(), TransitionError> {
        self.transition(TaskState::Failed)?;
        self.last_error = Some(error);
        Ok(())
    }
}
