//! Lifecycle events broadcast by the scheduler

use crate::state::TaskId;
use crate::throttle::CircuitState;
use crate::TaskError;
use std::time::Duration;

/// Capacity of the event channel; slow subscribers observe `Lagged`
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something observable happened inside the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Submitted {
        id: TaskId,
        priority: i32,
    },

    /// An attempt passed admission and was handed to a worker
    Dispatched {
        id: TaskId,
        attempt: u32,
        trial: bool,
    },

    Succeeded {
        id: TaskId,
        attempts: u32,
        elapsed: Duration,
    },

    RetryScheduled {
        id: TaskId,
        attempt: u32,
        delay: Duration,
        error: TaskError,
    },

    /// Dispatch was deferred by the rate limiter
    RateLimited {
        id: TaskId,
        retry_after: Duration,
    },

    Failed {
        id: TaskId,
        attempts: u32,
        error: TaskError,
    },

    CircuitStateChanged {
        state: CircuitState,
    },
}

impl SchedulerEvent {
    /// The task this event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Submitted { id, .. }
            | Self::Dispatched { id, .. }
            | Self::Succeeded { id, .. }
            | Self::RetryScheduled { id, .. }
            | Self::RateLimited { id, .. }
            | Self::Failed { id, .. } => Some(*id),
            Self::CircuitStateChanged { .. } => None,
        }
    }
}
