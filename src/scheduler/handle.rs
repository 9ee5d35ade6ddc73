//! Completion notification for submitted tasks

use crate::fetch::FetchResponse;
use crate::state::{TaskId, TaskRecord, TaskState};
use crate::TaskError;
use tokio::sync::oneshot;

/// Terminal result of a task, delivered exactly once
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub target: String,
    /// Either `Completed` or `Failed`
    pub state: TaskState,
    /// Fetch attempts made
    pub attempts: u32,
    pub result: Result<FetchResponse, TaskError>,
}

impl TaskOutcome {
    pub(crate) fn from_record(record: &TaskRecord, result: Result<FetchResponse, TaskError>) -> Self {
        Self {
            id: record.id,
            target: record.target.clone(),
            state: record.state,
            attempts: record.attempt,
            result,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// The error that ended the task, if it failed
    pub fn error(&self) -> Option<&TaskError> {
        self.result.as_ref().err()
    }
}

/// Returned by `submit`; resolves once the task reaches a terminal state
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    target: String,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, target: String, receiver: oneshot::Receiver<TaskOutcome>) -> Self {
        Self {
            id,
            target,
            receiver,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Waits for the terminal outcome
    ///
    /// If the scheduler goes away without settling the task, the outcome is a
    /// `Cancelled` failure.
    pub async fn wait(self) -> TaskOutcome {
        let Self {
            id,
            target,
            receiver,
        } = self;

        receiver.await.unwrap_or(TaskOutcome {
            id,
            target,
            state: TaskState::Failed,
            attempts: 0,
            result: Err(TaskError::Cancelled),
        })
    }
}
