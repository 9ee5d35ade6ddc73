//! State module for tracking scheduled tasks
//!
//! # Components
//!
//! - `TaskState`: lifecycle state of a task (queued, retrying, active, completed, failed)
//! - `TaskRecord`: the scheduler-owned task with guarded transitions
//! - `TaskId`: opaque task handle

mod task_record;
mod task_state;

// Re-export main types
pub use task_record::{TaskId, TaskRecord, TransitionError};
pub use task_state::TaskState;
