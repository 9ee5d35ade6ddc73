//! Request scheduling
//!
//! This module contains the orchestrator that composes the throttle and
//! identity components:
//! - Priority queue with FIFO ordering and eligibility gating
//! - The coordinator and its fetch workers
//! - Completion handles, lifecycle events and derived statistics

mod coordinator;
mod events;
mod handle;
mod queue;
mod stats;

pub use coordinator::RequestScheduler;
pub use events::SchedulerEvent;
pub use handle::{TaskHandle, TaskOutcome};
pub use stats::{print_statistics, SchedulerStats};
