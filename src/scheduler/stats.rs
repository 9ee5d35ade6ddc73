//! Scheduler statistics
//!
//! Stats are derived on demand from the task records and the admission
//! components. Nothing here is stored as independent truth.

use crate::state::{TaskRecord, TaskState};
use crate::throttle::{CircuitBreakerStats, CircuitState, RateLimiterStats};
use std::collections::HashMap;

/// Snapshot of the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStats {
    /// Total number of tasks ever submitted
    pub total: usize,

    pub queued: usize,
    pub retrying: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,

    /// Waiting tasks currently deferred by the rate limiter
    pub rate_limited: usize,

    /// Terminal failures grouped by error code
    pub error_summary: HashMap<&'static str, usize>,

    pub circuit: CircuitBreakerStats,
    pub rate_limiter: RateLimiterStats,
}

impl SchedulerStats {
    pub(crate) fn collect<'a>(
        records: impl IntoIterator<Item = &'a TaskRecord>,
        circuit: CircuitBreakerStats,
        rate_limiter: RateLimiterStats,
    ) -> Self {
        let mut stats = Self {
            total: 0,
            queued: 0,
            retrying: 0,
            active: 0,
            completed: 0,
            failed: 0,
            rate_limited: 0,
            error_summary: HashMap::new(),
            circuit,
            rate_limiter,
        };

        for record in records {
            stats.total += 1;
            match record.state {
                TaskState::Queued => stats.queued += 1,
                TaskState::Retrying => stats.retrying += 1,
                TaskState::Active => stats.active += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => {
                    stats.failed += 1;
                    if let Some(error) = &record.last_error {
                        *stats.error_summary.entry(error.code()).or_insert(0) += 1;
                    }
                }
            }

            if record.state.is_waiting() && record.rate_limited {
                stats.rate_limited += 1;
            }
        }

        stats
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state
    }

    /// Tasks that have not reached a terminal state
    pub fn pending(&self) -> usize {
        self.queued + self.retrying + self.active
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &SchedulerStats) {
    println!("=== Scheduler Statistics ===\n");

    println!("Tasks:");
    println!("  Submitted: {}", stats.total);
    for (label, count) in [
        ("Queued", stats.queued),
        ("Retrying", stats.retrying),
        ("Active", stats.active),
        ("Completed", stats.completed),
        ("Failed", stats.failed),
    ] {
        let percentage = if stats.total > 0 {
            (count as f64 / stats.total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    if !stats.error_summary.is_empty() {
        println!("Error Summary:");
        let mut error_counts: Vec<_> = stats.error_summary.iter().collect();
        error_counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (code, count) in error_counts {
            println!("  {}: {}", code, count);
        }
        println!();
    }

    println!("Admission:");
    println!(
        "  Circuit breaker: {} ({} consecutive failures)",
        stats.circuit.state, stats.circuit.consecutive_failures
    );
    println!(
        "  Rate limiter: {} / {} in {:?} window",
        stats.rate_limiter.current, stats.rate_limiter.max, stats.rate_limiter.window
    );
    println!();

    let success_rate = if stats.total > 0 {
        (stats.completed as f64 / stats.total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} tasks completed)",
        success_rate, stats.completed, stats.total
    );
}
