//! Request scheduler - admission, dispatch and outcome handling
//!
//! A single coordinator task owns dispatch. Each time it wakes it pops eligible
//! tasks in priority order, asks the circuit breaker and then the rate limiter
//! for admission, and spawns one worker per admitted attempt. Workers acquire an
//! identity and run the fetch outside the scheduling lock; they re-enter it only
//! to report the outcome, which drives the breaker and the retry policy.
//!
//! The coordinator wakes on:
//! - a submission, completion, reset or shutdown (via `Notify`)
//! - the earliest instant a deferred task becomes eligible
//! - a worker finishing

use crate::config::{validate_scheduler_config, Config};
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::identity::{IdentityOutcome, SessionManager};
use crate::scheduler::events::{SchedulerEvent, EVENT_CHANNEL_CAPACITY};
use crate::scheduler::handle::{TaskHandle, TaskOutcome};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::stats::SchedulerStats;
use crate::state::{TaskId, TaskRecord};
use crate::throttle::{
    CircuitBreaker, CircuitBreakerStats, CircuitState, RateDecision, RateLimiter,
    RateLimiterStats, RetryDecision, RetryPolicy,
};
use crate::{ConfigError, TaskError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A task record plus what the scheduler needs to settle it
#[derive(Debug)]
struct TaskEntry {
    record: TaskRecord,
    notifier: Option<oneshot::Sender<TaskOutcome>>,
    /// The in-flight attempt holds the breaker's half-open trial permit
    trial: bool,
}

/// Everything guarded by the scheduling lock
#[derive(Debug)]
struct SchedulerState {
    /// Every submitted task; settled records stay until `prune_finished`
    tasks: HashMap<TaskId, TaskEntry>,
    queue: TaskQueue,
    active: usize,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    next_id: u64,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wakeup: Notify,
    cancel: CancellationToken,
    events: broadcast::Sender<SchedulerEvent>,
    fetcher: Arc<dyn Fetcher>,
    sessions: Arc<SessionManager>,
    max_concurrency: usize,
    fetch_timeout: Duration,
    requeue_on_breaker_open: bool,
}

/// One admitted attempt handed to a worker
struct Attempt {
    id: TaskId,
    target: String,
    number: u32,
}

/// Bounded-concurrency scheduler for fetch tasks
///
/// Must be created inside a Tokio runtime; construction spawns the
/// coordinator task. Dropping the scheduler without calling
/// [`shutdown`](Self::shutdown) cancels everything still pending.
pub struct RequestScheduler {
    shared: Arc<Shared>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl RequestScheduler {
    /// Creates a scheduler with its own session manager
    ///
    /// # Arguments
    ///
    /// * `config` - Full configuration; every section is validated
    /// * `fetcher` - The capability that performs each attempt
    ///
    /// # Returns
    ///
    /// * `Ok(RequestScheduler)` - The coordinator is running
    /// * `Err(ConfigError)` - A configuration value is out of range
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        let sessions = Arc::new(SessionManager::new(&config.session)?);
        Self::with_session_manager(config, fetcher, sessions)
    }

    /// Creates a scheduler drawing identities from an existing session manager
    pub fn with_session_manager(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        sessions: Arc<SessionManager>,
    ) -> Result<Self, ConfigError> {
        validate_scheduler_config(&config.scheduler)?;

        let state = SchedulerState {
            tasks: HashMap::new(),
            queue: TaskQueue::new(),
            active: 0,
            limiter: RateLimiter::new(&config.rate_limit)?,
            breaker: CircuitBreaker::new(&config.circuit_breaker)?,
            retry: RetryPolicy::new(&config.retry)?,
            next_id: 1,
            shutting_down: false,
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            wakeup: Notify::new(),
            cancel: CancellationToken::new(),
            events,
            fetcher,
            sessions,
            max_concurrency: config.scheduler.max_concurrency as usize,
            fetch_timeout: config.scheduler.fetch_timeout(),
            requeue_on_breaker_open: config.scheduler.requeue_on_breaker_open,
        });

        let coordinator = tokio::spawn(run_coordinator(Arc::clone(&shared)));

        tracing::info!(
            max_concurrency = shared.max_concurrency,
            fetch_timeout = ?shared.fetch_timeout,
            "Request scheduler started"
        );

        Ok(Self {
            shared,
            coordinator: Mutex::new(Some(coordinator)),
        })
    }

    /// Enqueues a task; never blocks
    ///
    /// An empty target, or a submission after shutdown began, settles the
    /// returned handle immediately with a failure and zero attempts.
    pub fn submit(&self, target: impl Into<String>, priority: i32) -> TaskHandle {
        let target = target.into();
        let now = Instant::now();
        let (sender, receiver) = oneshot::channel();

        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;

            let id = TaskId::new(state.next_id);
            state.next_id += 1;

            let mut entry = TaskEntry {
                record: TaskRecord::new(id, target.clone(), priority, now),
                notifier: Some(sender),
                trial: false,
            };
            self.shared.emit(SchedulerEvent::Submitted { id, priority });

            let rejection = if state.shutting_down {
                Some(TaskError::ShuttingDown)
            } else if target.trim().is_empty() {
                Some(TaskError::Validation("target must not be empty".to_string()))
            } else {
                None
            };

            match rejection {
                Some(error) => {
                    tracing::debug!(task_id = %id, %error, "Rejecting submission");
                    self.shared.fail_waiting(&mut entry, error, now);
                }
                None => {
                    tracing::trace!(task_id = %id, priority, "Task queued");
                    state.queue.push(id, priority, now);
                }
            }

            state.tasks.insert(id, entry);
            self.shared.wakeup.notify_one();

            TaskHandle::new(id, target, receiver)
        }
    }

    /// Derives a statistics snapshot from the current task set
    pub fn stats(&self) -> SchedulerStats {
        let now = Instant::now();
        let mut guard = self.shared.lock();
        let SchedulerState {
            tasks,
            limiter,
            breaker,
            ..
        } = &mut *guard;

        SchedulerStats::collect(
            tasks.values().map(|entry| &entry.record),
            breaker.stats(),
            limiter.stats_at(now),
        )
    }

    /// Stops admitting dispatches and waits for the scheduler to wind down
    ///
    /// Queued and retrying tasks fail with `Cancelled`. With `drain`, in-flight
    /// attempts run to completion but are not retried; without it they are
    /// cancelled. Returns once every task is settled. A concurrent second
    /// call returns without waiting.
    pub async fn shutdown(&self, drain: bool) {
        self.shared.begin_shutdown(drain);

        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler coordinator failed: {}", e);
            }
        }
    }

    /// Subscribes to lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.shared.lock().limiter.stats_at(Instant::now())
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.shared.lock().breaker.state()
    }

    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.shared.lock().breaker.stats()
    }

    /// Forces the breaker closed
    pub fn reset_circuit_breaker(&self) {
        {
            let mut state = self.shared.lock();
            let previous = state.breaker.state();
            state.breaker.reset();

            if previous != CircuitState::Closed {
                tracing::info!("Circuit breaker reset from {}", previous);
                self.shared.emit(SchedulerEvent::CircuitStateChanged {
                    state: CircuitState::Closed,
                });
            }
        }
        self.shared.wakeup.notify_one();
    }

    /// Empties the rate limiter window and releases rate-limited tasks
    pub fn reset_rate_limiter(&self) {
        let now = Instant::now();
        {
            let mut guard = self.shared.lock();
            let SchedulerState {
                tasks,
                queue,
                limiter,
                ..
            } = &mut *guard;

            limiter.reset();

            // Rebuild the queue so deferred tasks become eligible immediately
            for id in queue.drain() {
                let Some(entry) = tasks.get_mut(&id) else {
                    continue;
                };
                if entry.record.rate_limited {
                    if let Err(err) = entry.record.defer(now, false) {
                        tracing::error!(task_id = %id, %err, "Cannot release task");
                    }
                }
                queue.push(id, entry.record.priority, entry.record.next_eligible_at);
            }
            tracing::info!("Rate limiter reset");
        }
        self.shared.wakeup.notify_one();
    }

    /// Drops the records of settled tasks
    ///
    /// Completed and failed records are kept for [`stats`](Self::stats)
    /// until pruned, so a long-lived scheduler should call this
    /// periodically. Pruned tasks no longer appear in any count.
    ///
    /// # Returns
    ///
    /// The number of records removed
    pub fn prune_finished(&self) -> usize {
        let mut state = self.shared.lock();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, entry| !entry.record.state.is_terminal());

        let pruned = before - state.tasks.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned finished task records");
        }
        pruned
    }

    /// The session manager supplying identities to attempts
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.shared.sessions
    }
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        self.shared.begin_shutdown(false);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Admits as many eligible tasks as capacity and admission allow
    ///
    /// Returns the instant at which dispatch should be re-evaluated, if any.
    fn dispatch(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        workers: &mut JoinSet<()>,
        now: Instant,
    ) -> Option<Instant> {
        if state.shutting_down {
            return None;
        }

        let SchedulerState {
            tasks,
            queue,
            active,
            limiter,
            breaker,
            ..
        } = state;

        while *active < self.max_concurrency {
            let Some(queued) = queue.pop_eligible(now) else {
                break;
            };
            let Some(entry) = tasks.get_mut(&queued.id) else {
                continue;
            };
            if !entry.record.state.is_waiting() {
                continue;
            }

            let (permit, moved) = breaker.try_acquire_at(now);
            if let Some(circuit) = moved {
                self.emit(SchedulerEvent::CircuitStateChanged { state: circuit });
            }

            if !permit.is_admitted() {
                if self.requeue_on_breaker_open {
                    let until = now + breaker.open_timeout();
                    tracing::debug!(task_id = %queued.id, "Circuit open, requeueing task");
                    requeue(queue, entry, until, false);
                } else {
                    tracing::debug!(task_id = %queued.id, "Circuit open, failing task");
                    self.fail_waiting(entry, TaskError::CircuitOpen, now);
                }
                continue;
            }

            if let RateDecision::Denied { retry_after } = limiter.try_acquire_at(now) {
                if permit.is_trial() {
                    breaker.abandon_trial();
                }
                let until = now + retry_after;
                tracing::debug!(task_id = %queued.id, ?retry_after, "Rate limited, deferring task");
                requeue(queue, entry, until, true);
                self.emit(SchedulerEvent::RateLimited {
                    id: queued.id,
                    retry_after,
                });
                // Nothing else can be admitted before the window frees a slot
                return Some(until);
            }

            let number = match entry.record.activate() {
                Ok(number) => number,
                Err(err) => {
                    tracing::error!(task_id = %queued.id, %err, "Cannot activate task");
                    continue;
                }
            };
            entry.trial = permit.is_trial();
            *active += 1;

            tracing::debug!(
                task_id = %queued.id,
                attempt = number,
                trial = entry.trial,
                "Dispatching task"
            );
            self.emit(SchedulerEvent::Dispatched {
                id: queued.id,
                attempt: number,
                trial: entry.trial,
            });

            workers.spawn(execute(
                Arc::clone(self),
                Attempt {
                    id: queued.id,
                    target: entry.record.target.clone(),
                    number,
                },
            ));
        }

        if *active < self.max_concurrency {
            queue.next_eligible_at()
        } else {
            None
        }
    }

    /// Reports the outcome of an attempt and wakes the coordinator
    fn finish(&self, id: TaskId, result: Result<FetchResponse, TaskError>) {
        let now = Instant::now();
        {
            let mut guard = self.lock();
            guard.active = guard.active.saturating_sub(1);
            self.record_outcome(&mut guard, id, result, now);
        }
        self.wakeup.notify_one();
    }

    fn record_outcome(
        &self,
        state: &mut SchedulerState,
        id: TaskId,
        result: Result<FetchResponse, TaskError>,
        now: Instant,
    ) {
        let SchedulerState {
            tasks,
            queue,
            breaker,
            retry,
            shutting_down,
            ..
        } = state;

        let Some(entry) = tasks.get_mut(&id) else {
            tracing::warn!(task_id = %id, "Outcome reported for unknown task");
            return;
        };
        let trial = std::mem::take(&mut entry.trial);

        let error = match result {
            Ok(response) => {
                if let Some(circuit) = breaker.record_success(trial) {
                    self.emit(SchedulerEvent::CircuitStateChanged { state: circuit });
                }
                match entry.record.complete() {
                    Ok(()) => {
                        tracing::debug!(task_id = %id, attempts = entry.record.attempt, "Task completed");
                        self.settle(entry, Ok(response), now);
                    }
                    Err(err) => tracing::error!(task_id = %id, %err, "Cannot complete task"),
                }
                return;
            }
            Err(error) => error,
        };

        if error == TaskError::Cancelled {
            if trial {
                breaker.abandon_trial();
            }
        } else if let Some(circuit) = breaker.record_failure_at(now, trial) {
            self.emit(SchedulerEvent::CircuitStateChanged { state: circuit });
        }

        let attempt = entry.record.attempt;
        let decision = if *shutting_down {
            RetryDecision::Stop
        } else {
            retry.decide(attempt, &error)
        };

        match decision {
            RetryDecision::Retry { delay } => {
                tracing::warn!(
                    task_id = %id,
                    attempt,
                    max_attempts = retry.max_attempts(),
                    ?delay,
                    "Attempt failed, retrying: {}",
                    error
                );
                self.emit(SchedulerEvent::RetryScheduled {
                    id,
                    attempt,
                    delay,
                    error: error.clone(),
                });

                let until = now + delay;
                match entry.record.schedule_retry(until, error) {
                    Ok(()) => queue.push(id, entry.record.priority, until),
                    Err(err) => tracing::error!(task_id = %id, %err, "Cannot retry task"),
                }
            }
            RetryDecision::Stop => {
                tracing::warn!(task_id = %id, attempts = attempt, "Task failed: {}", error);
                match entry.record.fail(error.clone()) {
                    Ok(()) => self.settle(entry, Err(error), now),
                    Err(err) => tracing::error!(task_id = %id, %err, "Cannot fail task"),
                }
            }
        }
    }

    /// Fails a task that never reached (or is no longer at) a worker
    fn fail_waiting(&self, entry: &mut TaskEntry, error: TaskError, now: Instant) {
        if let Err(err) = entry.record.fail(error.clone()) {
            tracing::error!(task_id = %entry.record.id, %err, "Cannot fail task");
            return;
        }
        self.settle(entry, Err(error), now);
    }

    /// Emits the terminal event and delivers the single notification
    fn settle(&self, entry: &mut TaskEntry, result: Result<FetchResponse, TaskError>, now: Instant) {
        let record = &entry.record;

        let event = match &result {
            Ok(_) => SchedulerEvent::Succeeded {
                id: record.id,
                attempts: record.attempt,
                elapsed: now.saturating_duration_since(record.created_at),
            },
            Err(error) => SchedulerEvent::Failed {
                id: record.id,
                attempts: record.attempt,
                error: error.clone(),
            },
        };
        self.emit(event);

        if let Some(notifier) = entry.notifier.take() {
            // The caller may have dropped its handle
            let _ = notifier.send(TaskOutcome::from_record(record, result));
        }
    }

    fn begin_shutdown(&self, drain: bool) {
        let now = Instant::now();
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            if !state.shutting_down {
                state.shutting_down = true;
                tracing::info!(
                    drain,
                    queued = state.queue.len(),
                    active = state.active,
                    "Shutting down scheduler"
                );
            }

            for id in state.queue.drain() {
                if let Some(entry) = state.tasks.get_mut(&id) {
                    if entry.record.state.is_waiting() {
                        self.fail_waiting(entry, TaskError::Cancelled, now);
                    }
                }
            }
        }

        if !drain {
            self.cancel.cancel();
        }
        self.wakeup.notify_one();
    }
}

fn requeue(queue: &mut TaskQueue, entry: &mut TaskEntry, until: Instant, rate_limited: bool) {
    match entry.record.defer(until, rate_limited) {
        Ok(()) => queue.push(entry.record.id, entry.record.priority, until),
        Err(err) => tracing::error!(task_id = %entry.record.id, %err, "Cannot requeue task"),
    }
}

async fn run_coordinator(shared: Arc<Shared>) {
    let mut workers = JoinSet::new();

    loop {
        let wake = {
            let mut state = shared.lock();
            if state.shutting_down && state.active == 0 && state.queue.is_empty() {
                break;
            }
            shared.dispatch(&mut state, &mut workers, Instant::now())
        };

        tokio::select! {
            _ = shared.wakeup.notified() => {}
            _ = sleep_until(wake) => {}
            Some(joined) = workers.join_next() => log_worker_exit(joined),
        }
    }

    while let Some(joined) = workers.join_next().await {
        log_worker_exit(joined);
    }
    tracing::debug!("Scheduler coordinator stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_worker_exit(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            tracing::error!("Fetch worker panicked: {}", err);
        }
    }
}

/// Settles an attempt whose worker ended without reporting
struct CompletionGuard {
    shared: Arc<Shared>,
    id: TaskId,
    armed: bool,
}

impl CompletionGuard {
    fn finish(mut self, result: Result<FetchResponse, TaskError>) {
        self.armed = false;
        self.shared.finish(self.id, result);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.finish(
                self.id,
                Err(TaskError::Fetch {
                    retryable: false,
                    status_code: None,
                    message: "attempt aborted before reporting an outcome".to_string(),
                }),
            );
        }
    }
}

async fn execute(shared: Arc<Shared>, attempt: Attempt) {
    let guard = CompletionGuard {
        shared: Arc::clone(&shared),
        id: attempt.id,
        armed: true,
    };

    let identity = shared.sessions.acquire();
    let timeout = shared.fetch_timeout;

    tracing::debug!(
        task_id = %attempt.id,
        attempt = attempt.number,
        identity = %identity.id,
        "Fetching {}",
        attempt.target
    );

    let request = FetchRequest {
        target: attempt.target,
        headers: identity.fingerprint.headers(),
        identity: identity.clone(),
        timeout,
    };

    let result = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => Err(TaskError::Cancelled),
        fetched = tokio::time::timeout(timeout, shared.fetcher.fetch(request)) => match fetched {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(TaskError::from(err)),
            Err(_) => Err(TaskError::Timeout { after: timeout }),
        },
    };

    let identity_outcome = match &result {
        Ok(response) => IdentityOutcome::Success {
            cookies: response.cookies.clone(),
        },
        Err(_) => IdentityOutcome::Failure,
    };
    shared.sessions.release(&identity, identity_outcome);

    guard.finish(result);
}
