//! Integration tests for the request scheduler
//!
//! These tests drive the scheduler end-to-end with scripted fetchers on a
//! paused Tokio clock, so window and backoff timings are exact.

use async_trait::async_trait;
use crawl_throttle::config::Config;
use crawl_throttle::{
    CircuitState, FetchError, FetchRequest, FetchResponse, Fetcher, RequestScheduler,
    SchedulerEvent, TaskError, TaskState,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Succeeds after an optional delay, recording when and in what order calls start
struct RecordingFetcher {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<(String, Instant)>>,
    identities: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            identities: Mutex::new(Vec::new()),
        })
    }

    fn started_targets(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.started
            .lock()
            .unwrap()
            .push((request.target.clone(), Instant::now()));
        self.identities
            .lock()
            .unwrap()
            .push(request.identity.id.clone());

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchResponse::new(format!("payload for {}", request.target)).with_status(200))
    }
}

/// Fails a fixed number of times per target, then succeeds
struct FlakyFetcher {
    failures_before_success: u32,
    retryable: bool,
    calls: Mutex<HashMap<String, u32>>,
}

impl FlakyFetcher {
    fn new(failures_before_success: u32, retryable: bool) -> Arc<Self> {
        Arc::new(Self {
            failures_before_success,
            retryable,
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn calls_for(&self, target: &str) -> u32 {
        self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for FlakyFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.target.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if call <= self.failures_before_success {
            let status = if self.retryable { 503 } else { 404 };
            Err(FetchError::status(status, self.retryable, "scripted failure"))
        } else {
            Ok(FetchResponse::new("ok"))
        }
    }
}

/// Fails retryably with a 503 after a delay, on every call
struct SlowFailingFetcher {
    delay: Duration,
    calls: AtomicU32,
}

#[async_trait]
impl Fetcher for SlowFailingFetcher {
    async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Err(FetchError::status(503, true, "Service Unavailable"))
    }
}

/// Never answers; only a timeout or cancellation ends the attempt
struct HangingFetcher {
    calls: AtomicU32,
}

#[async_trait]
impl Fetcher for HangingFetcher {
    async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Creates a permissive test configuration with short backoff
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.max_concurrency = 3;
    config.scheduler.fetch_timeout_ms = 5_000;
    config.rate_limit.max_requests = 1_000;
    config.rate_limit.window_ms = 1_000;
    config.circuit_breaker.failure_threshold = 100;
    config.circuit_breaker.open_timeout_ms = 10_000;
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 100;
    config.retry.max_delay_ms = 1_000;
    config
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_runs_sequentially() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;

    let fetcher = RecordingFetcher::new(Duration::from_millis(50));
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|i| scheduler.submit(format!("https://example.com/{}", i), 0))
        .collect();

    for handle in handles {
        let outcome = handle.wait().await;
        assert_eq!(outcome.state, TaskState::Completed);
    }

    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);

    let started = fetcher.started.lock().unwrap().clone();
    assert_eq!(started.len(), 3);
    for pair in started.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(50));
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 2;

    let fetcher = RecordingFetcher::new(Duration::from_millis(20));
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| scheduler.submit(format!("https://example.com/{}", i), 0))
        .collect();
    for handle in handles {
        assert!(handle.wait().await.is_completed());
    }

    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.stats().completed, 6);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_defers_fourth_task_past_window() {
    let mut config = create_test_config();
    config.rate_limit.max_requests = 3;
    config.rate_limit.window_ms = 1_000;

    let fetcher = RecordingFetcher::new(Duration::ZERO);
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();
    let mut events = scheduler.subscribe();
    let start = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|i| scheduler.submit(format!("https://example.com/{}", i), 0))
        .collect();

    let mut finished_at = Vec::new();
    for handle in handles {
        let outcome = handle.wait().await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.attempts, 1);
        finished_at.push(Instant::now() - start);
    }

    for elapsed in &finished_at[..3] {
        assert!(*elapsed < Duration::from_millis(1_000));
    }
    assert!(finished_at[3] >= Duration::from_millis(1_000));

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.failed, 0);

    let mut rate_limited = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SchedulerEvent::RateLimited { .. }) {
            rate_limited += 1;
        }
    }
    assert!(rate_limited >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_then_success() {
    let fetcher = FlakyFetcher::new(2, true);
    let scheduler = RequestScheduler::new(&create_test_config(), fetcher.clone()).unwrap();
    let mut events = scheduler.subscribe();

    let outcome = scheduler.submit("https://example.com/flaky", 0).wait().await;

    assert_eq!(outcome.state, TaskState::Completed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(fetcher.calls_for("https://example.com/flaky"), 3);

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::RetryScheduled { delay, .. } = event {
            delays.push(delay);
        }
    }
    assert_eq!(
        delays,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_is_not_retried() {
    let fetcher = FlakyFetcher::new(u32::MAX, false);
    let scheduler = RequestScheduler::new(&create_test_config(), fetcher.clone()).unwrap();

    let outcome = scheduler.submit("https://example.com/gone", 0).wait().await;

    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(
        outcome.error(),
        Some(&TaskError::Fetch {
            retryable: false,
            status_code: Some(404),
            message: "scripted failure".to_string(),
        })
    );
    assert_eq!(fetcher.calls_for("https://example.com/gone"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retryable() {
    let mut config = create_test_config();
    config.scheduler.fetch_timeout_ms = 200;
    config.retry.max_attempts = 2;

    let fetcher = Arc::new(HangingFetcher {
        calls: AtomicU32::new(0),
    });
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let outcome = scheduler.submit("https://example.com/slow", 0).wait().await;

    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        outcome.error(),
        Some(&TaskError::Timeout {
            after: Duration::from_millis(200)
        })
    );
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_fails_fast() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.retry.max_attempts = 1;

    let fetcher = FlakyFetcher::new(u32::MAX, true);
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    for i in 0..2 {
        let outcome = scheduler
            .submit(format!("https://example.com/{}", i), 0)
            .wait()
            .await;
        assert_eq!(outcome.attempts, 1);
    }
    assert_eq!(scheduler.circuit_state(), CircuitState::Open);

    let outcome = scheduler.submit("https://example.com/blocked", 0).wait().await;
    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.attempts, 0);
    assert_eq!(outcome.error(), Some(&TaskError::CircuitOpen));
    assert_eq!(fetcher.calls_for("https://example.com/blocked"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_closes_breaker() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.open_timeout_ms = 1_000;
    config.retry.max_attempts = 1;

    // First call per target fails, the second succeeds
    let fetcher = FlakyFetcher::new(1, true);
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();
    let mut events = scheduler.subscribe();

    let outcome = scheduler.submit("https://example.com/a", 0).wait().await;
    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(scheduler.circuit_state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1_000)).await;

    let outcome = scheduler.submit("https://example.com/a", 0).wait().await;
    assert!(outcome.is_completed());
    assert_eq!(scheduler.circuit_state(), CircuitState::Closed);

    let mut changes = Vec::new();
    let mut trial_dispatches = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SchedulerEvent::CircuitStateChanged { state } => changes.push(state),
            SchedulerEvent::Dispatched { trial: true, .. } => trial_dispatches += 1,
            _ => {}
        }
    }
    assert_eq!(
        changes,
        vec![
            CircuitState::Open,
            CircuitState::HalfOpen,
            CircuitState::Closed
        ]
    );
    assert_eq!(trial_dispatches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_requeues_when_configured() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;
    config.scheduler.requeue_on_breaker_open = true;
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.open_timeout_ms = 1_000;
    config.retry.max_attempts = 1;

    let fetcher = FlakyFetcher::new(1, true);
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let first = scheduler.submit("https://example.com/first", 0).wait().await;
    assert_eq!(first.state, TaskState::Failed);
    assert_eq!(scheduler.circuit_state(), CircuitState::Open);

    let start = Instant::now();
    let second = scheduler.submit("https://example.com/second", 0).wait().await;

    // Waited out the open breaker, then the first real attempt failed
    assert!(Instant::now() - start >= Duration::from_millis(1_000));
    assert_eq!(second.attempts, 1);
    assert_eq!(fetcher.calls_for("https://example.com/second"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_priority_then_fifo_order() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;

    let fetcher = RecordingFetcher::new(Duration::from_millis(10));
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    // Occupies the only slot while the rest are queued
    let blocker = scheduler.submit("blocker", 0);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let handles = vec![
        scheduler.submit("low-1", 1),
        scheduler.submit("high-1", 10),
        scheduler.submit("low-2", 1),
        scheduler.submit("high-2", 10),
    ];

    blocker.wait().await;
    for handle in handles {
        assert!(handle.wait().await.is_completed());
    }

    assert_eq!(
        fetcher.started_targets(),
        vec!["blocker", "high-1", "high-2", "low-1", "low-2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_target_is_rejected() {
    let fetcher = RecordingFetcher::new(Duration::ZERO);
    let scheduler = RequestScheduler::new(&create_test_config(), fetcher.clone()).unwrap();

    let outcome = scheduler.submit("", 0).wait().await;

    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.attempts, 0);
    assert!(matches!(outcome.error(), Some(TaskError::Validation(_))));
    assert!(fetcher.started_targets().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_without_drain_cancels_everything() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;

    let fetcher = Arc::new(HangingFetcher {
        calls: AtomicU32::new(0),
    });
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let active = scheduler.submit("https://example.com/active", 0);
    let queued = scheduler.submit("https://example.com/queued", 0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.stats().active, 1);

    scheduler.shutdown(false).await;

    let active = active.wait().await;
    assert_eq!(active.error(), Some(&TaskError::Cancelled));
    assert_eq!(active.attempts, 1);

    let queued = queued.wait().await;
    assert_eq!(queued.error(), Some(&TaskError::Cancelled));
    assert_eq!(queued.attempts, 0);

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let stats = scheduler.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_drain_finishes_in_flight() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;

    let fetcher = RecordingFetcher::new(Duration::from_millis(100));
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let active = scheduler.submit("https://example.com/active", 0);
    let queued = scheduler.submit("https://example.com/queued", 0);
    tokio::time::sleep(Duration::from_millis(10)).await;

    scheduler.shutdown(true).await;

    assert!(active.wait().await.is_completed());
    assert_eq!(queued.wait().await.error(), Some(&TaskError::Cancelled));
    assert_eq!(
        scheduler.submit("https://example.com/late", 0).wait().await.error(),
        Some(&TaskError::ShuttingDown)
    );
}

#[tokio::test(start_paused = true)]
async fn test_drain_turns_retryable_failure_terminal() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 1;
    config.retry.max_attempts = 3;

    let fetcher = Arc::new(SlowFailingFetcher {
        delay: Duration::from_millis(100),
        calls: AtomicU32::new(0),
    });
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let handle = scheduler.submit("https://example.com/flaky", 0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.stats().active, 1);

    scheduler.shutdown(true).await;

    let outcome = handle.wait().await;
    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.attempts, 1);
    assert!(matches!(
        outcome.error(),
        Some(TaskError::Fetch {
            retryable: true,
            status_code: Some(503),
            ..
        })
    ));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_task_settles_exactly_once() {
    let mut config = create_test_config();
    config.retry.max_attempts = 2;

    let fetcher = FlakyFetcher::new(1, true);
    let scheduler = RequestScheduler::new(&config, fetcher).unwrap();
    let mut events = scheduler.subscribe();

    let handles: Vec<_> = (0..10)
        .map(|i| scheduler.submit(format!("https://example.com/{}", i), i % 3))
        .collect();
    let ids: HashSet<_> = handles.iter().map(|handle| handle.id()).collect();

    for handle in handles {
        assert!(handle.wait().await.state.is_terminal());
    }

    let mut terminal = HashMap::new();
    while let Ok(event) = events.try_recv() {
        if let SchedulerEvent::Succeeded { id, .. } | SchedulerEvent::Failed { id, .. } = event {
            *terminal.entry(id).or_insert(0) += 1;
        }
    }

    assert_eq!(terminal.len(), ids.len());
    assert!(terminal.values().all(|count| *count == 1));
    assert_eq!(scheduler.stats().completed, 10);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_present_pooled_identities() {
    let mut config = create_test_config();
    config.scheduler.max_concurrency = 2;
    config.session.pool_size = 2;
    config.session.max_requests_per_identity = 100;

    let fetcher = RecordingFetcher::new(Duration::from_millis(10));
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| scheduler.submit(format!("https://example.com/{}", i), 0))
        .collect();
    for handle in handles {
        assert!(handle.wait().await.is_completed());
    }

    let identities: HashSet<_> = fetcher.identities.lock().unwrap().iter().cloned().collect();
    assert_eq!(identities.len(), 2);
    assert_eq!(scheduler.session_manager().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_rate_limiter_releases_deferred_tasks() {
    let mut config = create_test_config();
    config.rate_limit.max_requests = 1;
    config.rate_limit.window_ms = 60_000;

    let fetcher = RecordingFetcher::new(Duration::ZERO);
    let scheduler = RequestScheduler::new(&config, fetcher.clone()).unwrap();

    assert!(scheduler.submit("https://example.com/1", 0).wait().await.is_completed());

    let deferred = scheduler.submit("https://example.com/2", 0);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(scheduler.stats().rate_limited, 1);

    let start = Instant::now();
    scheduler.reset_rate_limiter();
    assert!(deferred.wait().await.is_completed());
    assert!(Instant::now() - start < Duration::from_secs(60));
    assert_eq!(scheduler.rate_limiter_stats().current, 1);
}
