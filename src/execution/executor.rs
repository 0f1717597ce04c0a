//! # Task Executor
//!
//! Runs tasks against an [`ExecutionBackend`] with bounded concurrency, a
//! cache in front and a resource pool behind.
//!
//! ## Task flow
//!
//! ```text
//! submit ─▶ cache lookup ──hit──▶ Completed (from cache)
//!               │ miss
//!               ▼
//!        in-flight claim ──follower──▶ shares the leader's result
//!               │ leader
//!               ▼
//!   Queued (admission permit) ─▶ Borrowed (pool handle) ─▶ Running (backend)
//!                                                             │
//!                              cache write + history ◀── Completed | Failed
//! ```
//!
//! Tasks waiting for an admission permit hold no pool handle. A task's
//! deadline is enforced while it is queued, again right after borrowing and
//! while the backend runs; a task that expires before invocation gives its
//! handle back untouched.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, Stream};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot, watch, Notify, OnceCell, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::backend::{BackendResponse, ExecutionBackend};
use super::buffers::BufferPool;
use super::error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorClassifierConfig, ErrorContext,
    ExecutionFailure, StandardErrorClassifier, TaskError,
};
use super::history::{BoundedHistory, ExecutionRecord, ExecutionStatus};
use super::memory::{MemoryManager, MemoryProbe};
use super::metrics::{ComponentSnapshot, ExecutorMetrics, MetricsCollector};
use super::task::{
    fingerprint_into, truncate_output, ResultSource, Task, TaskResult, TaskState,
};
use crate::cache::TieredCache;
use crate::config::{EngineConfig, ExecutorConfig, MemoryOptimizationConfig, MonitoringConfig};
use crate::constants::BACKGROUND_STOP_TIMEOUT;
use crate::events::{EngineEvent, EventPublisher, TaskEvent};
use crate::logging::{log_error, log_task_operation};
use crate::pool::ResourcePool;
use crate::resilience::CircuitBreaker;

/// Shared handle to a backend, cloned into queued and streamed work
pub type SharedBackend<R> = Arc<dyn ExecutionBackend<R>>;

/// Bounded concurrent executor in front of a [`ResourcePool`]
///
/// Cloning is cheap and every clone drives the same executor.
pub struct TaskExecutor<R>
where
    R: Send + Sync + 'static,
{
    inner: Arc<ExecutorInner<R>>,
}

impl<R> Clone for TaskExecutor<R>
where
    R: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for TaskExecutor<R>
where
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("id", &self.inner.id)
            .field("in_flight", &self.inner.activity.active())
            .field("accepting", &self.inner.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

struct QueuedTask<R>
where
    R: Send + Sync + 'static,
{
    task: Task,
    backend: SharedBackend<R>,
    reply: oneshot::Sender<TaskResult>,
    submitted: Instant,
}

/// Running execution sharing its result with same-fingerprint callers
struct InFlight {
    claim_id: u64,
    sender: broadcast::Sender<TaskResult>,
}

/// Counts submitted work that has not finished yet
#[derive(Debug, Default)]
struct ActivityTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ActivityTracker {
    fn enter(self: &Arc<Self>) -> ActivityGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            tracker: Arc::clone(self),
        }
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct ActivityGuard {
    tracker: Arc<ActivityTracker>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.tracker.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

struct ExecutorInner<R>
where
    R: Send + Sync + 'static,
{
    id: Uuid,
    config: ExecutorConfig,
    memory_config: MemoryOptimizationConfig,
    monitoring: MonitoringConfig,

    pool: Arc<ResourcePool<R>>,
    cache: Arc<TieredCache<TaskResult>>,
    events: EventPublisher,
    classifier: Arc<dyn ErrorClassifier>,
    circuit_breaker: Option<CircuitBreaker>,

    admission: Semaphore,
    in_flight: DashMap<String, InFlight>,
    next_claim: AtomicU64,
    history: BoundedHistory,
    metrics: MetricsCollector,
    buffers: Arc<BufferPool>,
    memory: Arc<MemoryManager>,

    queue: Mutex<VecDeque<QueuedTask<R>>>,
    accepting: AtomicBool,
    activity: Arc<ActivityTracker>,
    started: AtomicBool,
    stop: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown: OnceCell<()>,
}

enum Claim<'a> {
    Leader(LeaderClaim<'a>),
    Follower(broadcast::Receiver<TaskResult>),
}

/// Exclusive right to execute one fingerprint
///
/// Dropping the claim without completing it (cancellation) releases the
/// fingerprint and wakes followers so they can run the task themselves.
struct LeaderClaim<'a> {
    in_flight: &'a DashMap<String, InFlight>,
    fingerprint: &'a str,
    claim_id: u64,
    sender: broadcast::Sender<TaskResult>,
}

impl LeaderClaim<'_> {
    fn complete(self, result: &TaskResult) {
        self.release();
        // Followers that already gave up are not an error
        let _ = self.sender.send(result.clone());
    }

    fn release(&self) {
        self.in_flight
            .remove_if(self.fingerprint, |_, entry| entry.claim_id == self.claim_id);
    }
}

impl Drop for LeaderClaim<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Circuit breaker admission for one backend call
///
/// An admitted call that ends without a recorded outcome is released as
/// ignored, including when the task is cancelled.
struct BreakerCall<'a> {
    breaker: Option<&'a CircuitBreaker>,
    settled: bool,
}

impl BreakerCall<'_> {
    fn success(mut self, duration: std::time::Duration) {
        if let Some(breaker) = self.breaker {
            breaker.record_success(duration);
        }
        self.settled = true;
    }

    fn failure(mut self, duration: std::time::Duration) {
        if let Some(breaker) = self.breaker {
            breaker.record_failure(duration);
        }
        self.settled = true;
    }
}

impl Drop for BreakerCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            if let Some(breaker) = self.breaker {
                breaker.record_ignored();
            }
        }
    }
}

impl<R> TaskExecutor<R>
where
    R: Send + Sync + 'static,
{
    /// Wire an executor to an existing pool and cache
    ///
    /// Background loops (queue drain, memory cycle, metrics) start with
    /// [`start`](Self::start) or the first [`enqueue`](Self::enqueue).
    pub fn new(
        config: &EngineConfig,
        pool: Arc<ResourcePool<R>>,
        cache: Arc<TieredCache<TaskResult>>,
        events: EventPublisher,
    ) -> Self {
        let executor_config = config.executor.clone();
        let buffers = Arc::new(BufferPool::default());
        let memory = Arc::new(MemoryManager::new(
            config.memory_optimization.clone(),
            cache.clone(),
            buffers.clone(),
        ));
        let circuit_breaker = executor_config
            .circuit_breaker
            .enabled
            .then(|| CircuitBreaker::new("execution_backend", executor_config.circuit_breaker.clone()));
        let classifier: Arc<dyn ErrorClassifier> = Arc::new(StandardErrorClassifier::with_config(
            ErrorClassifierConfig::from(&executor_config.retry),
        ));
        let id = Uuid::new_v4();
        let (stop, _) = watch::channel(false);

        info!(
            executor_id = %id,
            concurrency = executor_config.concurrency,
            caching = executor_config.caching_enabled,
            max_attempts = executor_config.retry.max_attempts,
            circuit_breaker = circuit_breaker.is_some(),
            "⚙️ EXECUTOR: Task executor initialized"
        );

        Self {
            inner: Arc::new(ExecutorInner {
                id,
                admission: Semaphore::new(executor_config.concurrency.max(1)),
                history: BoundedHistory::new(executor_config.history_size),
                config: executor_config,
                memory_config: config.memory_optimization.clone(),
                monitoring: config.monitoring.clone(),
                pool,
                cache,
                events,
                classifier,
                circuit_breaker,
                in_flight: DashMap::new(),
                next_claim: AtomicU64::new(0),
                metrics: MetricsCollector::new(id),
                buffers,
                memory,
                queue: Mutex::new(VecDeque::new()),
                accepting: AtomicBool::new(true),
                activity: Arc::new(ActivityTracker::default()),
                started: AtomicBool::new(false),
                stop,
                background: Mutex::new(Vec::new()),
                shutdown: OnceCell::new(),
            }),
        }
    }

    /// Replace the error classifier; only effective before the executor is cloned
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.classifier = classifier,
            None => warn!("⚙️ EXECUTOR: Classifier not replaced, executor already shared"),
        }
        self
    }

    /// Replace the memory probe; only effective before the executor is cloned
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.memory = Arc::new(
                    MemoryManager::new(
                        inner.memory_config.clone(),
                        inner.cache.clone(),
                        inner.buffers.clone(),
                    )
                    .with_probe(probe),
                );
            }
            None => warn!("⚙️ EXECUTOR: Memory probe not replaced, executor already shared"),
        }
        self
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Start the background queue, memory cycle, metrics loop and cache sweeper
    ///
    /// Idempotent. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if !self.inner.accepting.load(Ordering::SeqCst)
            || self.inner.started.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let mut background = self.inner.background.lock();
        background.push(spawn_queue_loop(&self.inner, self.inner.stop.subscribe()));
        background.push(spawn_monitoring_loop(&self.inner, self.inner.stop.subscribe()));
        if let Some(handle) = self.inner.memory.spawn(self.inner.stop.subscribe()) {
            background.push(handle);
        }
        self.inner.cache.start_cleanup();

        info!(
            executor_id = %self.inner.id,
            batch_timeout_ms = self.inner.config.batch_timeout_ms,
            metrics_interval_ms = self.inner.monitoring.metrics_interval_ms,
            "⚙️ EXECUTOR: Background loops started"
        );
    }

    /// Execute one task
    ///
    /// Expected failures come back as a failed [`TaskResult`], never as a panic
    /// or an `Err`.
    pub async fn execute_task(&self, task: Task, backend: SharedBackend<R>) -> TaskResult {
        let submitted = Instant::now();
        self.inner.metrics.record_submitted();

        let _activity = self.inner.activity.enter();
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return self.inner.reject(&task, backend.name(), submitted);
        }
        self.inner.process(task, backend, submitted).await
    }

    /// Execute tasks concurrently; results follow input order
    pub async fn execute_batch(&self, tasks: Vec<Task>, backend: SharedBackend<R>) -> Vec<TaskResult> {
        join_all(
            tasks
                .into_iter()
                .map(|task| self.execute_task(task, Arc::clone(&backend))),
        )
        .await
    }

    /// Execute a large task list in sequential sub-batches of `batch_size`
    ///
    /// Each sub-batch runs concurrently. Results follow input order.
    pub async fn execute_optimized_batch(
        &self,
        tasks: Vec<Task>,
        backend: SharedBackend<R>,
    ) -> Vec<TaskResult> {
        let batch_size = self.inner.config.batch_size.max(1);
        let mut results = Vec::with_capacity(tasks.len());
        let mut remaining = tasks.into_iter().peekable();

        while remaining.peek().is_some() {
            let chunk: Vec<Task> = remaining.by_ref().take(batch_size).collect();
            let size = chunk.len();
            let started = Instant::now();
            results.extend(self.execute_batch(chunk, Arc::clone(&backend)).await);
            self.inner.metrics.record_batch(size, started.elapsed());
        }

        debug!(
            tasks = results.len(),
            tasks_per_second = self.inner.metrics.batch_efficiency(),
            "⚙️ EXECUTOR: Optimized batch complete"
        );
        results
    }

    /// Execute tasks concurrently, yielding results as they complete
    pub fn execute_stream(
        &self,
        tasks: Vec<Task>,
        backend: SharedBackend<R>,
    ) -> impl Stream<Item = TaskResult> + Send + 'static {
        tasks
            .into_iter()
            .map(|task| {
                let executor = self.clone();
                let backend = Arc::clone(&backend);
                async move { executor.execute_task(task, backend).await }
            })
            .collect::<FuturesUnordered<_>>()
    }

    /// Queue a task for the background batch loop
    ///
    /// The receiver resolves with the task's result. Starts the background
    /// loops if needed, so it must be called from within a Tokio runtime.
    pub fn enqueue(&self, task: Task, backend: SharedBackend<R>) -> oneshot::Receiver<TaskResult> {
        let (reply, receiver) = oneshot::channel();
        let submitted = Instant::now();
        self.inner.metrics.record_submitted();

        let rejected = {
            let mut queue = self.inner.queue.lock();
            if self.inner.accepting.load(Ordering::SeqCst) {
                queue.push_back(QueuedTask {
                    task,
                    backend,
                    reply,
                    submitted,
                });
                None
            } else {
                Some((task, backend, reply))
            }
        };

        match rejected {
            None => self.start(),
            Some((task, backend, reply)) => {
                let result = self.inner.reject(&task, backend.name(), submitted);
                let _ = reply.send(result);
            }
        }
        receiver
    }

    /// Resolves once no task is queued or executing
    pub async fn wait_for_pending_executions(&self) {
        self.inner.wait_idle().await;
    }

    /// Stop admitting tasks and release every resource
    ///
    /// Order: refuse new tasks, stop background loops, flush the background
    /// queue, wait for executing tasks, drain the pool, destroy the cache.
    /// Concurrent and repeated calls all resolve once shutdown has finished.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner
            .shutdown
            .get_or_init(|| async {
                info!(executor_id = %inner.id, "⚙️ EXECUTOR: Shutdown requested");
                inner.accepting.store(false, Ordering::SeqCst);
                inner.stop.send_replace(true);

                let handles = std::mem::take(&mut *inner.background.lock());
                for handle in handles {
                    match timeout(BACKGROUND_STOP_TIMEOUT, handle).await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => {
                            log_error("executor", "shutdown", &error.to_string(), Some("background loop"));
                            inner.events.publish(EngineEvent::Error {
                                component: "executor".to_string(),
                                message: format!("Background loop ended with error: {error}"),
                            });
                        }
                        Err(_) => {
                            warn!("⚙️ EXECUTOR: Background loop did not stop in time, leaving it to finish");
                        }
                    }
                }
                inner.cache.stop_cleanup();

                let mut flushed = 0;
                loop {
                    let drained = inner.drain_queue_once().await;
                    if drained == 0 {
                        break;
                    }
                    flushed += drained;
                }

                inner.wait_idle().await;
                inner.pool.drain().await;
                inner.cache.destroy();

                info!(
                    executor_id = %inner.id,
                    flushed,
                    completed = inner.metrics.completed(),
                    failed = inner.metrics.failed(),
                    "⚙️ EXECUTOR: Shutdown complete"
                );
            })
            .await;
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Tasks being processed; background-queue entries count once drained
    pub fn in_flight(&self) -> usize {
        self.inner.activity.active()
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        self.inner.snapshot()
    }

    pub fn history(&self) -> &BoundedHistory {
        &self.inner.history
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.circuit_breaker.as_ref()
    }

    pub fn memory_manager(&self) -> &MemoryManager {
        &self.inner.memory
    }

    pub fn pool(&self) -> &Arc<ResourcePool<R>> {
        &self.inner.pool
    }

    pub fn cache(&self) -> &Arc<TieredCache<TaskResult>> {
        &self.inner.cache
    }

    pub fn events(&self) -> &EventPublisher {
        &self.inner.events
    }
}

impl<R> ExecutorInner<R>
where
    R: Send + Sync + 'static,
{
    async fn process(&self, task: Task, backend: SharedBackend<R>, submitted: Instant) -> TaskResult {
        let deadline = task.constraints.timeout.map(|timeout| submitted + timeout);
        trace!(task_id = %task.id, kind = %task.kind, priority = ?task.priority, state = %TaskState::Submitted, "Task state");

        if !self.config.caching_enabled {
            return self.run(&task, &backend, None, submitted, deadline).await;
        }

        let fingerprint = self
            .buffers
            .with_buffer(|buffer| fingerprint_into(&task, buffer));

        loop {
            if let Some(cached) = self.cache.get(&fingerprint).await {
                return self.serve_shared(&task, &cached, ResultSource::Cache, submitted);
            }

            match self.claim(&fingerprint) {
                Claim::Leader(claim) => {
                    // A leader that finished between the miss and the claim has cached its result
                    if let Some(cached) = self.cache.get(&fingerprint).await {
                        drop(claim);
                        return self.serve_shared(&task, &cached, ResultSource::Cache, submitted);
                    }
                    let result = self
                        .run(&task, &backend, Some(&fingerprint), submitted, deadline)
                        .await;
                    claim.complete(&result);
                    return result;
                }
                Claim::Follower(mut receiver) => {
                    trace!(task_id = %task.id, fingerprint = %fingerprint, "Waiting on in-flight execution");
                    let shared = match deadline {
                        Some(deadline) => match timeout_at(deadline, receiver.recv()).await {
                            Ok(received) => received.ok(),
                            Err(_) => {
                                let failure = self.deadline_failure(&task, TaskState::Queued);
                                return self.fail_unexecuted(&task, backend.name(), &failure, submitted);
                            }
                        },
                        None => receiver.recv().await.ok(),
                    };

                    match shared {
                        Some(result) if !leader_specific(&result) => {
                            return self.serve_shared(&task, &result, ResultSource::Coalesced, submitted);
                        }
                        // Leader cancelled or hit its own deadline: try again ourselves
                        _ => continue,
                    }
                }
            }
        }
    }

    fn claim<'a>(&'a self, fingerprint: &'a str) -> Claim<'a> {
        match self.in_flight.entry(fingerprint.to_string()) {
            Entry::Occupied(entry) => Claim::Follower(entry.get().sender.subscribe()),
            Entry::Vacant(entry) => {
                let (sender, _) = broadcast::channel(1);
                let claim_id = self.next_claim.fetch_add(1, Ordering::Relaxed);
                entry.insert(InFlight {
                    claim_id,
                    sender: sender.clone(),
                });
                Claim::Leader(LeaderClaim {
                    in_flight: &self.in_flight,
                    fingerprint,
                    claim_id,
                    sender,
                })
            }
        }
    }

    /// Execute with retries until success, a permanent failure or the deadline
    async fn run(
        &self,
        task: &Task,
        backend: &SharedBackend<R>,
        fingerprint: Option<&str>,
        submitted: Instant,
        deadline: Option<Instant>,
    ) -> TaskResult {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let failure = match self.attempt(task, backend.as_ref(), deadline).await {
                Ok(response) => {
                    return self
                        .complete(task, backend.name(), response, fingerprint, submitted, attempt)
                        .await;
                }
                Err(failure) => failure,
            };

            let context = ErrorContext {
                task_id: task.id,
                kind: task.kind.clone(),
                executor: backend.name().to_string(),
                attempt_number: attempt,
                max_attempts,
                execution_duration: submitted.elapsed(),
            };
            let classification = self.classifier.classify(&failure, &context);

            // An open circuit fails fast; its retry_after travels with the result
            if classification.should_retry
                && classification.category != ErrorCategory::CircuitOpen
                && self.accepting.load(Ordering::SeqCst)
            {
                let delay = classification.retry_delay.unwrap_or_default();
                let fits = deadline.map_or(true, |deadline| Instant::now() + delay < deadline);
                if fits {
                    debug!(
                        task_id = %task.id,
                        attempt,
                        category = %classification.category,
                        delay_ms = delay.as_millis() as u64,
                        "⚙️ EXECUTOR: Retrying task"
                    );
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            return self.fail(task, backend.name(), classification, submitted, attempt, true);
        }
    }

    /// One pass through Queued, Borrowed and Running
    async fn attempt(
        &self,
        task: &Task,
        backend: &dyn ExecutionBackend<R>,
        deadline: Option<Instant>,
    ) -> Result<BackendResponse, ExecutionFailure> {
        let expired = |state| self.deadline_failure(task, state);
        let passed = |deadline: Option<Instant>| deadline.is_some_and(|at| Instant::now() >= at);

        trace!(task_id = %task.id, state = %TaskState::Queued, "Task state");
        let _permit = match deadline {
            Some(at) => timeout_at(at, self.admission.acquire())
                .await
                .map_err(|_| expired(TaskState::Queued))?,
            None => self.admission.acquire().await,
        }
        .map_err(|_| ExecutionFailure::ShuttingDown)?;

        if passed(deadline) {
            return Err(expired(TaskState::Queued));
        }

        let call = self.admit()?;

        let guard = match deadline {
            Some(at) => timeout_at(at, self.pool.acquire())
                .await
                .map_err(|_| expired(TaskState::Queued))?,
            None => self.pool.acquire().await,
        }
        .map_err(ExecutionFailure::Pool)?;

        trace!(task_id = %task.id, handle = guard.id(), state = %TaskState::Borrowed, "Task state");
        if passed(deadline) {
            return Err(expired(TaskState::Borrowed));
        }

        trace!(task_id = %task.id, state = %TaskState::Running, "Task state");
        let started = Instant::now();
        let invocation = backend.invoke(task, guard.handle());
        let outcome = match deadline {
            Some(at) => match timeout_at(at, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    call.failure(started.elapsed());
                    return Err(expired(TaskState::Running));
                }
            },
            None => invocation.await,
        };
        drop(guard);

        let elapsed = started.elapsed();
        match outcome {
            Ok(response) => {
                call.success(elapsed);
                Ok(response)
            }
            Err(error) => {
                if error.indicates_service_fault() {
                    call.failure(elapsed);
                }
                Err(ExecutionFailure::Backend(error))
            }
        }
    }

    fn admit(&self) -> Result<BreakerCall<'_>, ExecutionFailure> {
        if let Some(breaker) = &self.circuit_breaker {
            breaker
                .try_acquire()
                .map_err(|retry_after| ExecutionFailure::CircuitOpen { retry_after })?;
        }
        Ok(BreakerCall {
            breaker: self.circuit_breaker.as_ref(),
            settled: false,
        })
    }

    fn deadline_failure(&self, task: &Task, state: TaskState) -> ExecutionFailure {
        ExecutionFailure::DeadlineExceeded {
            state,
            timeout: task.constraints.timeout.unwrap_or_default(),
        }
    }

    async fn complete(
        &self,
        task: &Task,
        executor: &str,
        response: BackendResponse,
        fingerprint: Option<&str>,
        submitted: Instant,
        attempts: u32,
    ) -> TaskResult {
        let mut output = response.output;
        if let Some(max_output_size) = task.constraints.max_output_size {
            if truncate_output(&mut output, max_output_size) {
                debug!(task_id = %task.id, max_output_size, "⚙️ EXECUTOR: Output truncated");
            }
        }

        let execution_time = submitted.elapsed();
        let result = TaskResult::success(
            task.id,
            executor,
            output,
            response.usage,
            execution_time,
            attempts,
        );

        if let Some(fingerprint) = fingerprint {
            self.cache
                .set(
                    fingerprint,
                    result.clone(),
                    Some(self.config.cache_ttl()),
                    &task.cache_tags(),
                )
                .await;
        }

        self.history.push(ExecutionRecord::new(
            task.id,
            execution_time,
            ExecutionStatus::Success,
        ));
        self.metrics.record_completed(execution_time);
        self.check_slow(task, execution_time);
        self.events.publish(TaskEvent::Completed {
            task_id: task.id,
            kind: task.kind.clone(),
            execution_time,
            from_cache: false,
        });
        log_task_operation(
            "execute",
            Some(&task.id.to_string()),
            Some(&task.kind),
            "completed",
            Some(execution_time.as_millis() as u64),
            None,
        );
        self.memory.check_pressure();

        result
    }

    fn fail(
        &self,
        task: &Task,
        executor: &str,
        classification: ErrorClassification,
        submitted: Instant,
        attempts: u32,
        record_history: bool,
    ) -> TaskResult {
        let execution_time = submitted.elapsed();
        let category = classification.category;
        let error = TaskError::from(classification);

        if record_history {
            self.history.push(ExecutionRecord::new(
                task.id,
                execution_time,
                ExecutionStatus::Failed,
            ));
        }
        self.metrics.record_failed(category, execution_time);
        self.check_slow(task, execution_time);
        self.events.publish(TaskEvent::Failed {
            task_id: task.id,
            kind: task.kind.clone(),
            execution_time,
            category,
            retryable: error.retryable,
            message: error.message.clone(),
        });
        warn!(
            task_id = %task.id,
            kind = %task.kind,
            category = %category,
            code = error.code.as_deref().unwrap_or("none"),
            attempts,
            retryable = error.retryable,
            "⚙️ EXECUTOR: Task failed: {}",
            error.message
        );
        self.memory.check_pressure();

        TaskResult::failure(task.id, executor, error, execution_time, attempts)
    }

    /// Failure of a task that never reached the backend on its own behalf
    fn fail_unexecuted(
        &self,
        task: &Task,
        executor: &str,
        failure: &ExecutionFailure,
        submitted: Instant,
    ) -> TaskResult {
        let context = ErrorContext {
            task_id: task.id,
            kind: task.kind.clone(),
            executor: executor.to_string(),
            attempt_number: 1,
            max_attempts: 1,
            execution_duration: submitted.elapsed(),
        };
        let classification = self.classifier.classify(failure, &context);
        self.fail(task, executor, classification, submitted, 0, false)
    }

    fn reject(&self, task: &Task, executor: &str, submitted: Instant) -> TaskResult {
        self.metrics.record_rejected();
        self.fail_unexecuted(task, executor, &ExecutionFailure::ShuttingDown, submitted)
    }

    /// Hand a cached or coalesced result to `task`
    fn serve_shared(
        &self,
        task: &Task,
        shared: &TaskResult,
        source: ResultSource,
        submitted: Instant,
    ) -> TaskResult {
        let execution_time = submitted.elapsed();
        let result = shared.reissued(task.id, source, execution_time);

        match source {
            ResultSource::Cache => self.metrics.record_cache_hit(),
            _ => {
                self.metrics.record_coalesced();
                if result.success {
                    self.metrics.record_completed(execution_time);
                } else if let Some(error) = &result.error {
                    self.metrics.record_failed(error.error_type, execution_time);
                }
            }
        }

        match &result.error {
            None => self.events.publish(TaskEvent::Completed {
                task_id: task.id,
                kind: task.kind.clone(),
                execution_time,
                from_cache: source == ResultSource::Cache,
            }),
            Some(error) => self.events.publish(TaskEvent::Failed {
                task_id: task.id,
                kind: task.kind.clone(),
                execution_time,
                category: error.error_type,
                retryable: error.retryable,
                message: error.message.clone(),
            }),
        }

        debug!(
            task_id = %task.id,
            source = ?source,
            success = result.success,
            "⚙️ EXECUTOR: Served shared result"
        );
        result
    }

    fn check_slow(&self, task: &Task, execution_time: std::time::Duration) {
        let threshold = self.monitoring.slow_task_threshold();
        if execution_time > threshold {
            self.metrics.record_slow_task();
            warn!(
                task_id = %task.id,
                kind = %task.kind,
                execution_time_ms = execution_time.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "🐢 EXECUTOR: Slow task"
            );
        }
    }

    /// Pop up to `batch_size` queued tasks and run them concurrently
    async fn drain_queue_once(&self) -> usize {
        let batch: Vec<(QueuedTask<R>, ActivityGuard)> = {
            let mut queue = self.queue.lock();
            let take = self.config.batch_size.max(1).min(queue.len());
            queue
                .drain(..take)
                .map(|queued| (queued, self.activity.enter()))
                .collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        let started = Instant::now();
        join_all(batch.into_iter().map(|(queued, activity)| async move {
            let _activity = activity;
            let QueuedTask {
                task,
                backend,
                reply,
                submitted,
            } = queued;
            let result = self.process(task, backend, submitted).await;
            if reply.send(result).is_err() {
                trace!("Queued task receiver dropped before completion");
            }
        }))
        .await;

        self.metrics.record_batch(size, started.elapsed());
        debug!(tasks = size, "⚙️ EXECUTOR: Drained queued batch");
        size
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.activity.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let idle = {
                let queue = self.queue.lock();
                queue.is_empty() && self.activity.active() == 0
            };
            if idle {
                return;
            }
            notified.await;
        }
    }

    fn snapshot(&self) -> ExecutorMetrics {
        self.metrics.snapshot(ComponentSnapshot {
            in_flight: self.activity.active(),
            queued: self.queue.lock().len(),
            history_success_rate: self.history.success_rate(),
            history_average: self.history.average_duration(),
            circuit_breaker_state: self.circuit_breaker.as_ref().map(CircuitBreaker::state),
            pool: self.pool.stats(),
            cache: self.cache.get_cache_stats(),
            memory: self.memory.stats(),
        })
    }
}

/// Failures that belong to the leader's own constraints and must not be shared
fn leader_specific(result: &TaskResult) -> bool {
    result
        .error
        .as_ref()
        .is_some_and(|error| error.error_type == ErrorCategory::DeadlineExceeded)
}

fn spawn_queue_loop<R>(inner: &Arc<ExecutorInner<R>>, mut stop: watch::Receiver<bool>) -> JoinHandle<()>
where
    R: Send + Sync + 'static,
{
    let weak: Weak<ExecutorInner<R>> = Arc::downgrade(inner);
    let period = inner.config.batch_timeout();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.drain_queue_once().await;
        }
        debug!("⚙️ EXECUTOR: Queue loop stopped");
    })
}

fn spawn_monitoring_loop<R>(
    inner: &Arc<ExecutorInner<R>>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: Send + Sync + 'static,
{
    let weak: Weak<ExecutorInner<R>> = Arc::downgrade(inner);
    let period = inner.monitoring.metrics_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let metrics = inner.snapshot();
            info!(
                executor_id = %metrics.executor_id,
                completed = metrics.tasks_completed,
                failed = metrics.tasks_failed,
                cache_hits = metrics.cache_hits,
                in_flight = metrics.in_flight,
                pool_borrowed = metrics.pool.borrowed,
                "📊 EXECUTOR: Metrics"
            );
            inner.events.publish(EngineEvent::Metrics(Box::new(metrics)));
        }
        debug!("⚙️ EXECUTOR: Monitoring loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::backend::BackendError;
    use crate::pool::{PoolError, ResourceFactory};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct UnitFactory;

    #[async_trait]
    impl ResourceFactory<()> for UnitFactory {
        async fn create(&self) -> Result<(), PoolError> {
            Ok(())
        }
    }

    /// Echoes the instructions after `delay`, failing the first `failures` calls
    struct ScriptedBackend {
        delay: Duration,
        failures: usize,
        failure: BackendError,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn ok(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                failures: 0,
                failure: BackendError::other("unused"),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(failures: usize, failure: BackendError) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::ZERO,
                failures,
                failure,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionBackend<()> for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, task: &Task, _resource: Arc<()>) -> Result<BackendResponse, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                return Err(self.failure.clone());
            }
            Ok(BackendResponse::new(format!("done: {}", task.instructions)))
        }
    }

    async fn executor_with(config: EngineConfig) -> TaskExecutor<()> {
        let events = EventPublisher::default();
        let pool = Arc::new(ResourcePool::<()>::new(Arc::new(UnitFactory), config.pool.clone()).await.unwrap());
        let cache = Arc::new(TieredCache::new(&config, events.clone()));
        TaskExecutor::new(&config, pool, cache, events)
    }

    async fn test_executor() -> TaskExecutor<()> {
        executor_with(EngineConfig::for_test()).await
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::ZERO);

        let first = executor.execute_task(Task::new("echo", "a"), backend.clone()).await;
        let second = executor.execute_task(Task::new("echo", "a"), backend.clone()).await;

        assert!(first.success && second.success);
        assert_eq!(first.source, ResultSource::Executed);
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(second.output, first.output);
        assert_eq!(backend.calls(), 1);
        assert_eq!(executor.history().len(), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_are_coalesced() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::from_millis(50));

        let tasks = (0..5).map(|_| Task::new("echo", "same")).collect();
        let results = executor.execute_batch(tasks, backend.clone()).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(backend.calls(), 1);
        assert_eq!(
            results.iter().filter(|r| r.source == ResultSource::Coalesced).count(),
            4
        );
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_caching_disabled_always_invokes() {
        let mut config = EngineConfig::for_test();
        config.executor.caching_enabled = false;
        let executor = executor_with(config).await;
        let backend = ScriptedBackend::ok(Duration::ZERO);

        executor.execute_task(Task::new("echo", "a"), backend.clone()).await;
        executor.execute_task(Task::new("echo", "a"), backend.clone()).await;
        assert_eq!(backend.calls(), 2);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::failing(2, BackendError::network("ECONNRESET"));

        let result = executor.execute_task(Task::new("echo", "retry"), backend.clone()).await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(executor.metrics().retries, 2);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_client_fault_fails_without_retry() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::failing(usize::MAX, BackendError::http(400, "bad request"));

        let result = executor.execute_task(Task::new("echo", "bad"), backend.clone()).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.error_type, ErrorCategory::ClientFault);
        assert!(!error.recoverable && !error.retryable);
        assert_eq!(backend.calls(), 1);

        // Failures are not cached
        executor.execute_task(Task::new("echo", "bad"), backend.clone()).await;
        assert_eq!(backend.calls(), 2);
        assert_eq!(executor.history().success_rate(), 0.0);
        executor.shutdown().await;
    }

    struct OverLimitProbe;

    impl MemoryProbe for OverLimitProbe {
        fn current_usage(&self) -> Option<u64> {
            Some(u64::MAX)
        }
    }

    #[tokio::test]
    async fn test_failed_executions_still_sample_memory_pressure() {
        let mut config = EngineConfig::for_test();
        config.memory_optimization.enabled = true;
        config.memory_optimization.max_memory_usage_bytes = 1024;
        config.memory_optimization.pressure_sample_interval_ms = 0;
        let executor = executor_with(config)
            .await
            .with_memory_probe(Arc::new(OverLimitProbe));
        let backend = ScriptedBackend::failing(usize::MAX, BackendError::http(400, "bad request"));

        for i in 0..3 {
            let result = executor
                .execute_task(Task::new("echo", format!("bad {i}")), backend.clone())
                .await;
            assert!(!result.success);
        }

        assert_eq!(executor.memory_manager().stats().pressure_events, 3);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_deadline_while_running() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::from_millis(200));

        let task = Task::new("echo", "slow").with_timeout(Duration::from_millis(30));
        let result = executor.execute_task(task, backend.clone()).await;

        let error = result.error.unwrap();
        assert_eq!(error.error_type, ErrorCategory::DeadlineExceeded);
        assert_eq!(error.context["state"], "running");
        assert_eq!(executor.pool().stats().borrowed, 0);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let mut config = EngineConfig::for_test();
        config.executor.retry.max_attempts = 1;
        config.executor.circuit_breaker.failure_threshold = 2;
        config.executor.circuit_breaker.timeout_ms = 60_000;
        let executor = executor_with(config).await;
        let backend = ScriptedBackend::failing(usize::MAX, BackendError::http(503, "unavailable"));

        for i in 0..2 {
            let result = executor
                .execute_task(Task::new("echo", format!("n{i}")), backend.clone())
                .await;
            assert_eq!(result.error.unwrap().error_type, ErrorCategory::ServerFault);
        }

        let result = executor.execute_task(Task::new("echo", "n3"), backend.clone()).await;
        let error = result.error.unwrap();
        assert_eq!(error.error_type, ErrorCategory::CircuitOpen);
        assert!(error.retry_after.is_some());
        assert_eq!(backend.calls(), 2);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_optimized_batch_preserves_order() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::from_millis(1));

        let tasks: Vec<Task> = (0..25).map(|i| Task::new("echo", format!("t{i}"))).collect();
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let results = executor.execute_optimized_batch(tasks, backend).await;

        assert_eq!(results.iter().map(|r| r.task_id).collect::<Vec<_>>(), ids);
        let metrics = executor.metrics();
        assert_eq!(metrics.batches_completed, 3);
        assert!(metrics.batch_tasks_per_second > 0.0);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_yields_every_result() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::from_millis(1));

        let tasks: Vec<Task> = (0..6).map(|i| Task::new("echo", format!("s{i}"))).collect();
        let results: Vec<TaskResult> = executor.execute_stream(tasks, backend).collect().await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.success));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_resolves_through_background_loop() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::ZERO);

        let receivers: Vec<_> = (0..3)
            .map(|i| executor.enqueue(Task::new("echo", format!("q{i}")), backend.clone()))
            .collect();
        for receiver in receivers {
            assert!(receiver.await.unwrap().success);
        }
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work_and_is_idempotent() {
        let executor = test_executor().await;
        let backend = ScriptedBackend::ok(Duration::ZERO);

        executor.shutdown().await;
        executor.shutdown().await;
        assert!(!executor.is_accepting());
        assert!(executor.pool().is_draining());

        let result = executor.execute_task(Task::new("echo", "late"), backend.clone()).await;
        let error = result.error.unwrap();
        assert_eq!(error.error_type, ErrorCategory::ResourceExhaustion);
        assert!(!error.retryable);

        let queued = executor.enqueue(Task::new("echo", "late"), backend.clone());
        assert!(!queued.await.unwrap().success);
        assert_eq!(backend.calls(), 0);
        assert_eq!(executor.metrics().rejected, 2);
    }
}
