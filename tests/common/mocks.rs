use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasklane::execution::{BackendError, BackendResponse, ExecutionBackend, ResourceUsage, Task};
use tasklane::pool::{PoolError, ResourceFactory};

/// Pooled handle handed out by [`CountingFactory`]
#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
}

/// Resource factory that counts the handles it opens
#[derive(Debug, Default)]
pub struct CountingFactory {
    created: AtomicUsize,
}

impl CountingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFactory<MockConnection> for CountingFactory {
    async fn create(&self) -> Result<MockConnection, PoolError> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { id })
    }
}

/// Execution backend with scripted failures, a fixed latency and call counters
///
/// Scripted failures are consumed in order; once exhausted every call succeeds
/// with `"<kind>: <instructions>"`.
pub struct MockBackend {
    name: String,
    delay: Duration,
    failures: Mutex<VecDeque<BackendError>>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    finished: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            name: "mock-backend".to_string(),
            delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_with<I>(self, failures: I) -> Self
    where
        I: IntoIterator<Item = BackendError>,
    {
        self.failures.lock().extend(failures);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct RunningGuard<'a>(&'a MockBackend);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
        self.0.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionBackend<MockConnection> for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        task: &Task,
        _connection: Arc<MockConnection>,
    ) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        let _guard = RunningGuard(self);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(failure);
        }
        Ok(
            BackendResponse::new(format!("{}: {}", task.kind, task.instructions))
                .with_usage(ResourceUsage::new(task.instructions.len() as u64, 1)),
        )
    }
}
