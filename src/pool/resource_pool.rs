use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{PoolError, ResourceFactory};
use crate::config::PoolConfig;
use crate::constants::pool::GROW_AFTER_PRESSURED_TICKS;
use crate::logging::log_pool_operation;

/// Point-in-time view of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub min: usize,
    pub max: usize,
    /// Idle plus borrowed handles
    pub live: usize,
    pub idle: usize,
    /// Borrows in progress, including ones still opening their handle
    pub borrowed: usize,
    pub peak_borrowed: usize,
    /// Callers queued for a permit
    pub waiting: usize,
    pub created: u64,
    pub destroyed: u64,
    pub creation_failures: u64,
    pub total_borrows: u64,
}

struct IdleResource<R> {
    id: u64,
    resource: Arc<R>,
    idle_since: Instant,
}

struct PoolInner<R>
where
    R: Send + Sync + 'static,
{
    factory: Arc<dyn ResourceFactory<R>>,
    config: PoolConfig,
    /// One permit per handle that may be borrowed at once; FIFO for waiters
    permits: Arc<Semaphore>,
    /// Most recently returned handle at the back
    idle: Mutex<VecDeque<IdleResource<R>>>,
    live: AtomicUsize,
    borrowed: AtomicUsize,
    peak_borrowed: AtomicUsize,
    waiting: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    creation_failures: AtomicU64,
    total_borrows: AtomicU64,
    next_id: AtomicU64,
    draining: AtomicBool,
    released: Notify,
    pressured_ticks: AtomicU32,
}

/// Bounded pool of reusable handles to a scarce external resource
///
/// At most `max` handles are borrowed at once; further callers queue in FIFO
/// order. A borrowed handle is returned when its [`PoolGuard`] drops, which
/// covers normal completion, errors, panics and cancelled futures alike.
///
/// With `adaptive_resize` a maintenance task pre-opens idle handles while
/// demand stays saturated and closes handles idle for longer than
/// `idle_timeout` back down to `min`.
pub struct ResourcePool<R>
where
    R: Send + Sync + 'static,
{
    inner: Arc<PoolInner<R>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<R> std::fmt::Debug for ResourcePool<R>
where
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("stats", &self.stats())
            .field("draining", &self.is_draining())
            .finish()
    }
}

impl<R> ResourcePool<R>
where
    R: Send + Sync + 'static,
{
    /// Create a pool and open `min` handles up front
    pub async fn new(
        factory: Arc<dyn ResourceFactory<R>>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        info!(
            "🏊 POOL: Creating resource pool (min: {}, max: {}, adaptive: {})",
            config.min, config.max, config.adaptive_resize
        );

        let inner = Arc::new(PoolInner {
            factory,
            permits: Arc::new(Semaphore::new(config.max)),
            idle: Mutex::new(VecDeque::with_capacity(config.max)),
            live: AtomicUsize::new(0),
            borrowed: AtomicUsize::new(0),
            peak_borrowed: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            creation_failures: AtomicU64::new(0),
            total_borrows: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            draining: AtomicBool::new(false),
            released: Notify::new(),
            pressured_ticks: AtomicU32::new(0),
            config,
        });

        for _ in 0..inner.config.min {
            let (id, resource) = inner.open().await?;
            inner.push_idle(id, resource);
        }

        let maintenance = inner
            .config
            .adaptive_resize
            .then(|| PoolInner::spawn_maintenance(&inner));

        info!(
            "✅ POOL: Resource pool ready with {} handles",
            inner.live.load(Ordering::SeqCst)
        );

        Ok(Self {
            inner,
            maintenance: Mutex::new(maintenance),
        })
    }

    /// Borrow a handle, waiting in FIFO order if all `max` are in use
    pub async fn acquire(&self) -> Result<PoolGuard<R>, PoolError> {
        self.inner.acquire().await
    }

    /// Borrow a handle, run `operation` with it and return the handle
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, PoolError>
    where
        F: FnOnce(Arc<R>) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        let output = operation(guard.handle()).await;
        drop(guard);
        Ok(output)
    }

    /// Stop lending, wait for every borrowed handle and close all handles
    ///
    /// Queued and future callers fail with [`PoolError::Draining`]. Safe to
    /// call more than once.
    pub async fn drain(&self) {
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let stats = self.stats();
            log_pool_operation(
                "drain",
                stats.live,
                stats.borrowed,
                stats.idle,
                "started",
                None,
            );
        }

        let maintenance = self.maintenance.lock().take();
        if let Some(handle) = maintenance {
            handle.abort();
            let _ = handle.await;
        }

        self.inner.permits.close();

        loop {
            let released = self.inner.released.notified();
            if self.inner.borrowed.load(Ordering::SeqCst) == 0 {
                break;
            }
            released.await;
        }

        let idle: Vec<IdleResource<R>> = self.inner.idle.lock().drain(..).collect();
        for handle in idle {
            self.inner.retire(handle.id, handle.resource).await;
        }

        let stats = self.stats();
        log_pool_operation(
            "drain",
            stats.live,
            stats.borrowed,
            stats.idle,
            "completed",
            None,
        );
    }

    /// Run one adaptive-resize cycle
    ///
    /// The maintenance task calls this every `resize_interval`.
    pub async fn run_maintenance(&self) {
        self.inner.maintain().await;
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            min: inner.config.min,
            max: inner.config.max,
            live: inner.live.load(Ordering::SeqCst),
            idle: inner.idle.lock().len(),
            borrowed: inner.borrowed.load(Ordering::SeqCst),
            peak_borrowed: inner.peak_borrowed.load(Ordering::SeqCst),
            waiting: inner.waiting.load(Ordering::SeqCst),
            created: inner.created.load(Ordering::Relaxed),
            destroyed: inner.destroyed.load(Ordering::Relaxed),
            creation_failures: inner.creation_failures.load(Ordering::Relaxed),
            total_borrows: inner.total_borrows.load(Ordering::Relaxed),
        }
    }
}

impl<R> Drop for ResourcePool<R>
where
    R: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.abort();
        }
    }
}

impl<R> PoolInner<R>
where
    R: Send + Sync + 'static,
{
    async fn acquire(self: &Arc<Self>) -> Result<PoolGuard<R>, PoolError> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(PoolError::Draining);
        }

        let permit = self.acquire_permit().await?;
        let slot = BorrowSlot::new(Arc::clone(self), permit);

        // A drain that started while we queued must see either our slot or
        // the flag; both are SeqCst.
        if self.draining.load(Ordering::SeqCst) {
            return Err(PoolError::Draining);
        }

        let (id, resource) = match self.take_idle().await {
            Some(found) => found,
            None => self.open().await?,
        };
        self.total_borrows.fetch_add(1, Ordering::Relaxed);

        debug!(resource_id = id, "🏊 POOL: Handle borrowed");
        Ok(PoolGuard {
            resource: Some(resource),
            id,
            slot,
        })
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(PoolError::Draining),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = WaitingGuard::new(&self.waiting);
        let wait = Arc::clone(&self.permits).acquire_owned();

        match self.config.acquire_timeout() {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result.map_err(|_| PoolError::Draining),
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "⏰ POOL: Acquire timed out");
                    Err(PoolError::AcquireTimeout(limit))
                }
            },
            None => wait.await.map_err(|_| PoolError::Draining),
        }
    }

    async fn take_idle(&self) -> Option<(u64, Arc<R>)> {
        loop {
            let candidate = self.idle.lock().pop_back()?;
            if self.factory.is_valid(&candidate.resource) {
                return Some((candidate.id, candidate.resource));
            }
            warn!(resource_id = candidate.id, "⚠️ POOL: Discarding invalid idle handle");
            self.retire(candidate.id, candidate.resource).await;
        }
    }

    async fn open(&self) -> Result<(u64, Arc<R>), PoolError> {
        match self.factory.create().await {
            Ok(resource) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.live.fetch_add(1, Ordering::SeqCst);
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!(resource_id = id, "🏊 POOL: Handle created");
                Ok((id, Arc::new(resource)))
            }
            Err(error) => {
                self.creation_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %error, "❌ POOL: Handle creation failed");
                Err(error)
            }
        }
    }

    async fn retire(&self, id: u64, resource: Arc<R>) {
        self.factory.destroy(&resource).await;
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(resource_id = id, "🏊 POOL: Handle closed");
    }

    fn push_idle(&self, id: u64, resource: Arc<R>) {
        self.idle.lock().push_back(IdleResource {
            id,
            resource,
            idle_since: Instant::now(),
        });
    }

    fn give_back(&self, id: u64, resource: Arc<R>) {
        if Arc::strong_count(&resource) > 1 {
            // Still referenced by the borrower; it can no longer be lent out exclusively
            warn!(resource_id = id, "⚠️ POOL: Handle outlived its borrow, discarding");
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let factory = Arc::clone(&self.factory);
                    runtime.spawn(async move {
                        factory.destroy(&resource).await;
                        debug!(resource_id = id, "🏊 POOL: Discarded handle closed");
                    });
                }
                Err(_) => {
                    warn!(resource_id = id, "⚠️ POOL: No runtime to close discarded handle");
                }
            }
            return;
        }
        self.push_idle(id, resource);
        debug!(resource_id = id, "🏊 POOL: Handle returned");
    }

    async fn maintain(&self) {
        if self.draining.load(Ordering::SeqCst) {
            return;
        }

        let idle = self.idle.lock().len();
        let borrowed = self.borrowed.load(Ordering::SeqCst);
        let waiting = self.waiting.load(Ordering::SeqCst);
        let saturated = waiting > 0 || (idle == 0 && borrowed > 0);

        if saturated {
            let ticks = self.pressured_ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if ticks >= GROW_AFTER_PRESSURED_TICKS {
                self.prewarm().await;
            }
        } else {
            self.pressured_ticks.store(0, Ordering::SeqCst);
            self.shrink_idle().await;
        }
    }

    /// Open one extra idle handle if below `max`
    async fn prewarm(&self) -> bool {
        // Holding a permit keeps live handles within max while we open one
        let Ok(_permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return false;
        };
        if self.live.load(Ordering::SeqCst) >= self.config.max {
            return false;
        }

        match self.open().await {
            Ok((id, resource)) => {
                if self.draining.load(Ordering::SeqCst) {
                    self.retire(id, resource).await;
                    return false;
                }
                self.push_idle(id, resource);
                info!(
                    live = self.live.load(Ordering::SeqCst),
                    max = self.config.max,
                    "📈 POOL: Pre-warmed handle under sustained demand"
                );
                true
            }
            Err(_) => false,
        }
    }

    /// Close handles idle longer than `idle_timeout`, keeping at least `min`
    async fn shrink_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let expired: Vec<IdleResource<R>> = {
            let mut idle = self.idle.lock();
            let mut expired = Vec::new();
            while self.live.load(Ordering::SeqCst).saturating_sub(expired.len()) > self.config.min {
                match idle.front() {
                    Some(oldest) if oldest.idle_since.elapsed() >= idle_timeout => {
                        expired.extend(idle.pop_front());
                    }
                    _ => break,
                }
            }
            expired
        };

        let closed = expired.len();
        for handle in expired {
            self.retire(handle.id, handle.resource).await;
        }
        if closed > 0 {
            info!(
                closed,
                live = self.live.load(Ordering::SeqCst),
                min = self.config.min,
                "📉 POOL: Closed idle handles"
            );
        }
        closed
    }

    fn spawn_maintenance(inner: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(inner);
        let interval = inner.config.resize_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.draining.load(Ordering::SeqCst) {
                    break;
                }
                inner.maintain().await;
            }
            debug!("Pool maintenance loop stopped");
        })
    }
}

/// Counts a caller as waiting until the guard drops
struct WaitingGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    fn new(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self { waiting }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A held permit, counted as borrowed from the moment it is granted
struct BorrowSlot<R>
where
    R: Send + Sync + 'static,
{
    pool: Arc<PoolInner<R>>,
    _permit: OwnedSemaphorePermit,
}

impl<R> BorrowSlot<R>
where
    R: Send + Sync + 'static,
{
    fn new(pool: Arc<PoolInner<R>>, permit: OwnedSemaphorePermit) -> Self {
        let borrowed = pool.borrowed.fetch_add(1, Ordering::SeqCst) + 1;
        pool.peak_borrowed.fetch_max(borrowed, Ordering::SeqCst);
        Self {
            pool,
            _permit: permit,
        }
    }
}

impl<R> Drop for BorrowSlot<R>
where
    R: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.pool.borrowed.fetch_sub(1, Ordering::SeqCst);
        self.pool.released.notify_waiters();
    }
}

/// Exclusive borrow of one pooled handle
///
/// Dereferences to the handle. Dropping the guard returns the handle to the
/// idle set and frees the caller's place in the pool.
pub struct PoolGuard<R>
where
    R: Send + Sync + 'static,
{
    resource: Option<Arc<R>>,
    id: u64,
    slot: BorrowSlot<R>,
}

impl<R> PoolGuard<R>
where
    R: Send + Sync + 'static,
{
    /// Pool-assigned identity of the borrowed handle
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shared reference to the handle for the duration of the borrow
    ///
    /// Clones must be dropped before the guard; a handle still referenced
    /// when its guard drops is discarded instead of being reused.
    pub fn handle(&self) -> Arc<R> {
        match &self.resource {
            Some(resource) => Arc::clone(resource),
            None => unreachable!("pool guard resource is only taken on drop"),
        }
    }
}

impl<R> Deref for PoolGuard<R>
where
    R: Send + Sync + 'static,
{
    type Target = R;

    fn deref(&self) -> &R {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pool guard resource is only taken on drop"),
        }
    }
}

impl<R> Drop for PoolGuard<R>
where
    R: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.slot.pool.give_back(self.id, resource);
        }
    }
}

impl<R> std::fmt::Debug for PoolGuard<R>
where
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard").field("id", &self.id).finish()
    }
}
