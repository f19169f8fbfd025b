//! # Connection Pool
//!
//! Purpose: Lease a bounded set of stateful connections to many concurrent
//! callers, creating them lazily and reclaiming idle ones over time.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections; create only below capacity.
//! 2. **Single Writer**: Idle set, waiter queue and counters live behind one
//!    mutex that is never held across an `.await`.
//! 3. **Hard Ceiling**: `idle + leased + creating <= max_connections`; callers
//!    beyond it queue FIFO instead of failing.
//! 4. **RAII Leases**: Dropping a [`Lease`] returns or destroys its connection,
//!    so no error path can leak a capacity slot.
//!
//! ## Hand-off Protocol
//!
//! ```text
//! release(healthy) ──► first live waiter ── none ──► idle set
//! release(broken)  ──► destroy; slot ──► first live waiter (creates)
//! create failed    ──► error to the creator; slot ──► next waiter
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::error::ConnectionError;
use crate::manager::Manager;

/// Pool behavior, independent of what is being pooled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum total connections (idle + leased + creating).
    pub max_connections: usize,
    /// Idle connections older than this are evicted by the sweep.
    pub idle_timeout: Duration,
    /// Whether the background sweep runs at all.
    pub evict_idle: bool,
    /// Sweep period.
    pub reap_interval: Duration,
    /// Optional bound on how long a queued acquire waits.
    pub acquire_timeout: Option<Duration>,
}

impl From<&PoolConfig> for PoolOptions {
    fn from(config: &PoolConfig) -> Self {
        PoolOptions {
            max_connections: config.max_connections,
            idle_timeout: config.idle_timeout_duration(),
            evict_idle: config.evict_idle,
            reap_interval: config.reap_interval_duration(),
            acquire_timeout: config.acquire_timeout_duration(),
        }
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub max: usize,
    pub idle: usize,
    pub leased: usize,
    pub creating: usize,
    pub waiting: usize,
}

impl PoolStatus {
    /// Connections that count against capacity.
    pub fn total(&self) -> usize {
        self.idle + self.leased + self.creating
    }
}

struct Pooled<C> {
    conn: C,
    created_at: Instant,
    released_at: Instant,
}

enum Grant<C> {
    /// A ready connection; `leased` was already incremented for it.
    Conn(Pooled<C>),
    /// Permission to create one; `creating` was already incremented.
    Slot,
}

struct PoolState<C> {
    idle: VecDeque<Pooled<C>>,
    leased: usize,
    creating: usize,
    waiters: VecDeque<oneshot::Sender<Grant<C>>>,
    closed: bool,
}

impl<C> PoolState<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.leased + self.creating
    }
}

struct Shared<M: Manager> {
    id: String,
    manager: M,
    options: PoolOptions,
    state: Mutex<PoolState<M::Connection>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded pool of connections produced by a [`Manager`].
pub struct Pool<M: Manager> {
    shared: Arc<Shared<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Pool {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Manager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish()
    }
}

enum Step<C> {
    Ready(Pooled<C>),
    Create,
    Wait(oneshot::Receiver<Grant<C>>),
}

impl<M: Manager> Pool<M> {
    /// Builds an empty pool. Connections are created on demand.
    ///
    /// Must be called inside a Tokio runtime when idle eviction is enabled,
    /// since the sweep runs as a background task.
    pub fn new(
        id: impl Into<String>,
        manager: M,
        options: PoolOptions,
    ) -> Result<Self, ConnectionError> {
        if options.max_connections == 0 {
            return Err(ConnectionError::InvalidConfig(
                "max_connections must be positive".into(),
            ));
        }

        let shared = Arc::new(Shared {
            id: id.into(),
            manager,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(options.max_connections.min(64)),
                leased: 0,
                creating: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
            options,
            reaper: Mutex::new(None),
        });

        if shared.options.evict_idle {
            let handle = Handle::try_current().map_err(|_| {
                ConnectionError::InvalidConfig("idle eviction requires a Tokio runtime".into())
            })?;
            let reaper = spawn_reaper(&handle, &shared);
            *lock_ignoring_poison(&shared.reaper) = Some(reaper);
        }

        debug!(pool = %shared.id, max = shared.options.max_connections, "pool created");
        Ok(Pool { shared })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    /// Leases a connection, waiting in FIFO order when at capacity.
    ///
    /// A creation failure is returned to this caller only; the freed slot
    /// moves on to the next queued caller.
    pub async fn acquire(&self) -> Result<Lease<M>, ConnectionError> {
        let step = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(ConnectionError::PoolClosed);
            }
            if state.waiters.is_empty() {
                if let Some(pooled) = state.idle.pop_back() {
                    state.leased += 1;
                    Step::Ready(pooled)
                } else if state.total() < self.shared.options.max_connections {
                    state.creating += 1;
                    Step::Create
                } else {
                    Step::Wait(enqueue(&mut state))
                }
            } else {
                Step::Wait(enqueue(&mut state))
            }
        };

        match step {
            Step::Ready(pooled) => {
                trace!(pool = %self.shared.id, "reusing idle connection");
                Ok(Lease::new(&self.shared, pooled))
            }
            Step::Create => self.create_reserved().await,
            Step::Wait(rx) => self.wait_for_grant(rx).await,
        }
    }

    /// Returns a lease early. Equivalent to dropping it.
    pub fn release(&self, lease: Lease<M>) {
        drop(lease);
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            max: self.shared.options.max_connections,
            idle: state.idle.len(),
            leased: state.leased,
            creating: state.creating,
            waiting: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
        }
    }

    /// Destroys idle connections past the idle timeout. Returns how many.
    ///
    /// The background sweep calls this; it is public for callers that run
    /// with eviction disabled and want to sweep on their own schedule.
    pub async fn evict_expired(&self) -> usize {
        self.shared.evict_expired().await
    }

    /// Closes the pool: idle connections are destroyed, waiters fail with
    /// [`ConnectionError::PoolClosed`], leased connections are destroyed when
    /// released.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };
        // Dropping the senders wakes every waiter with a closed channel.
        drop(waiters);

        if let Some(reaper) = lock_ignoring_poison(&self.shared.reaper).take() {
            reaper.abort();
        }

        debug!(pool = %self.shared.id, idle = idle.len(), "closing pool");
        for pooled in idle {
            self.shared.manager.destroy(pooled.conn).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Runs the factory for a slot already counted in `creating`.
    async fn create_reserved(&self) -> Result<Lease<M>, ConnectionError> {
        let slot = CreatingSlot {
            shared: &self.shared,
            armed: true,
        };
        match self.shared.manager.create().await {
            Ok(conn) => {
                slot.disarm();
                let closed = {
                    let mut state = self.shared.lock();
                    state.creating -= 1;
                    if !state.closed {
                        state.leased += 1;
                    }
                    state.closed
                };
                if closed {
                    self.shared.manager.destroy(conn).await;
                    return Err(ConnectionError::PoolClosed);
                }
                debug!(pool = %self.shared.id, "connection created");
                let now = Instant::now();
                Ok(Lease::new(
                    &self.shared,
                    Pooled {
                        conn,
                        created_at: now,
                        released_at: now,
                    },
                ))
            }
            Err(err) => {
                warn!(pool = %self.shared.id, error = %err, "connection creation failed");
                drop(slot);
                Err(err)
            }
        }
    }

    async fn wait_for_grant(
        &self,
        rx: oneshot::Receiver<Grant<M::Connection>>,
    ) -> Result<Lease<M>, ConnectionError> {
        trace!(pool = %self.shared.id, "waiting for a connection");
        let mut waiter = Waiter {
            shared: &self.shared,
            rx,
            done: false,
        };

        let received = match self.shared.options.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut waiter.rx).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(pool = %self.shared.id, ?limit, "acquire timed out");
                    return Err(ConnectionError::AcquireTimeout(limit));
                }
            },
            None => (&mut waiter.rx).await,
        };
        waiter.done = true;

        match received {
            Ok(Grant::Conn(pooled)) => Ok(Lease::new(&self.shared, pooled)),
            Ok(Grant::Slot) => self.create_reserved().await,
            Err(_) => Err(ConnectionError::PoolClosed),
        }
    }
}

fn enqueue<C>(state: &mut PoolState<C>) -> oneshot::Receiver<Grant<C>> {
    let (tx, rx) = oneshot::channel();
    state.waiters.push_back(tx);
    rx
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: Manager> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        lock_ignoring_poison(&self.state)
    }

    /// Takes a connection back from a lease.
    fn release(self: &Arc<Self>, mut pooled: Pooled<M::Connection>, broken: bool) {
        let broken = broken || self.manager.has_broken(&pooled.conn);
        let doomed = {
            let mut state = self.lock();
            state.leased -= 1;
            if broken || state.closed {
                self.offer_slots(&mut state);
                Some(pooled)
            } else {
                pooled.released_at = Instant::now();
                self.hand_off(&mut state, pooled);
                None
            }
        };

        if let Some(pooled) = doomed {
            debug!(pool = %self.id, broken, "destroying released connection");
            self.destroy_detached(pooled.conn);
        }
    }

    /// Gives a healthy connection to the first live waiter, else idles it.
    fn hand_off(&self, state: &mut PoolState<M::Connection>, mut pooled: Pooled<M::Connection>) {
        while let Some(tx) = state.waiters.pop_front() {
            state.leased += 1;
            let Err(Grant::Conn(back)) = tx.send(Grant::Conn(pooled)) else {
                return;
            };
            // Waiter went away before we got to it.
            state.leased -= 1;
            pooled = back;
        }
        state.idle.push_back(pooled);
    }

    /// Lets queued callers create connections while capacity allows.
    fn offer_slots(&self, state: &mut PoolState<M::Connection>) {
        if state.closed {
            return;
        }
        while state.total() < self.options.max_connections {
            let Some(tx) = state.waiters.pop_front() else {
                break;
            };
            state.creating += 1;
            if tx.send(Grant::Slot).is_err() {
                state.creating -= 1;
            }
        }
    }

    fn free_creating(&self) {
        let mut state = self.lock();
        state.creating -= 1;
        self.offer_slots(&mut state);
    }

    fn destroy_detached(self: &Arc<Self>, conn: M::Connection) {
        match Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(self);
                handle.spawn(async move { shared.manager.destroy(conn).await });
            }
            // Outside a runtime the transport is simply dropped.
            Err(_) => drop(conn),
        }
    }

    async fn evict_expired(&self) -> usize {
        let expired: Vec<Pooled<M::Connection>> = {
            let mut state = self.lock();
            if state.closed || state.idle.is_empty() {
                return 0;
            }
            let timeout = self.options.idle_timeout;
            let (expired, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|pooled| pooled.released_at.elapsed() > timeout);
            state.idle = keep.into();
            if !expired.is_empty() {
                self.offer_slots(&mut state);
            }
            expired
        };

        let count = expired.len();
        for pooled in expired {
            debug!(
                pool = %self.id,
                age = ?pooled.created_at.elapsed(),
                "evicting idle connection"
            );
            self.manager.destroy(pooled.conn).await;
        }
        count
    }
}

impl<M: Manager> Drop for Shared<M> {
    fn drop(&mut self) {
        let reaper = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.abort();
        }
    }
}

fn spawn_reaper<M: Manager>(handle: &Handle, shared: &Arc<Shared<M>>) -> JoinHandle<()> {
    let weak: Weak<Shared<M>> = Arc::downgrade(shared);
    let period = shared.options.reap_interval;
    handle.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let evicted = shared.evict_expired().await;
            if evicted > 0 {
                trace!(pool = %shared.id, evicted, "idle sweep finished");
            }
        }
    })
}

/// Releases a `creating` slot unless creation succeeded.
struct CreatingSlot<'a, M: Manager> {
    shared: &'a Arc<Shared<M>>,
    armed: bool,
}

impl<M: Manager> CreatingSlot<'_, M> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<M: Manager> Drop for CreatingSlot<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.free_creating();
        }
    }
}

/// Queued acquire. If dropped before completion, anything already granted to
/// it goes back to the pool.
struct Waiter<'a, M: Manager> {
    shared: &'a Arc<Shared<M>>,
    rx: oneshot::Receiver<Grant<M::Connection>>,
    done: bool,
}

impl<M: Manager> Drop for Waiter<'_, M> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Grant::Conn(pooled)) => self.shared.release(pooled, false),
            Ok(Grant::Slot) => self.shared.free_creating(),
            Err(_) => {}
        }
        self.shared
            .lock()
            .waiters
            .retain(|tx| !tx.is_closed());
    }
}

/// A leased connection. Dropping it releases the connection to the pool.
pub struct Lease<M: Manager> {
    shared: Arc<Shared<M>>,
    pooled: Option<Pooled<M::Connection>>,
    broken: bool,
}

impl<M: Manager> Lease<M> {
    fn new(shared: &Arc<Shared<M>>, pooled: Pooled<M::Connection>) -> Self {
        Lease {
            shared: Arc::clone(shared),
            pooled: Some(pooled),
            broken: false,
        }
    }

    /// Prevents the connection from returning to the idle set.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn pool_id(&self) -> &str {
        &self.shared.id
    }

    /// When the underlying connection was created.
    pub fn created_at(&self) -> Option<Instant> {
        self.pooled.as_ref().map(|pooled| pooled.created_at)
    }
}

impl<M: Manager> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.shared.id)
            .field("broken", &self.broken)
            .field("created_at", &self.created_at())
            .finish()
    }
}

impl<M: Manager> Deref for Lease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.pooled.as_ref().expect("lease holds a connection until dropped").conn
    }
}

impl<M: Manager> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pooled.as_mut().expect("lease holds a connection until dropped").conn
    }
}

impl<M: Manager> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.shared.release(pooled, self.broken);
        }
    }
}
