//! State Pool Module
//!
//! Keeps idle engine instances per configuration identity and applies the
//! recycling policy when a request hands its instance back.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::{EngineConfig, EngineFactory, EngineInstance};
use crate::error::Result;
use crate::request::RequestContext;

// == Release Outcome ==
/// What the pool did with a released instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Returned to the idle list; `collected` if a GC step ran first
    Recycled { collected: bool },
    Destroyed(DestroyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    MaxRequests,
    MaxMemory,
}

// == Pool Stats ==
/// Snapshot of pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub recycled: u64,
    pub collected: u64,
    pub destroyed: u64,
    /// Idle instances across all identities
    pub idle: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    recycled: AtomicU64,
    collected: AtomicU64,
    destroyed: AtomicU64,
}

// == State Pool ==
/// Per-identity collections of idle engine instances.
///
/// An instance is either idle in the pool or owned by exactly one request.
/// Acquire and release run under one short critical section; engine
/// creation happens outside of it.
pub struct StatePool {
    factory: Arc<dyn EngineFactory>,
    idle: Mutex<HashMap<Arc<EngineConfig>, VecDeque<EngineInstance>>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl StatePool {
    // == Constructor ==
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            idle: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    // == Acquire ==
    /// Takes an idle instance for `identity`, creating one if none is idle.
    pub fn acquire(&self, identity: &Arc<EngineConfig>) -> Result<EngineInstance> {
        let reused = self
            .idle
            .lock()
            .get_mut(identity)
            .and_then(VecDeque::pop_front);
        if let Some(instance) = reused {
            debug!(instance = instance.id(), "reusing engine instance");
            return Ok(instance);
        }

        let engine = self.factory.create(identity)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        debug!(instance = id, main = %identity.main, "created engine instance");
        Ok(EngineInstance::new(id, Arc::clone(identity), engine))
    }

    // == Lease ==
    /// Acquires an instance wrapped in a guard that releases it on drop.
    pub fn lease(self: &Arc<Self>, identity: &Arc<EngineConfig>) -> Result<Lease> {
        let instance = self.acquire(identity)?;
        Ok(Lease {
            pool: Arc::clone(self),
            instance: Some(instance),
        })
    }

    // == Release ==
    /// Hands an instance back after a request.
    ///
    /// The served-request counter is incremented first. The instance is
    /// destroyed once it has served `max_requests` requests or uses more than
    /// `max_memory` bytes; otherwise it runs a collection step every `gc`
    /// requests and returns to the front of the idle list.
    pub fn release(&self, mut instance: EngineInstance) -> ReleaseOutcome {
        let limits = instance.identity().limits;
        let served = instance.record_request();
        let memory = instance.refresh_memory();

        let destroy = if limits.max_requests > 0 && served >= limits.max_requests {
            Some(DestroyReason::MaxRequests)
        } else if limits.max_memory > 0 && memory > limits.max_memory {
            Some(DestroyReason::MaxMemory)
        } else {
            None
        };

        if let Some(reason) = destroy {
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            info!(
                instance = instance.id(),
                requests = served,
                memory,
                ?reason,
                "closing engine instance"
            );
            return ReleaseOutcome::Destroyed(reason);
        }

        let collected = limits.gc > 0 && served % limits.gc == 0;
        if collected {
            instance.collect();
            self.counters.collected.fetch_add(1, Ordering::Relaxed);
            debug!(instance = instance.id(), "engine collection step");
        }

        self.counters.recycled.fetch_add(1, Ordering::Relaxed);
        let identity = Arc::clone(instance.identity());
        self.idle
            .lock()
            .entry(identity)
            .or_default()
            .push_front(instance);

        ReleaseOutcome::Recycled { collected }
    }

    // == Close All ==
    /// Destroys every idle instance of `identity`, returning how many were closed.
    ///
    /// Leased instances are untouched; they come back through `release`.
    pub fn close_all(&self, identity: &EngineConfig) -> usize {
        let drained = self.idle.lock().remove(identity);
        let count = drained.map_or(0, |instances| instances.len());
        if count > 0 {
            self.counters
                .destroyed
                .fetch_add(count as u64, Ordering::Relaxed);
            info!(count, main = %identity.main, "closed idle engine instances");
        }
        count
    }

    /// Number of idle instances for `identity`.
    pub fn idle_count(&self, identity: &EngineConfig) -> usize {
        self.idle.lock().get(identity).map_or(0, VecDeque::len)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            recycled: self.counters.recycled.load(Ordering::Relaxed),
            collected: self.counters.collected.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            idle: self.idle.lock().values().map(VecDeque::len).sum(),
        }
    }
}

impl std::fmt::Debug for StatePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePool")
            .field("stats", &self.stats())
            .finish()
    }
}

// == Lease ==
/// Exclusive use of one engine instance by one request.
///
/// Dropping a lease releases the instance, so an instance is never lost
/// when a request is abandoned or a worker task unwinds.
#[derive(Debug)]
pub struct Lease {
    pool: Arc<StatePool>,
    instance: Option<EngineInstance>,
}

impl Lease {
    /// Executes the request's scripts on the leased instance.
    pub fn run(&mut self, ctx: &mut RequestContext) -> i32 {
        match self.instance.as_mut() {
            Some(instance) => instance.run(ctx),
            None => 500,
        }
    }

    pub fn instance(&self) -> Option<&EngineInstance> {
        self.instance.as_ref()
    }

    /// Returns the instance to the pool now.
    pub fn release(mut self) -> Option<ReleaseOutcome> {
        self.instance
            .take()
            .map(|instance| self.pool.release(instance))
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            debug!(instance = instance.id(), "releasing engine instance from dropped lease");
            self.pool.release(instance);
        }
    }
}
