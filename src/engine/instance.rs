//! Engine Instance Module
//!
//! A single reusable engine with its usage counters.

use std::fmt;
use std::sync::Arc;

use crate::engine::{EngineConfig, ScriptEngine};
use crate::request::RequestContext;

// == Engine Instance ==
/// One engine bound to a configuration identity.
///
/// Owned by the [`StatePool`](crate::engine::StatePool) while idle and moved
/// into exactly one request while leased.
pub struct EngineInstance {
    id: u64,
    identity: Arc<EngineConfig>,
    engine: Box<dyn ScriptEngine>,
    /// Memory reported by the engine at the last release
    memory: usize,
    /// Requests served so far
    requests: u64,
    /// Collection steps triggered so far
    collections: u64,
}

impl EngineInstance {
    pub fn new(id: u64, identity: Arc<EngineConfig>, engine: Box<dyn ScriptEngine>) -> Self {
        Self {
            id,
            identity,
            engine,
            memory: 0,
            requests: 0,
            collections: 0,
        }
    }

    /// Executes the request's scripts, returning the engine's result code.
    pub fn run(&mut self, ctx: &mut RequestContext) -> i32 {
        self.engine.run(ctx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &Arc<EngineConfig> {
        &self.identity
    }

    pub fn memory(&self) -> usize {
        self.memory
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// Counts a served request and returns the new total.
    pub(crate) fn record_request(&mut self) -> u64 {
        self.requests += 1;
        self.requests
    }

    /// Samples the engine's memory usage.
    pub(crate) fn refresh_memory(&mut self) -> usize {
        self.memory = self.engine.memory_used();
        self.memory
    }

    pub(crate) fn collect(&mut self) {
        self.engine.collect_step();
        self.collections += 1;
    }
}

impl fmt::Debug for EngineInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInstance")
            .field("id", &self.id)
            .field("main", &self.identity.main)
            .field("memory", &self.memory)
            .field("requests", &self.requests)
            .field("collections", &self.collections)
            .finish()
    }
}
