//! Engine Module
//!
//! Reusable script-engine instances and the pool that leases them to requests.
//!
//! An [`EngineInstance`] wraps one [`ScriptEngine`] created for a
//! configuration identity ([`EngineConfig`]). The [`StatePool`] keeps idle
//! instances per identity and decides on release whether an instance is
//! recycled, collected or destroyed according to its [`EngineLimits`].

mod instance;
mod lua;
mod pool;

use std::path::PathBuf;

use crate::error::EngineError;
use crate::request::RequestContext;

pub use instance::EngineInstance;
pub use lua::{LuaEngine, LuaEngineFactory};
pub use pool::{DestroyReason, Lease, PoolStats, ReleaseOutcome, StatePool};

/// Result code reported by an engine run that completed normally.
pub const RC_OK: i32 = 0;

// == Script Engine ==
/// One embedded interpreter state.
///
/// `run` executes the request's target script against the context and
/// returns a result code: [`RC_OK`] on success, a protocol status in
/// `100..600`, or anything else for an internal error.
pub trait ScriptEngine: Send {
    fn run(&mut self, ctx: &mut RequestContext) -> i32;

    /// Bytes currently allocated by the interpreter.
    fn memory_used(&self) -> usize;

    /// Runs one incremental garbage-collection step.
    fn collect_step(&mut self);
}

// == Engine Factory ==
/// Builds engines for a configuration identity.
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn ScriptEngine>, EngineError>;
}

// == Engine Limits ==
/// Recycling thresholds of a location; zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EngineLimits {
    /// Destroy the instance once it uses more than this many bytes
    pub max_memory: usize,
    /// Destroy the instance after serving this many requests
    pub max_requests: u64,
    /// Run a collection step every `gc` requests
    pub gc: u64,
}

// == Engine Config ==
/// Configuration identity: instances created for equal configs are interchangeable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EngineConfig {
    /// Source text of the target-script expression
    pub main: String,
    pub init: Option<PathBuf>,
    pub pre: Option<PathBuf>,
    pub post: Option<PathBuf>,
    /// Script search path
    pub path: String,
    /// Native module search path
    pub cpath: String,
    pub limits: EngineLimits,
}
