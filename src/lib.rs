//! LWS - Lua web-script execution core
//!
//! Runs Lua scripts inside an HTTP server: a request-scoped header table,
//! a pool of reusable engine instances and the pipeline that executes a
//! script off the event loop and turns its output into a response.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod location;
pub mod pipeline;
pub mod request;
pub mod stat;
pub mod table;
pub mod tasks;
pub mod worker;

pub use api::AppState;
pub use config::Config;
pub use tasks::spawn_cleanup_task;
