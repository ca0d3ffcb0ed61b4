//! API Module
//!
//! Binds the request pipeline to axum. Every request goes to a single
//! catch-all handler, which matches a location and runs its script.

pub mod handlers;
pub mod routes;

pub use handlers::{lws_handler, status_page, AppState, AxumHost, MAX_REDIRECTS};
pub use routes::create_router;
