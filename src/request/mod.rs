//! Request Module
//!
//! The per-request context and its input/output helpers.

mod body;
mod context;
mod headers;

pub use body::{BodyStream, RequestBody};
pub use context::{Redirect, RedirectKind, RequestContext};
pub use headers::{copy_request_headers, is_content_length, merge_header, WellKnownHeader};
