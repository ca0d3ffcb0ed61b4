//! Request Context Module
//!
//! Per-request aggregate threaded through the pipeline and handed to the
//! script engine on a worker thread.

use bytes::buf::Writer;
use bytes::{BufMut, Bytes, BytesMut};
use http::Method;
use tracing::debug;

use crate::engine::{Lease, RC_OK};
use crate::pipeline::Phase;
use crate::request::BodyStream;
use crate::table::{Table, TableConfig};

// == Redirect ==
/// Redirect target recorded by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub target: String,
    pub args: Option<String>,
}

/// Where a [`Redirect`] leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectKind {
    /// Absolute path, re-dispatched internally
    Internal { uri: String, args: Option<String> },
    /// Named location, without its leading marker
    Named(String),
}

impl Redirect {
    pub fn new(target: impl Into<String>, args: Option<String>) -> Self {
        Self {
            target: target.into(),
            args,
        }
    }

    pub fn kind(&self) -> RedirectKind {
        if self.target.starts_with('/') {
            RedirectKind::Internal {
                uri: self.target.clone(),
                args: self.args.clone(),
            }
        } else {
            let name = self.target.strip_prefix('@').unwrap_or(&self.target);
            RedirectKind::Named(name.to_string())
        }
    }
}

// == Request Context ==
/// Input and output of one request's script execution.
///
/// Owned by the pipeline except while a worker thread runs the script.
/// Dropping the context frees both header tables, closes the body stream,
/// frees the response buffer and releases a lease that is still held.
#[derive(Debug)]
pub struct RequestContext {
    pub id: u64,
    pub method: Method,
    /// Request path
    pub uri: String,
    pub args: Option<String>,
    /// Resolved target script path
    pub main: String,
    pub path_info: Option<String>,
    /// Case-insensitive, values shared with the caller
    pub request_headers: Table<Bytes>,
    pub request_body: Option<BodyStream>,
    /// Case-insensitive, values duplicated and freed by the table
    pub response_headers: Table<Bytes>,
    pub status: u16,
    pub response_body: Writer<BytesMut>,
    /// Engine instance leased for this request; `None` once released
    pub state: Option<Lease>,
    pub rc: i32,
    pub redirect: Option<Redirect>,
    phase: Phase,
}

impl RequestContext {
    // == Constructor ==
    pub fn new(id: u64, method: Method, uri: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            id,
            method,
            uri: uri.into(),
            args: None,
            main: main.into(),
            path_info: None,
            request_headers: Table::with_config(
                32,
                "request_headers",
                TableConfig::new().case_insensitive(true),
            ),
            request_body: None,
            response_headers: Table::with_config(
                8,
                "response_headers",
                TableConfig::new()
                    .dup(true)
                    .free_on_overwrite(true)
                    .case_insensitive(true),
            ),
            status: 200,
            response_body: BytesMut::new().writer(),
            state: None,
            rc: RC_OK,
            redirect: None,
            phase: Phase::Resolving,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    // == Advance ==
    pub fn advance(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }

    // == Run Script ==
    /// Runs the leased engine against this context and records its result code.
    ///
    /// Without a lease the request fails with an internal error.
    pub fn run_script(&mut self) -> i32 {
        let rc = match self.state.take() {
            Some(mut lease) => {
                let rc = lease.run(self);
                self.state = Some(lease);
                rc
            }
            None => 500,
        };
        self.rc = rc;
        rc
    }

    /// Takes the buffered response body, leaving an empty buffer behind.
    pub fn take_response_body(&mut self) -> Bytes {
        std::mem::replace(&mut self.response_body, BytesMut::new().writer())
            .into_inner()
            .freeze()
    }

    // == Finish ==
    /// Ends the request in `phase`, releasing everything the context owns.
    pub fn finish(mut self, phase: Phase) {
        self.advance(phase);
        if let Some(lease) = self.state.take() {
            lease.release();
        }
        let freed = self.response_headers.len();
        debug!(freed, "request context released");
    }
}
