//! Request Execution Pipeline
//!
//! Drives one request through resolution, body ingestion, worker dispatch
//! and response assembly:
//!
//! `Resolving -> BodyPending -> Dispatched -> Completing -> Finalized`,
//! with `Error` reachable from the first four phases.
//!
//! The pipeline talks to the server through the [`Host`] trait and reports
//! how the request ends through [`Finalize`].

mod response;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::engine::{StatePool, RC_OK};
use crate::error::OutputError;
use crate::expr::{Expression, Variables};
use crate::location::LocationMatch;
use crate::request::{
    copy_request_headers, is_content_length, BodyStream, RedirectKind, RequestBody, RequestContext,
};
use crate::stat::{file_status, FileStatus, StatCache};
use crate::table::Table;
use crate::worker::WorkerPool;

pub use response::{map_result_code, shape, Correction, ResponseHead, Shape};

// == Phase ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    BodyPending,
    Dispatched,
    Completing,
    Finalized,
    Error,
}

// == Finalize ==
/// How the host must finish a request after [`Pipeline::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalize {
    /// Script handling is not configured for this location
    Declined,
    /// Finish with a status response; nothing was sent
    Status(StatusCode),
    /// Header (and body, if any) were handed to the output primitives
    Done,
    /// Re-dispatch the request to `uri` with `args`
    InternalRedirect { uri: String, args: Option<String> },
    /// Re-dispatch the request to a named location
    NamedLocation(String),
}

// == Host ==
/// Server-side primitives the pipeline consumes.
#[async_trait]
pub trait Host: Send {
    fn method(&self) -> &Method;

    /// Current path, after any internal redirect
    fn uri(&self) -> &str;

    fn args(&self) -> Option<&str>;

    /// Path and query as the client sent them
    fn request_uri(&self) -> &str;

    fn headers(&self) -> &HeaderMap;

    /// Materializes the request body, in memory or spooled to a file.
    async fn read_body(&mut self) -> io::Result<RequestBody>;

    fn headers_out(&mut self) -> &mut ResponseHead;

    fn send_header(&mut self) -> Result<(), OutputError>;

    /// Queues `body`; `last` marks the final buffer of the response.
    fn send_body(&mut self, body: Bytes, last: bool) -> Result<(), OutputError>;
}

// == Pipeline ==
/// Shared state of the request pipeline: state pool, workers and stat cache.
#[derive(Debug)]
pub struct Pipeline {
    pool: Arc<StatePool>,
    workers: Arc<WorkerPool>,
    stat_cache: Option<Arc<StatCache>>,
    document_root: String,
    next_id: AtomicU64,
}

impl Pipeline {
    pub fn new(
        pool: Arc<StatePool>,
        workers: Arc<WorkerPool>,
        stat_cache: Option<Arc<StatCache>>,
        document_root: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            workers,
            stat_cache,
            document_root: document_root.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn pool(&self) -> &Arc<StatePool> {
        &self.pool
    }

    pub fn stat_cache(&self) -> Option<&Arc<StatCache>> {
        self.stat_cache.as_ref()
    }

    // == Handle ==
    /// Runs the script configured for `matched` and assembles its response.
    pub async fn handle<H: Host>(&self, matched: &LocationMatch, host: &mut H) -> Finalize {
        let Some(main) = matched.location.main.as_ref() else {
            return Finalize::Declined;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("lws", id);
        self.execute(id, main, matched, host).instrument(span).await
    }

    async fn execute<H: Host>(
        &self,
        id: u64,
        main: &Expression,
        matched: &LocationMatch,
        host: &mut H,
    ) -> Finalize {
        // Resolving
        let mut ctx = self.resolve(id, main, matched, host);
        debug!(main = %ctx.main, uri = %ctx.uri, "resolved target script");

        if file_status(self.stat_cache.as_deref(), &ctx.main).await == FileStatus::NotFound {
            info!(main = %ctx.main, "script not found");
            ctx.finish(Phase::Error);
            return Finalize::Status(StatusCode::NOT_FOUND);
        }

        if let Err(err) = copy_request_headers(&mut ctx.request_headers, host.headers()) {
            error!(error = %err, "failed to copy request headers");
            ctx.finish(Phase::Error);
            return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
        }

        ctx.advance(Phase::BodyPending);
        match host.read_body().await {
            Ok(body) => ctx.request_body = Some(BodyStream::new(body)),
            Err(err) => {
                error!(error = %err, "failed to read request body");
                ctx.finish(Phase::Error);
                return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        match self.pool.lease(&matched.location.engine) {
            Ok(lease) => ctx.state = Some(lease),
            Err(err) => {
                error!(error = %err, "failed to acquire engine instance");
                ctx.finish(Phase::Error);
                return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        ctx.advance(Phase::Dispatched);
        let span = Span::current();
        let completion = self.workers.spawn(move || {
            span.in_scope(|| {
                let rc = ctx.run_script();
                debug!(rc, "script finished");
            });
            ctx
        });

        // A context lost on the way drops its lease, which returns the instance
        let ctx = match completion {
            Ok(receiver) => match receiver.await {
                Ok(ctx) => ctx,
                Err(_) => {
                    error!("script execution aborted");
                    return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
                }
            },
            Err(err) => {
                error!(error = %err, "failed to dispatch script execution");
                return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        self.complete(ctx, host)
    }

    fn resolve<H: Host>(
        &self,
        id: u64,
        main: &Expression,
        matched: &LocationMatch,
        host: &H,
    ) -> RequestContext {
        let vars = Variables {
            uri: host.uri(),
            args: host.args(),
            request_uri: host.request_uri(),
            method: host.method(),
            headers: host.headers(),
            document_root: &self.document_root,
            captures: &matched.captures,
        };
        let mut ctx = RequestContext::new(id, host.method().clone(), host.uri(), main.evaluate(&vars));
        ctx.args = host.args().map(str::to_string);
        ctx.path_info = matched
            .location
            .path_info
            .as_ref()
            .map(|expr| expr.evaluate(&vars));
        ctx
    }

    // == Complete ==
    fn complete<H: Host>(&self, mut ctx: RequestContext, host: &mut H) -> Finalize {
        ctx.advance(Phase::Completing);

        // Give the instance back before any response work
        if let Some(outcome) = ctx.state.take().and_then(|lease| lease.release()) {
            debug!(?outcome, "engine instance released");
        }

        if let Some(redirect) = ctx.redirect.take() {
            debug!(target = %redirect.target, "redirect requested");
            let finalize = match redirect.kind() {
                RedirectKind::Internal { uri, args } => Finalize::InternalRedirect { uri, args },
                RedirectKind::Named(name) => Finalize::NamedLocation(name),
            };
            ctx.finish(Phase::Finalized);
            return finalize;
        }

        if let Err(err) = copy_response_headers(&ctx.response_headers, host.headers_out()) {
            error!(error = %err, "failed to set response header");
            ctx.finish(Phase::Error);
            return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
        }

        if ctx.rc != RC_OK {
            let status = map_result_code(ctx.rc);
            debug!(rc = ctx.rc, %status, "finalizing with result code");
            ctx.finish(Phase::Finalized);
            return Finalize::Status(status);
        }

        let Ok(status) = StatusCode::from_u16(ctx.status) else {
            error!(status = ctx.status, "script set an invalid status");
            ctx.finish(Phase::Error);
            return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
        };

        let body = ctx.take_response_body();
        let shape = shape(&ctx.method, status, body.len());
        match shape.correction {
            Some(Correction::BodyIgnored) => warn!(len = body.len(), "ignoring response body"),
            Some(Correction::BodyExpected) => warn!("response body expected"),
            None => {}
        }

        let head = host.headers_out();
        head.status = status;
        head.content_length = shape.content_length;
        head.header_only = shape.header_only;

        if let Err(err) = host.send_header() {
            error!(error = %err, "failed to send response header");
            ctx.finish(Phase::Error);
            return Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR);
        }
        if shape.header_only || ctx.method == Method::HEAD {
            ctx.finish(Phase::Finalized);
            return Finalize::Done;
        }

        match host.send_body(body, true) {
            Ok(()) => {
                ctx.finish(Phase::Finalized);
                Finalize::Done
            }
            Err(err) => {
                error!(error = %err, "failed to send response body");
                ctx.finish(Phase::Error);
                Finalize::Status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Copies script headers into the response, skipping `Content-Length`.
fn copy_response_headers(table: &Table<Bytes>, head: &mut ResponseHead) -> Result<(), OutputError> {
    let mut cursor: Option<&[u8]> = None;
    while let Some((name, value)) = table.next(cursor) {
        if !is_content_length(name) {
            head.push(name, value)?;
        }
        cursor = Some(&name[..]);
    }
    Ok(())
}
