//! API Handlers
//!
//! The catch-all handler that runs matching requests through the pipeline,
//! and the axum implementation of the pipeline's [`Host`] interface.

use std::future::poll_fn;
use std::io::{self, Seek, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::engine::{LuaEngineFactory, StatePool};
use crate::error::{OutputError, Result};
use crate::location::Locations;
use crate::pipeline::{Finalize, Host, Pipeline, ResponseHead};
use crate::request::RequestBody;
use crate::stat::StatCache;
use crate::worker::WorkerPool;

/// Internal redirects allowed per request before it fails.
pub const MAX_REDIRECTS: usize = 10;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub locations: Arc<Locations>,
    /// Request bodies larger than this are spooled to a temporary file
    pub client_body_buffer_size: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline, locations: Locations, client_body_buffer_size: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            locations: Arc::new(locations),
            client_body_buffer_size,
        }
    }

    /// Builds locations, stat cache, worker pool and state pool from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let locations = config.compile_locations()?;
        let stat_cache = (config.stat_cache.capacity > 0).then(|| {
            Arc::new(StatCache::new(
                config.stat_cache.capacity,
                config.stat_cache.timeout,
            ))
        });
        let workers = WorkerPool::new(config.thread_pool.name.clone(), config.thread_pool.threads)?;
        let pool = StatePool::new(Arc::new(LuaEngineFactory));
        let pipeline = Pipeline::new(
            Arc::new(pool),
            Arc::new(workers),
            stat_cache,
            config.root.clone(),
        );
        Ok(Self::new(pipeline, locations, config.client_body_buffer_size))
    }
}

/// Catch-all handler.
///
/// Matches a location, runs the pipeline and follows internal and named
/// redirects until the request finishes.
pub async fn lws_handler(State(state): State<AppState>, request: Request) -> Response {
    let mut host = AxumHost::new(request, state.client_body_buffer_size);
    let mut matched = state.locations.find(host.uri());

    for _ in 0..=MAX_REDIRECTS {
        let Some(current) = matched.take() else {
            return status_page(StatusCode::NOT_FOUND);
        };

        match state.pipeline.handle(&current, &mut host).await {
            Finalize::Done => return host.into_response(),
            Finalize::Declined => return status_page(StatusCode::NOT_FOUND),
            Finalize::Status(status) => return host.into_status_response(status),
            Finalize::InternalRedirect { uri, args } => {
                debug!(%uri, "internal redirect");
                host.redirect(uri, args);
                matched = state.locations.find(host.uri());
            }
            Finalize::NamedLocation(name) => {
                debug!(%name, "named location redirect");
                host.reset_output();
                matched = state.locations.named(&name);
                if matched.is_none() {
                    error!(%name, "named location not found");
                    return status_page(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        }
    }

    error!(uri = %host.uri(), "rewrite or internal redirection cycle");
    status_page(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Plain status response used when the pipeline finalizes with a status.
pub fn status_page(status: StatusCode) -> Response {
    let bodyless = status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    if bodyless {
        return status.into_response();
    }
    let reason = status.canonical_reason().unwrap_or("Unknown");
    (status, format!("{} {}\n", status.as_u16(), reason)).into_response()
}

// == Axum Host ==
enum Spooled {
    Memory(Vec<Bytes>),
    File(std::fs::File),
}

/// [`Host`] over one axum request.
///
/// The request body is materialized once and kept, so a redirected request
/// can read it again.
pub struct AxumHost {
    method: Method,
    request_uri: String,
    uri: String,
    args: Option<String>,
    headers: HeaderMap,
    body: Option<Body>,
    spooled: Option<Spooled>,
    buffer_size: usize,
    head: ResponseHead,
    header_sent: bool,
    response_body: Option<Bytes>,
}

impl AxumHost {
    pub fn new(request: Request, buffer_size: usize) -> Self {
        let (parts, body) = request.into_parts();
        let request_uri = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
        Self {
            method: parts.method,
            request_uri,
            uri: parts.uri.path().to_string(),
            args: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body: Some(body),
            spooled: None,
            buffer_size,
            head: ResponseHead::new(),
            header_sent: false,
            response_body: None,
        }
    }

    /// Points the request at a new path, discarding any prepared output.
    pub fn redirect(&mut self, uri: String, args: Option<String>) {
        match (uri.split_once('?'), args) {
            (Some((path, query)), None) => {
                self.args = Some(query.to_string());
                self.uri = path.to_string();
            }
            (_, args) => {
                self.args = args;
                self.uri = uri;
            }
        }
        self.reset_output();
    }

    /// Status page carrying the headers the script set, such as `Location`
    /// on a redirect or `WWW-Authenticate` on a 401.
    pub fn into_status_response(self, status: StatusCode) -> Response {
        let mut response = status_page(status);
        let headers = response.headers_mut();
        for (name, value) in self.head.headers() {
            if *name != header::CONTENT_TYPE {
                headers.append(name.clone(), value.clone());
            }
        }
        response
    }

    pub fn reset_output(&mut self) {
        self.head = ResponseHead::new();
        self.header_sent = false;
        self.response_body = None;
    }

    async fn spool(&mut self) -> io::Result<()> {
        let Some(mut body) = self.body.take() else {
            return Ok(());
        };

        let mut chunks: Vec<Bytes> = Vec::new();
        let mut total = 0usize;
        let mut file: Option<tokio::fs::File> = None;

        while let Some(frame) = poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
            let frame = frame.map_err(io::Error::other)?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            total += data.len();

            if file.is_none() && total > self.buffer_size {
                let mut spool = tokio::fs::File::from_std(tempfile::tempfile()?);
                for chunk in chunks.drain(..) {
                    spool.write_all(&chunk).await?;
                }
                debug!(bytes = total, "request body spooled to temporary file");
                file = Some(spool);
            }
            match file.as_mut() {
                Some(spool) => spool.write_all(&data).await?,
                None => chunks.push(data),
            }
        }

        self.spooled = Some(match file {
            Some(mut spool) => {
                spool.flush().await?;
                Spooled::File(spool.into_std().await)
            }
            None => Spooled::Memory(chunks),
        });
        Ok(())
    }
}

#[async_trait]
impl Host for AxumHost {
    fn method(&self) -> &Method {
        &self.method
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn args(&self) -> Option<&str> {
        self.args.as_deref()
    }

    fn request_uri(&self) -> &str {
        &self.request_uri
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    async fn read_body(&mut self) -> io::Result<RequestBody> {
        if self.spooled.is_none() {
            self.spool().await?;
        }
        match &self.spooled {
            Some(Spooled::Memory(chunks)) => Ok(RequestBody::Chain(chunks.clone())),
            Some(Spooled::File(file)) => {
                let mut file = file.try_clone()?;
                file.seek(SeekFrom::Start(0))?;
                Ok(RequestBody::File(file))
            }
            None => Ok(RequestBody::empty()),
        }
    }

    fn headers_out(&mut self) -> &mut ResponseHead {
        &mut self.head
    }

    fn send_header(&mut self) -> std::result::Result<(), OutputError> {
        if self.header_sent {
            return Err(OutputError::HeaderSent);
        }
        self.header_sent = true;
        Ok(())
    }

    fn send_body(&mut self, body: Bytes, last: bool) -> std::result::Result<(), OutputError> {
        if !self.header_sent {
            return Err(OutputError::HeaderMissing);
        }
        if !last {
            warn!("partial response body buffers are not streamed");
        }
        self.response_body = Some(body);
        Ok(())
    }
}

impl IntoResponse for AxumHost {
    fn into_response(self) -> Response {
        let body = match self.response_body {
            Some(bytes) if !self.head.header_only => Body::from(bytes),
            _ => Body::empty(),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.head.status;
        *response.headers_mut() = self.head.to_header_map();
        response
    }
}
