//! Error types for the script execution core
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

// == Table Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Keys must contain at least one byte
    #[error("empty key in table {0}")]
    EmptyKey(&'static str),

    /// Behaviour flags can only change while the table is empty
    #[error("table {0} is in use and cannot be reconfigured")]
    InUse(&'static str),
}

// == Engine Error ==
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not be constructed
    #[error("failed to create engine: {0}")]
    Create(String),

    /// A script file could not be read
    #[error("failed to load script {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The script engine reported an error
    #[error("script error: {0}")]
    Script(#[from] mlua::Error),
}

// == Config Error ==
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("\"{directive}\" has invalid size value \"{value}\"")]
    InvalidSize { directive: &'static str, value: String },

    #[error("\"{directive}\" has invalid time value \"{value}\"")]
    InvalidTime { directive: &'static str, value: String },

    #[error("unknown directive \"{directive}\" in location \"{pattern}\"")]
    UnknownDirective { pattern: String, directive: String },

    #[error("location \"{0}\" is duplicate")]
    Duplicate(String),

    #[error("\"{directive}\" has invalid expression \"{source_text}\": {reason}")]
    Expression {
        directive: &'static str,
        source_text: String,
        reason: String,
    },

    #[error("location \"{pattern}\" has invalid regex: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("\"{0}\" must be greater than zero")]
    Zero(&'static str),
}

// == Output Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("invalid response header name \"{0}\"")]
    InvalidHeaderName(String),

    #[error("invalid value for response header \"{0}\"")]
    InvalidHeaderValue(String),

    #[error("response header already sent")]
    HeaderSent,

    #[error("response body sent before header")]
    HeaderMissing,
}

// == LWS Error ==
/// Unified error type for the script execution core.
#[derive(Error, Debug)]
pub enum LwsError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The target script does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LwsError {
    /// Protocol status this error finalizes a request with.
    pub fn status(&self) -> StatusCode {
        match self {
            LwsError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for LwsError {
    fn into_response(self) -> Response {
        crate::api::status_page(self.status())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the script execution core.
pub type Result<T> = std::result::Result<T, LwsError>;
