//! Error types for streamgate.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::data::RequestStatus;

/// Errors surfaced by a data source.
///
/// Errors are `Clone` because a captured callback failure stays pending for the
/// rest of the attempt and is re-raised on every subsequent wait.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("failed to open {uri} (transport status: {status}): {cause}")]
    Open {
        uri:    Url,
        status: RequestStatus,
        #[source]
        cause:  OpenFailure,
    },

    #[error("invalid response status {status} for {uri}")]
    InvalidStatus {
        uri:     Url,
        status:  u16,
        headers: HashMap<String, Vec<String>>,
        #[source]
        cause:   Option<PositionOutOfRange>,
    },

    #[error("failed to read {uri}: {cause}")]
    Read {
        uri:   Url,
        #[source]
        cause: ReadFailure,
    },

    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

impl SourceError {
    /// Returns `true` for a 416 response, i.e. the requested position lies
    /// beyond the end of the resource.
    pub fn is_position_out_of_range(&self) -> bool {
        matches!(self, SourceError::InvalidStatus { cause: Some(_), .. })
    }

    /// Returns `true` if the error is a connect or read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SourceError::Open { cause: OpenFailure::ConnectTimeout, .. }
                | SourceError::Read { cause: ReadFailure::Timeout(_), .. }
        )
    }
}

/// Why an attempt failed before reaching the Open state.
#[derive(Debug, Clone, Error)]
pub enum OpenFailure {
    #[error("host name could not be resolved")]
    HostNotResolved(#[source] EngineError),

    #[error("transport error: {0}")]
    Transport(#[source] EngineError),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("POST requires Content-Type")]
    MissingContentType,

    #[error("content type rejected: {content_type:?}")]
    InvalidContentType { content_type: Option<String> },

    #[error("content length mismatch: requested {requested}, response has {resolved}")]
    ContentLengthMismatch { requested: u64, resolved: u64 },

    #[error("POST request redirected with {status} response code")]
    RedirectNotAllowed { status: u16 },

    #[error("source was closed while opening")]
    Closed,
}

/// Why a read from an Open source failed.
#[derive(Debug, Clone, Error)]
pub enum ReadFailure {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] EngineError),

    #[error("source was closed while reading")]
    Closed,
}

/// Sub-cause attached to a 416 `InvalidStatus` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("position out of range")]
pub struct PositionOutOfRange;

/// Classification of a transport failure reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    HostNameNotResolved,
    ConnectionFailed,
    TimedOut,
    TooManyRedirects,
    Other,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineErrorKind::HostNameNotResolved => "host name not resolved",
            EngineErrorKind::ConnectionFailed => "connection failed",
            EngineErrorKind::TimedOut => "timed out",
            EngineErrorKind::TooManyRedirects => "too many redirects",
            EngineErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A failure reported by an [`HttpEngine`](crate::HttpEngine).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind:    EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
