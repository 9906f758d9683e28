//! Blocking, sequential-read HTTP data sources over callback-driven engines.
//!
//! A media pipeline reads byte ranges through [`DataSource`]: `open` a
//! [`RequestSpec`], `read` until [`ReadOutcome::EndOfStream`], then `close`.
//! [`EngineDataSource`] implements it on top of any asynchronous
//! [`HttpEngine`] by parking the caller until the engine's callbacks report
//! progress.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Request descriptions, response metadata and options
//! - [`core`] - Pure rules: range headers, content-length reconciliation,
//!   redirect policy, deadlines
//! - `effects` - The engine seam, engines, and the blocking data source
//!
//! # Key Features
//!
//! - **Stale-callback safe**: callbacks of a closed attempt never touch the next
//! - **Bounded waits**: connect deadline survives spurious wake-ups and may be
//!   extended on redirects; every read refill has its own timeout
//! - **Length reconciliation**: `Content-Length` and `Content-Range` are
//!   checked against each other and against the requested window
//! - **Pluggable engine**: `reqwest` in production, [`MockEngine`] in tests

pub mod core;
pub mod data;
mod effects;
mod error;

pub use data::{
    ContentTypePredicate, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, Method, OutgoingRequest,
    RequestSpec, RequestStatus, ResponseHeaders, ResponseInfo, ResponseMeta, SourceOptions,
    Timeouts, TransferCallback, TransferEvent, UploadBody,
};
pub use effects::{
    ConnectionState, DataSource, EngineDataSource, Gate, HeaderStore, HttpDataSource, HttpEngine,
    MockConnect, MockEngine, MockLog, MockResponse, READ_BUFFER_SIZE, ReadOutcome, RecordedRequest,
    RedirectAction, RequestCallback, UrlRequest,
};

#[cfg(feature = "reqwest")]
pub use effects::{MAX_REDIRECTS, ReqwestEngine};

pub use error::{
    EngineError, EngineErrorKind, OpenFailure, PositionOutOfRange, ReadFailure, Result,
    SourceError,
};
