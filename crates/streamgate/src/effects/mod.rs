//! Effectful layer: the engine seam, its implementations, and the blocking
//! data source built on top of it.
//!
//! Everything that waits, spawns or talks to the network lives here. The
//! rules it applies come from [`crate::core`].

mod attempt;
mod gate;
mod headers;
mod http;
mod mock;
mod source;

pub use attempt::{ConnectionState, READ_BUFFER_SIZE};
pub use gate::Gate;
pub use headers::HeaderStore;
pub use http::{HttpEngine, RedirectAction, RequestCallback, UrlRequest};
pub use mock::{MockConnect, MockEngine, MockLog, MockResponse, RecordedRequest};
pub use source::{DataSource, EngineDataSource, HttpDataSource, ReadOutcome};
#[cfg(feature = "reqwest")]
pub use http::{MAX_REDIRECTS, ReqwestEngine};
