//! Immutable data types shared between the caller and the engine.
//!
//! Request descriptions, response metadata, and source configuration. None of
//! these types perform I/O.

pub mod options;
pub mod request;
pub mod response;
pub mod spec;

pub use options::{
    ContentTypePredicate, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, SourceOptions, Timeouts,
    TransferCallback, TransferEvent,
};
pub use request::{Method, OutgoingRequest, UploadBody};
pub use response::{RequestStatus, ResponseHeaders, ResponseInfo, ResponseMeta};
pub use spec::RequestSpec;
