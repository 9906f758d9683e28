//! Pure transformations: request assembly, response reconciliation, redirect
//! policy and deadline arithmetic.
//!
//! Nothing here blocks or touches the engine, so every rule can be tested on
//! plain values.

mod deadline;
mod reconcile;
mod request;
mod validation;

pub use deadline::{Clock, ConnectDeadline, DEADLINE_FUDGE, SystemClock};
pub use reconcile::{
    CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, Rejection, content_range_length,
    is_compressed, is_success, reconcile, resolve_content_length,
};
pub use request::{CONTENT_TYPE, RANGE, build_request, range_header};
pub use validation::{is_redirect, preserves_method, redirect_allowed};
