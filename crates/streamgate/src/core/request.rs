use crate::data::{Method, OutgoingRequest, RequestSpec, UploadBody};
use crate::error::OpenFailure;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const RANGE: &str = "Range";

/// Builds the `Range` header value for a byte window.
///
/// Returns `None` when the whole resource is requested from the start.
/// The upper bound is inclusive and omitted when the length is unknown.
///
/// # Examples
///
/// ```
/// use streamgate::core::range_header;
///
/// assert_eq!(range_header(0, None), None);
/// assert_eq!(range_header(100, None).as_deref(), Some("bytes=100-"));
/// assert_eq!(range_header(0, Some(50)).as_deref(), Some("bytes=0-49"));
/// ```
pub fn range_header(position: u64, length: Option<u64>) -> Option<String> {
    if position == 0 && length.is_none() {
        return None;
    }
    let mut value = format!("bytes={position}-");
    if let Some(length) = length {
        let end = position.saturating_add(length).saturating_sub(1);
        value.push_str(&end.to_string());
    }
    Some(value)
}

/// Assembles the outgoing request for `spec` from a header snapshot.
///
/// The snapshot must be taken in one piece (see
/// [`HeaderStore::snapshot`](crate::HeaderStore::snapshot)) so the
/// `Content-Type` check and the copied headers agree.
///
/// # Errors
///
/// [`OpenFailure::MissingContentType`] if the spec carries a body and the
/// snapshot has no `Content-Type`.
pub fn build_request(
    spec: &RequestSpec,
    headers: Vec<(String, String)>,
) -> Result<OutgoingRequest, OpenFailure> {
    let has_content_type = headers.iter().any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE));
    if spec.has_body() && !has_content_type {
        return Err(OpenFailure::MissingContentType);
    }

    let mut headers = headers;
    if let Some(range) = range_header(spec.position, spec.length) {
        headers.push((RANGE.to_string(), range));
    }

    let (method, body) = match &spec.body {
        Some(body) => (Method::Post, Some(UploadBody::new(body.clone()))),
        None => (Method::Get, None),
    };

    Ok(OutgoingRequest {
        url: spec.uri.clone(),
        method,
        headers,
        body,
    })
}
