//! Acceptance checks and content-length resolution for response headers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::data::{ContentTypePredicate, ResponseHeaders, ResponseInfo, ResponseMeta};

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_RANGE: &str = "Content-Range";
pub const CONTENT_ENCODING: &str = "Content-Encoding";

static CONTENT_RANGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^bytes (\d+)-(\d+)/(\d+)$").expect("valid Content-Range pattern"));

/// Why a response was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Status outside 200..=299.
    Status { status: u16 },
    ContentType { content_type: Option<String> },
    LengthMismatch { requested: u64, resolved: u64 },
}

/// Returns `true` for a status in the 2xx range.
pub fn is_success(status: u16) -> bool { (200..=299).contains(&status) }

/// Returns `true` if the body uses a `Content-Encoding` other than identity.
///
/// Only the first `Content-Encoding` header is considered.
pub fn is_compressed(headers: &ResponseHeaders) -> bool {
    headers
        .first(CONTENT_ENCODING)
        .is_some_and(|encoding| !encoding.trim().eq_ignore_ascii_case("identity"))
}

/// Length of the window described by a `Content-Range` value, `end - start + 1`.
pub fn content_range_length(value: &str) -> Option<u64> {
    let captures = CONTENT_RANGE_PATTERN.captures(value)?;
    let start: u64 = captures[1].parse().ok()?;
    let end: u64 = captures[2].parse().ok()?;
    end.checked_sub(start)?.checked_add(1)
}

/// Derives the content length from `Content-Length` and `Content-Range`.
///
/// When both are usable and disagree the larger value wins: intermediaries
/// have been seen shrinking one of them, never growing it. Unparseable values
/// are logged and skipped.
///
/// # Examples
///
/// ```
/// use streamgate::ResponseHeaders;
/// use streamgate::core::resolve_content_length;
///
/// let headers = ResponseHeaders::new()
///     .with("Content-Length", "100")
///     .with("Content-Range", "bytes 0-199/1000");
/// assert_eq!(resolve_content_length(&headers), Some(200));
/// ```
pub fn resolve_content_length(headers: &ResponseHeaders) -> Option<u64> {
    let length_header = headers.first(CONTENT_LENGTH).filter(|v| !v.is_empty());
    let from_length = length_header.and_then(|value| match value.trim().parse::<u64>() {
        Ok(length) => Some(length),
        Err(_) => {
            tracing::error!(header = value, "unexpected Content-Length");
            None
        }
    });

    let Some(range_header) = headers.first(CONTENT_RANGE) else {
        return from_length;
    };
    let Some(from_range) = content_range_length(range_header) else {
        if CONTENT_RANGE_PATTERN.is_match(range_header) {
            tracing::error!(header = range_header, "unexpected Content-Range");
        }
        return from_length;
    };

    match from_length {
        None => Some(from_range),
        Some(length) if length == from_range => Some(length),
        Some(length) => {
            tracing::warn!(
                content_length = length_header,
                content_range = range_header,
                "inconsistent headers"
            );
            Some(length.max(from_range))
        }
    }
}

/// Validates a freshly started response and resolves its metadata.
///
/// `requested_length` is the length of the originally requested window. For a
/// compressed body it becomes the content length as-is, since the decoded size
/// is not advertised.
pub fn reconcile(
    info: &ResponseInfo,
    requested_length: Option<u64>,
    content_type_predicate: Option<&ContentTypePredicate>,
) -> Result<ResponseMeta, Rejection> {
    if !is_success(info.status) {
        return Err(Rejection::Status {
            status: info.status,
        });
    }

    if let Some(predicate) = content_type_predicate {
        let content_type = info.headers.first(crate::core::request::CONTENT_TYPE);
        if !predicate(content_type) {
            return Err(Rejection::ContentType {
                content_type: content_type.map(str::to_owned),
            });
        }
    }

    let compressed = is_compressed(&info.headers);
    let content_length = if compressed {
        requested_length
    } else {
        let resolved = resolve_content_length(&info.headers);
        if let (Some(requested), Some(resolved)) = (requested_length, resolved) {
            if requested != resolved {
                return Err(Rejection::LengthMismatch {
                    requested,
                    resolved,
                });
            }
        }
        resolved
    };

    Ok(ResponseMeta {
        url: info.url.clone(),
        status: info.status,
        headers: info.headers.clone(),
        content_length,
        compressed,
    })
}
