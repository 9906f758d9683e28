/// Returns `true` if the HTTP status code indicates a redirect.
///
/// # Recognized Redirect Codes
///
/// - 301: Moved Permanently
/// - 302: Found
/// - 303: See Other
/// - 307: Temporary Redirect
/// - 308: Permanent Redirect
///
/// # Examples
///
/// ```
/// use streamgate::core::is_redirect;
///
/// assert!(is_redirect(301));
/// assert!(is_redirect(308));
/// assert!(!is_redirect(200));
/// assert!(!is_redirect(304));
/// ```
pub fn is_redirect(status: u16) -> bool { matches!(status, 301 | 302 | 303 | 307 | 308) }

/// Returns `true` if a redirect keeps the method and body of the original
/// request (307 and 308).
pub fn preserves_method(status: u16) -> bool { matches!(status, 307 | 308) }

/// Decides whether a redirect may be followed.
///
/// A request with a body is not followed through a method-preserving
/// redirect: the body would be re-sent to a location the caller never chose.
/// Every other redirect is followed; the engine turns a POST into a GET for
/// 301, 302 and 303.
pub fn redirect_allowed(has_body: bool, status: u16) -> bool {
    !(has_body && preserves_method(status))
}
