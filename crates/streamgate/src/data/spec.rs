use bytes::Bytes;
use url::Url;

/// Description of what to fetch for one attempt.
///
/// A spec is cloned into the attempt when `open` starts and is never mutated
/// afterwards.
///
/// # Examples
///
/// ```
/// use streamgate::RequestSpec;
/// use url::Url;
///
/// let spec = RequestSpec::new(Url::parse("https://cdn.example/video.mp4").unwrap())
///     .position(1024)
///     .length(4096);
/// assert_eq!(spec.length, Some(4096));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    /// Target of the request.
    pub uri:      Url,
    /// Offset of the first requested byte.
    pub position: u64,
    /// Number of requested bytes, `None` to read to the end.
    pub length:   Option<u64>,
    /// Request body. Its presence turns the request into a POST.
    pub body:     Option<Bytes>,
}

impl RequestSpec {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            position: 0,
            length: None,
            body: None,
        }
    }

    #[must_use]
    pub fn position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn has_body(&self) -> bool { self.body.is_some() }
}
