use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::spec::RequestSpec;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Decides whether a response `Content-Type` is acceptable.
///
/// Receives the first `Content-Type` value, or `None` if the header is absent.
pub type ContentTypePredicate = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Receives transfer notifications on the caller thread.
pub type TransferCallback = Arc<dyn Fn(&TransferEvent<'_>) + Send + Sync>;

/// Notification emitted as a source moves through an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent<'a> {
    /// `open` succeeded for `spec`.
    Started { spec: &'a RequestSpec },
    /// A `read` call returned this many bytes.
    BytesTransferred(usize),
    /// An Open source was closed.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Upper bound for `open`, from start to response headers.
    pub connect: Duration,
    /// Upper bound for each buffer refill during `read`.
    pub read:    Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read:    DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Configuration of an [`EngineDataSource`](crate::EngineDataSource).
///
/// Persists across attempts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use streamgate::SourceOptions;
///
/// let options = SourceOptions::default()
///     .connect_timeout(Duration::from_secs(2))
///     .reset_timeout_on_redirect(true)
///     .content_type_predicate(|ct| ct.is_some_and(|ct| ct.starts_with("video/")));
/// assert!(options.reset_timeout_on_redirect);
/// ```
#[derive(Clone, Default)]
pub struct SourceOptions {
    pub timeouts: Timeouts,

    /// Restart the connect deadline each time a redirect is followed.
    ///
    /// Default: false
    pub reset_timeout_on_redirect: bool,

    /// Rejects responses whose content type fails the predicate.
    ///
    /// Default: None (accept everything)
    pub content_type_predicate: Option<ContentTypePredicate>,

    /// Invoked on transfer start, after each successful read, and on close.
    ///
    /// Default: None
    pub on_transfer: Option<TransferCallback>,
}

impl fmt::Debug for SourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceOptions")
            .field("timeouts", &self.timeouts)
            .field("reset_timeout_on_redirect", &self.reset_timeout_on_redirect)
            .field(
                "content_type_predicate",
                &self.content_type_predicate.as_ref().map(|_| "{ ... }"),
            )
            .field("on_transfer", &self.on_transfer.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

impl SourceOptions {
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    #[must_use]
    pub fn reset_timeout_on_redirect(mut self, reset: bool) -> Self {
        self.reset_timeout_on_redirect = reset;
        self
    }

    #[must_use]
    pub fn content_type_predicate(
        mut self,
        predicate: impl Fn(Option<&str>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.content_type_predicate = Some(Arc::new(predicate));
        self
    }

    /// Set the transfer callback.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use streamgate::{SourceOptions, TransferEvent};
    ///
    /// let total = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&total);
    /// let options = SourceOptions::default().on_transfer(move |event| {
    ///     if let TransferEvent::BytesTransferred(n) = event {
    ///         counter.fetch_add(*n, Ordering::Relaxed);
    ///     }
    /// });
    /// # let _ = options;
    /// ```
    #[must_use]
    pub fn on_transfer(
        mut self,
        callback: impl Fn(&TransferEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_transfer = Some(Arc::new(callback));
        self
    }

    pub(crate) fn notify(&self, event: TransferEvent<'_>) {
        if let Some(callback) = &self.on_transfer {
            callback(&event);
        }
    }
}
