use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use url::Url;

use crate::core::{self, Clock, ConnectDeadline, DEADLINE_FUDGE, Rejection, SystemClock};
use crate::data::{RequestSpec, RequestStatus, ResponseInfo, ResponseMeta, SourceOptions, TransferEvent};
use crate::effects::attempt::{Attempt, ConnectionState, READ_BUFFER_SIZE};
use crate::effects::gate::Gate;
use crate::effects::headers::HeaderStore;
use crate::effects::http::{HttpEngine, RedirectAction, RequestCallback, UrlRequest};
use crate::error::{
    EngineError, EngineErrorKind, OpenFailure, PositionOutOfRange, ReadFailure, Result,
    SourceError,
};

/// Result of a successful [`DataSource::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were copied into the destination.
    Data(usize),
    /// The stream has no more bytes.
    EndOfStream,
}

/// Blocking, sequential-read data source.
///
/// Every attempt is `open`, any number of `read`s, then `close`. `close` must
/// be called after a failed `open` too, before the source can be opened again.
pub trait DataSource {
    /// Opens the source for `spec` and blocks until the response headers are
    /// accepted. Returns the number of bytes the stream will deliver, if
    /// known.
    fn open(&self, spec: RequestSpec) -> Result<Option<u64>>;

    /// Reads into `buf`, blocking for at most the read timeout.
    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Releases the current attempt. Never fails and may be called any time.
    fn close(&self);

    /// URI the data is served from, after redirects. `None` until a response
    /// was accepted.
    fn uri(&self) -> Option<Url>;
}

/// A [`DataSource`] speaking HTTP.
pub trait HttpDataSource: DataSource {
    fn set_request_header(&self, name: &str, value: &str);

    fn clear_request_header(&self, name: &str);

    fn clear_all_request_headers(&self);

    /// Headers of the accepted response, grouped by name.
    ///
    /// Keys are the names exactly as the engine delivered them, so lookups
    /// in the map are case-sensitive: `Content-Type` and `content-type` are
    /// different keys. Compare with `eq_ignore_ascii_case` when the delivered
    /// case is unknown.
    fn response_headers(&self) -> Option<HashMap<String, Vec<String>>>;
}

/// State shared between the caller and the callbacks of the current request.
struct Shared {
    attempt: Mutex<Option<Attempt>>,
    gate:    Gate,
    options: SourceOptions,
    clock:   Arc<dyn Clock>,
}

impl Shared {
    fn new(options: SourceOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            attempt: Mutex::new(None),
            gate: Gate::new(),
            options,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Attempt>> {
        self.attempt.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` on the attempt if `generation` is still the current one.
    fn with_current<R>(&self, generation: u64, f: impl FnOnce(&mut Attempt) -> R) -> Option<R> {
        match self.lock().as_mut() {
            Some(attempt) if attempt.generation == generation => Some(f(attempt)),
            _ => None,
        }
    }

    /// Applies `f` to the current attempt and opens the gate, atomically with
    /// respect to `open`, `read` and `close`.
    fn signal(&self, generation: u64, f: impl FnOnce(&mut Attempt)) -> bool {
        self.with_current(generation, |attempt| {
            f(attempt);
            self.gate.open();
        })
        .is_some()
    }

    /// Transport status of the current request. Queried outside the lock.
    fn request_status(&self, generation: u64) -> RequestStatus {
        self.with_current(generation, |attempt| attempt.request.clone())
            .flatten()
            .map_or(RequestStatus::Invalid, |request| request.status())
    }
}

/// Callback bound to one attempt.
///
/// Holds the generation it was created for; once `close` retires that
/// generation every notification becomes a no-op.
struct AttemptCallback {
    generation: u64,
    shared:     Weak<Shared>,
}

impl AttemptCallback {
    fn open_failure(&self, shared: &Shared, cause: OpenFailure) -> Option<SourceError> {
        let status = shared.request_status(self.generation);
        shared
            .with_current(self.generation, |attempt| attempt.spec.uri.clone())
            .map(|uri| SourceError::Open { uri, status, cause })
    }
}

impl RequestCallback for AttemptCallback {
    fn on_redirect_received(&self, info: &ResponseInfo, new_location: &str) -> RedirectAction {
        let Some(shared) = self.shared.upgrade() else {
            return RedirectAction::Cancel;
        };
        let Some(has_body) = shared.with_current(self.generation, |a| a.spec.has_body()) else {
            return RedirectAction::Cancel;
        };

        if !core::redirect_allowed(has_body, info.status) {
            let cause = OpenFailure::RedirectNotAllowed {
                status: info.status,
            };
            if let Some(error) = self.open_failure(&shared, cause) {
                shared.signal(self.generation, |attempt| attempt.capture(error));
            }
            return RedirectAction::Cancel;
        }

        if shared.options.reset_timeout_on_redirect {
            let now = shared.clock.now();
            shared.with_current(self.generation, |attempt| attempt.deadline.reset(now));
        }
        tracing::debug!(status = info.status, location = new_location, "following redirect");
        RedirectAction::Follow
    }

    fn on_response_started(&self, info: &ResponseInfo) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some((requested, uri)) = shared.with_current(self.generation, |attempt| {
            (attempt.spec.length, attempt.spec.uri.clone())
        }) else {
            return;
        };

        let predicate = shared.options.content_type_predicate.as_ref();
        let outcome = match core::reconcile(info, requested, predicate) {
            Ok(meta) => Ok(meta),
            Err(Rejection::Status { status }) => Err(SourceError::InvalidStatus {
                uri,
                status,
                headers: info.headers.to_multimap(),
                cause: (status == 416).then_some(PositionOutOfRange),
            }),
            Err(Rejection::ContentType { content_type }) => {
                let status = shared.request_status(self.generation);
                Err(SourceError::Open {
                    uri,
                    status,
                    cause: OpenFailure::InvalidContentType { content_type },
                })
            }
            Err(Rejection::LengthMismatch {
                requested,
                resolved,
            }) => {
                let status = shared.request_status(self.generation);
                Err(SourceError::Open {
                    uri,
                    status,
                    cause: OpenFailure::ContentLengthMismatch {
                        requested,
                        resolved,
                    },
                })
            }
        };

        shared.signal(self.generation, |attempt| match outcome {
            Ok(meta) => {
                tracing::debug!(
                    status = meta.status,
                    content_length = meta.content_length,
                    compressed = meta.compressed,
                    "response started"
                );
                attempt.read.expect(meta.content_length);
                attempt.response = Some(meta);
                attempt.state = ConnectionState::Connected;
            }
            Err(error) => attempt.capture(error),
        });
    }

    fn on_read_completed(&self, _info: &ResponseInfo, chunk: &[u8]) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        tracing::trace!(len = chunk.len(), "read completed");
        shared.signal(self.generation, |attempt| attempt.read.fill(chunk));
    }

    fn on_succeeded(&self, _info: &ResponseInfo) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.signal(self.generation, |attempt| attempt.read.finish());
    }

    fn on_failed(&self, _info: Option<&ResponseInfo>, error: &EngineError) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some((state, uri)) = shared.with_current(self.generation, |attempt| {
            (attempt.state, attempt.spec.uri.clone())
        }) else {
            return;
        };

        let failure = match state {
            ConnectionState::Open => SourceError::Read {
                uri,
                cause: ReadFailure::Transport(error.clone()),
            },
            _ => {
                let cause = match error.kind {
                    EngineErrorKind::HostNameNotResolved => {
                        OpenFailure::HostNotResolved(error.clone())
                    }
                    _ => OpenFailure::Transport(error.clone()),
                };
                SourceError::Open {
                    uri,
                    status: shared.request_status(self.generation),
                    cause,
                }
            }
        };
        tracing::debug!(%error, ?state, "request failed");
        shared.signal(self.generation, |attempt| attempt.capture(failure));
    }
}

/// What `open` found once it stopped waiting.
enum Opened {
    Ready(Option<u64>),
    Failed(SourceError),
    TimedOut,
    Closed,
}

/// What `read` does next.
enum ReadStep {
    Copied(usize),
    EndOfStream,
    Failed(SourceError),
    /// Wait for the next chunk; `issue` is set when no receive is
    /// outstanding yet and the request must be asked for one.
    Refill {
        request: Option<Arc<dyn UrlRequest>>,
        issue:   bool,
    },
}

/// [`HttpDataSource`] on top of an asynchronous [`HttpEngine`].
///
/// Bridges the engine's callbacks to blocking calls: the caller starts engine
/// work, then waits on a gate that callbacks open once they have recorded
/// their results. Connect waits are bounded by a deadline that survives
/// spurious wake-ups; each read refill is bounded by the read timeout.
///
/// All methods take `&self`. `close` may be called from another thread while
/// `open` or `read` is blocked; the waiter then fails with a `Closed` cause.
///
/// # Examples
///
/// ```
/// use streamgate::{DataSource, EngineDataSource, MockEngine, MockResponse, ReadOutcome, RequestSpec};
/// use url::Url;
///
/// let engine = MockEngine::new();
/// engine.respond(MockResponse::ok(&b"hello"[..]));
///
/// let source = EngineDataSource::new(engine);
/// let spec = RequestSpec::new(Url::parse("https://media.example/a.bin").unwrap());
/// assert_eq!(source.open(spec).unwrap(), Some(5));
///
/// let mut buf = [0u8; 16];
/// assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Data(5));
/// assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
/// source.close();
/// ```
pub struct EngineDataSource<E: HttpEngine> {
    engine:          E,
    shared:          Arc<Shared>,
    headers:         HeaderStore,
    next_generation: AtomicU64,
}

impl<E: HttpEngine> EngineDataSource<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            shared: Arc::new(Shared::new(SourceOptions::default(), Arc::new(SystemClock))),
            headers: HeaderStore::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SourceOptions) -> Self {
        let clock = Arc::clone(&self.shared.clock);
        self.shared = Arc::new(Shared::new(options, clock));
        self
    }

    /// Replace the clock used for connect deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        let options = self.shared.options.clone();
        self.shared = Arc::new(Shared::new(options, Arc::new(clock)));
        self
    }

    pub fn options(&self) -> &SourceOptions { &self.shared.options }

    pub fn engine(&self) -> &E { &self.engine }

    /// Request headers sent with every attempt.
    pub fn headers(&self) -> &HeaderStore { &self.headers }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().as_ref().map_or(ConnectionState::Idle, |attempt| attempt.state)
    }

    /// Metadata of the accepted response of the current attempt.
    pub fn response(&self) -> Option<ResponseMeta> {
        self.shared.lock().as_ref().and_then(|attempt| attempt.response.clone())
    }

    /// Bytes still expected from the stream, when the content length is known.
    pub fn bytes_remaining(&self) -> Option<u64> {
        self.shared.lock().as_ref().and_then(|attempt| attempt.read.remaining())
    }

    /// Waits for the gate until it opens or the connect deadline passes.
    ///
    /// The deadline is re-read on every wake-up because a redirect may have
    /// moved it.
    fn block_until_connect_deadline(&self, generation: u64) -> bool {
        loop {
            let now = self.shared.clock.now();
            let remaining = self
                .shared
                .with_current(generation, |attempt| attempt.deadline.remaining(now))
                .flatten();
            let Some(remaining) = remaining else {
                return self.shared.gate.is_open();
            };
            if self.shared.gate.block(remaining.saturating_add(DEADLINE_FUDGE)) {
                return true;
            }
        }
    }
}

impl<E: HttpEngine> DataSource for EngineDataSource<E> {
    fn open(&self, spec: RequestSpec) -> Result<Option<u64>> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut current = self.shared.lock();
            if current.is_some() {
                return Err(SourceError::IllegalState("connection already open"));
            }
            let timeout = self.shared.options.timeouts.connect;
            let deadline = ConnectDeadline::start(timeout, self.shared.clock.now());
            *current = Some(Attempt::new(generation, spec.clone(), deadline));
            self.shared.gate.close();
        }
        tracing::debug!(uri = %spec.uri, position = spec.position, length = ?spec.length, "opening");

        let open_error = |status: RequestStatus, cause: OpenFailure| SourceError::Open {
            uri: spec.uri.clone(),
            status,
            cause,
        };

        let outgoing = core::build_request(&spec, self.headers.snapshot())
            .map_err(|cause| open_error(RequestStatus::Idle, cause))?;
        let callback = Arc::new(AttemptCallback {
            generation,
            shared: Arc::downgrade(&self.shared),
        });
        let request = self.engine.new_request(outgoing, callback).map_err(|e| {
            let cause = match e.kind {
                EngineErrorKind::HostNameNotResolved => OpenFailure::HostNotResolved(e),
                _ => OpenFailure::Transport(e),
            };
            open_error(RequestStatus::Idle, cause)
        })?;

        let installed = self
            .shared
            .with_current(generation, |attempt| attempt.request = Some(Arc::clone(&request)));
        if installed.is_none() {
            request.cancel();
            return Err(open_error(RequestStatus::Invalid, OpenFailure::Closed));
        }
        request.start();

        let gate_opened = self.block_until_connect_deadline(generation);
        let opened = self
            .shared
            .with_current(generation, |attempt| {
                if let Some(error) = &attempt.error {
                    return Opened::Failed(error.clone());
                }
                if !gate_opened || attempt.state != ConnectionState::Connected {
                    return Opened::TimedOut;
                }
                attempt.state = ConnectionState::Open;
                Opened::Ready(attempt.response.as_ref().and_then(|meta| meta.content_length))
            })
            .unwrap_or(Opened::Closed);

        match opened {
            Opened::Ready(content_length) => {
                self.shared.options.notify(TransferEvent::Started { spec: &spec });
                Ok(content_length)
            }
            Opened::Failed(error) => Err(error),
            Opened::TimedOut => Err(open_error(request.status(), OpenFailure::ConnectTimeout)),
            Opened::Closed => Err(open_error(request.status(), OpenFailure::Closed)),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let (generation, uri) = match self.shared.lock().as_ref() {
            Some(attempt) if attempt.state == ConnectionState::Open => {
                (attempt.generation, attempt.spec.uri.clone())
            }
            _ => return Err(SourceError::IllegalState("read requires an open source")),
        };
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let read_timeout = self.shared.options.timeouts.read;
        loop {
            let step = self.shared.with_current(generation, |attempt| {
                if attempt.read.is_exhausted() {
                    return ReadStep::EndOfStream;
                }
                if attempt.read.has_data() {
                    return ReadStep::Copied(attempt.read.consume(&mut *buf));
                }
                if let Some(error) = &attempt.error {
                    return ReadStep::Failed(error.clone());
                }
                if attempt.read.is_finished() {
                    return ReadStep::EndOfStream;
                }
                self.shared.gate.close();
                ReadStep::Refill {
                    request: attempt.request.clone(),
                    issue:   attempt.read.begin_receive(),
                }
            });

            match step {
                None => {
                    return Err(SourceError::Read {
                        uri,
                        cause: ReadFailure::Closed,
                    });
                }
                Some(ReadStep::Copied(n)) => {
                    self.shared.options.notify(TransferEvent::BytesTransferred(n));
                    return Ok(ReadOutcome::Data(n));
                }
                Some(ReadStep::EndOfStream) => return Ok(ReadOutcome::EndOfStream),
                Some(ReadStep::Failed(error)) => return Err(error),
                Some(ReadStep::Refill { request: None, .. }) => {
                    return Err(SourceError::IllegalState("no request in flight"));
                }
                Some(ReadStep::Refill {
                    request: Some(request),
                    issue,
                }) => {
                    // A receive left over from a timed-out read is still ours.
                    if issue {
                        request.read(READ_BUFFER_SIZE);
                    }
                    if !self.shared.gate.block(read_timeout) {
                        return Err(SourceError::Read {
                            uri,
                            cause: ReadFailure::Timeout(read_timeout),
                        });
                    }
                }
            }
        }
    }

    fn close(&self) {
        let attempt = {
            let mut current = self.shared.lock();
            let attempt = current.take();
            self.shared.gate.open();
            attempt
        };
        let Some(attempt) = attempt else {
            return;
        };
        if let Some(request) = &attempt.request {
            request.cancel();
        }
        tracing::debug!(uri = %attempt.spec.uri, state = ?attempt.state, "closed");
        if attempt.state == ConnectionState::Open {
            self.shared.options.notify(TransferEvent::Ended);
        }
    }

    fn uri(&self) -> Option<Url> {
        self.shared
            .lock()
            .as_ref()
            .and_then(|attempt| attempt.response.as_ref().map(|meta| meta.url.clone()))
    }
}

impl<E: HttpEngine> HttpDataSource for EngineDataSource<E> {
    fn set_request_header(&self, name: &str, value: &str) { self.headers.set(name, value); }

    fn clear_request_header(&self, name: &str) { self.headers.remove(name); }

    fn clear_all_request_headers(&self) { self.headers.clear(); }

    fn response_headers(&self) -> Option<HashMap<String, Vec<String>>> {
        self.shared
            .lock()
            .as_ref()
            .and_then(|attempt| attempt.response.as_ref().map(|meta| meta.headers.to_multimap()))
    }
}

impl<E: HttpEngine> io::Read for EngineDataSource<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match DataSource::read(self, buf) {
            Ok(ReadOutcome::Data(n)) => Ok(n),
            Ok(ReadOutcome::EndOfStream) => Ok(0),
            Err(error) => {
                let kind = if error.is_timeout() {
                    io::ErrorKind::TimedOut
                } else {
                    io::ErrorKind::Other
                };
                Err(io::Error::new(kind, error))
            }
        }
    }
}

impl<E: HttpEngine> Drop for EngineDataSource<E> {
    fn drop(&mut self) { self.close(); }
}
