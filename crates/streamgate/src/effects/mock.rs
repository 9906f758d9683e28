//! Scripted engine for testing data sources without a network.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::data::{Method, OutgoingRequest, RequestStatus, ResponseHeaders, ResponseInfo};
use crate::effects::http::{HttpEngine, RedirectAction, RequestCallback, UrlRequest};
use crate::error::{EngineError, EngineErrorKind};

/// How a mock request reacts to `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockConnect {
    /// Deliver redirects, then the response headers.
    Respond,
    /// Never answer.
    Hang,
    /// Report a transport failure before any response.
    Fail(EngineError),
}

/// One scripted exchange.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Served-from URL; defaults to the request URL after redirects.
    pub url:          Option<Url>,
    pub status:       u16,
    pub headers:      ResponseHeaders,
    pub body:         Bytes,
    /// `(status, location)` pairs delivered before the response.
    pub redirects:    Vec<(u16, String)>,
    pub connect:      MockConnect,
    /// Wait before answering `start`.
    pub delay:        Duration,
    /// Wait after each followed redirect before the next hop answers.
    pub hop_delay:    Duration,
    /// Upper bound on the bytes handed out per read.
    pub max_chunk:    Option<usize>,
    /// Stop answering reads once this many body bytes were delivered.
    pub hang_read_at: Option<usize>,
    /// Fail reads once this many body bytes were delivered.
    pub fail_read_at: Option<(usize, EngineError)>,
}

impl MockResponse {
    /// Response with `status`, no headers and an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            url: None,
            status,
            headers: ResponseHeaders::new(),
            body: Bytes::new(),
            redirects: Vec::new(),
            connect: MockConnect::Respond,
            delay: Duration::ZERO,
            hop_delay: Duration::ZERO,
            max_chunk: None,
            hang_read_at: None,
            fail_read_at: None,
        }
    }

    /// 200 with `Content-Length` set to the body size.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::status(200).header("Content-Length", body.len().to_string()).body(body)
    }

    /// 200 without any length header.
    pub fn ok_unbounded(body: impl Into<Bytes>) -> Self { Self::status(200).body(body) }

    /// 206 serving `body` as the window starting at `position` of a resource of
    /// `total` bytes.
    pub fn partial(body: impl Into<Bytes>, position: u64, total: u64) -> Self {
        let body = body.into();
        let end = (position + body.len() as u64).saturating_sub(1);
        Self::status(206)
            .header("Content-Length", body.len().to_string())
            .header("Content-Range", format!("bytes {position}-{end}/{total}"))
            .body(body)
    }

    /// A request that never gets an answer.
    pub fn hang() -> Self {
        Self {
            connect: MockConnect::Hang,
            ..Self::status(0)
        }
    }

    /// A request that fails before any response.
    pub fn fail(error: EngineError) -> Self {
        Self {
            connect: MockConnect::Fail(error),
            ..Self::status(0)
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn served_from(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    #[must_use]
    pub fn redirect(mut self, status: u16, location: impl Into<String>) -> Self {
        self.redirects.push((status, location.into()));
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn hop_delay(mut self, hop_delay: Duration) -> Self {
        self.hop_delay = hop_delay;
        self
    }

    #[must_use]
    pub fn max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    #[must_use]
    pub fn hang_read_at(mut self, offset: usize) -> Self {
        self.hang_read_at = Some(offset);
        self
    }

    #[must_use]
    pub fn fail_read_at(mut self, offset: usize, error: EngineError) -> Self {
        self.fail_read_at = Some((offset, error));
        self
    }
}

/// A request as the mock engine received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url:     Url,
    pub method:  Method,
    pub headers: Vec<(String, String)>,
    pub body:    Option<Bytes>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Everything the mock engine was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub requests:           Vec<RecordedRequest>,
    pub starts:             usize,
    pub reads:              usize,
    pub cancels:            usize,
    /// Targets of redirects the callback chose to follow.
    pub followed_redirects: Vec<String>,
    /// Redirects the callback refused.
    pub refused_redirects:  usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Dispatch {
    /// Callbacks run on the thread that called `start`/`read`.
    #[default]
    Inline,
    /// Callbacks run on a worker thread per request, in order.
    Threaded,
}

#[derive(Default)]
struct EngineInner {
    dispatch:  Dispatch,
    responses: Mutex<VecDeque<MockResponse>>,
    log:       Mutex<MockLog>,
}

impl EngineInner {
    fn log(&self) -> MutexGuard<'_, MockLog> { self.log.lock().unwrap_or_else(|e| e.into_inner()) }
}

/// In-memory [`HttpEngine`] answering from a queue of [`MockResponse`]s.
///
/// Each new request takes the next queued response. Clones share the queue
/// and the log, so a test can keep a handle after giving the engine away.
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<EngineInner>,
}

impl MockEngine {
    /// Engine that runs callbacks inline.
    pub fn new() -> Self { Self::default() }

    /// Engine that runs callbacks on worker threads.
    pub fn threaded() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                dispatch: Dispatch::Threaded,
                ..EngineInner::default()
            }),
        }
    }

    /// Queue the response for the next request.
    pub fn respond(&self, response: MockResponse) {
        self.inner.responses.lock().unwrap_or_else(|e| e.into_inner()).push_back(response);
    }

    pub fn log(&self) -> MockLog { self.inner.log().clone() }
}

impl HttpEngine for MockEngine {
    fn new_request(
        &self,
        request: OutgoingRequest,
        callback: Arc<dyn RequestCallback>,
    ) -> Result<Arc<dyn UrlRequest>, EngineError> {
        let response = self
            .inner
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| EngineError::new(EngineErrorKind::Other, "no scripted response"))?;

        self.inner.log().requests.push(RecordedRequest {
            url:     request.url.clone(),
            method:  request.method,
            headers: request.headers.clone(),
            body:    request.body.as_ref().and_then(|body| body.take()),
        });

        let core = Arc::new(RequestCore {
            engine: Arc::clone(&self.inner),
            callback,
            url: request.url,
            state: Mutex::new(RequestState {
                response,
                info: None,
                offset: 0,
                canceled: false,
                status: RequestStatus::Idle,
            }),
        });
        let worker = match self.inner.dispatch {
            Dispatch::Inline => None,
            Dispatch::Threaded => Some(spawn_worker()),
        };
        Ok(Arc::new(MockRequest { core, worker }))
    }
}

type Job = Box<dyn FnOnce() + Send>;

fn spawn_worker() -> mpsc::Sender<Job> {
    let (tx, rx) = mpsc::channel::<Job>();
    thread::spawn(move || {
        for job in rx {
            job();
        }
    });
    tx
}

struct RequestState {
    response: MockResponse,
    info:     Option<ResponseInfo>,
    offset:   usize,
    canceled: bool,
    status:   RequestStatus,
}

struct RequestCore {
    engine:   Arc<EngineInner>,
    callback: Arc<dyn RequestCallback>,
    url:      Url,
    state:    Mutex<RequestState>,
}

/// What a read turned into, decided under the state lock and delivered after
/// releasing it.
enum Delivery {
    Nothing,
    Data(ResponseInfo, Bytes),
    Done(ResponseInfo),
    Failed(ResponseInfo, EngineError),
}

impl RequestCore {
    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn canceled(&self) -> bool { self.lock().canceled }

    fn run_start(&self) {
        let (redirects, connect, delay, hop_delay, served_from, status, headers) = {
            let mut state = self.lock();
            if state.canceled {
                return;
            }
            state.status = RequestStatus::WaitingForResponse;
            let response = &state.response;
            (
                response.redirects.clone(),
                response.connect.clone(),
                response.delay,
                response.hop_delay,
                response.url.clone(),
                response.status,
                response.headers.clone(),
            )
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut current = self.url.clone();
        for (code, location) in redirects {
            if self.canceled() {
                return;
            }
            let target = current.join(&location).unwrap_or_else(|_| current.clone());
            let info = ResponseInfo::new(
                current.clone(),
                code,
                ResponseHeaders::new().with("Location", location),
            );
            match self.callback.on_redirect_received(&info, target.as_str()) {
                RedirectAction::Follow => {
                    self.engine.log().followed_redirects.push(target.to_string());
                    current = target;
                    if !hop_delay.is_zero() {
                        thread::sleep(hop_delay);
                    }
                }
                RedirectAction::Cancel => {
                    self.engine.log().refused_redirects += 1;
                    self.lock().status = RequestStatus::Invalid;
                    return;
                }
            }
        }

        match connect {
            MockConnect::Hang => {}
            MockConnect::Fail(error) => {
                {
                    let mut state = self.lock();
                    if state.canceled {
                        return;
                    }
                    state.status = RequestStatus::Invalid;
                }
                self.callback.on_failed(None, &error);
            }
            MockConnect::Respond => {
                let info = ResponseInfo::new(served_from.unwrap_or(current), status, headers);
                {
                    let mut state = self.lock();
                    if state.canceled {
                        return;
                    }
                    state.info = Some(info.clone());
                    state.status = RequestStatus::Idle;
                }
                self.callback.on_response_started(&info);
            }
        }
    }

    fn run_read(&self, max_len: usize) {
        let delivery = {
            let mut state = self.lock();
            match state.info.clone() {
                Some(info) if !state.canceled => {
                    let offset = state.offset;
                    let response = &state.response;
                    if response.hang_read_at.is_some_and(|at| offset >= at) {
                        Delivery::Nothing
                    } else if let Some((_, error)) =
                        response.fail_read_at.as_ref().filter(|(at, _)| offset >= *at)
                    {
                        Delivery::Failed(info, error.clone())
                    } else if offset >= response.body.len() {
                        Delivery::Done(info)
                    } else {
                        let limit = response.max_chunk.unwrap_or(usize::MAX).min(max_len);
                        let mut end = offset.saturating_add(limit).min(response.body.len());
                        if let Some(at) = response.hang_read_at.filter(|&at| at > offset) {
                            end = end.min(at);
                        }
                        if let Some((at, _)) = response.fail_read_at.as_ref() {
                            if *at > offset {
                                end = end.min(*at);
                            }
                        }
                        let chunk = response.body.slice(offset..end);
                        state.offset = end;
                        Delivery::Data(info, chunk)
                    }
                }
                _ => Delivery::Nothing,
            }
        };

        match delivery {
            Delivery::Nothing => {}
            Delivery::Data(info, chunk) => self.callback.on_read_completed(&info, &chunk),
            Delivery::Done(info) => {
                self.lock().status = RequestStatus::Invalid;
                self.callback.on_succeeded(&info);
            }
            Delivery::Failed(info, error) => {
                self.lock().status = RequestStatus::Invalid;
                self.callback.on_failed(Some(&info), &error);
            }
        }
    }
}

struct MockRequest {
    core:   Arc<RequestCore>,
    worker: Option<mpsc::Sender<Job>>,
}

impl MockRequest {
    fn dispatch(&self, job: impl FnOnce(&RequestCore) + Send + 'static) {
        let core = Arc::clone(&self.core);
        match &self.worker {
            None => job(&*core),
            Some(worker) => {
                if worker.send(Box::new(move || job(&*core))).is_err() {
                    tracing::debug!("mock worker is gone");
                }
            }
        }
    }
}

impl UrlRequest for MockRequest {
    fn start(&self) {
        self.core.engine.log().starts += 1;
        self.dispatch(RequestCore::run_start);
    }

    fn read(&self, max_len: usize) {
        self.core.engine.log().reads += 1;
        self.dispatch(move |core| core.run_read(max_len));
    }

    fn cancel(&self) {
        self.core.engine.log().cancels += 1;
        let mut state = self.core.lock();
        state.canceled = true;
        state.status = RequestStatus::Invalid;
    }

    fn status(&self) -> RequestStatus { self.core.lock().status }
}
