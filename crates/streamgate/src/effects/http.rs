use std::sync::Arc;

use crate::data::{OutgoingRequest, RequestStatus, ResponseInfo};
use crate::error::EngineError;

/// What the engine should do with a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectAction {
    Follow,
    /// Abandon the request. The engine delivers no further callbacks for it.
    Cancel,
}

/// Asynchronous, callback-driven HTTP engine.
///
/// The engine owns connection management, TLS and pooling. It reports progress
/// for each request through a [`RequestCallback`], on threads of its own
/// choosing, but never runs two callbacks of the same request concurrently.
///
/// # Implementations
///
/// - [`ReqwestEngine`]: Production implementation using `reqwest` on tokio
/// - [`MockEngine`](crate::MockEngine): Scripted engine for tests
pub trait HttpEngine: Send + Sync {
    /// Create a request that reports to `callback`. Nothing is sent until
    /// [`UrlRequest::start`] is called.
    fn new_request(
        &self,
        request: OutgoingRequest,
        callback: Arc<dyn RequestCallback>,
    ) -> Result<Arc<dyn UrlRequest>, EngineError>;
}

/// Handle to one in-flight request.
pub trait UrlRequest: Send + Sync {
    /// Send the request. Leads to redirect callbacks, then either
    /// `on_response_started` or `on_failed`.
    fn start(&self);

    /// Ask for up to `max_len` body bytes. Leads to exactly one of
    /// `on_read_completed`, `on_succeeded` or `on_failed`.
    ///
    /// Only valid after `on_response_started`, with no other read outstanding.
    fn read(&self, max_len: usize);

    /// Abandon the request. No callbacks are delivered afterwards.
    fn cancel(&self);

    /// Current connection-establishment status.
    fn status(&self) -> RequestStatus;
}

/// Notifications delivered by an engine for one request.
pub trait RequestCallback: Send + Sync {
    fn on_redirect_received(&self, info: &ResponseInfo, new_location: &str) -> RedirectAction;

    fn on_response_started(&self, info: &ResponseInfo);

    /// `chunk` holds at most the `max_len` bytes asked for by the matching read.
    fn on_read_completed(&self, info: &ResponseInfo, chunk: &[u8]);

    /// The body is exhausted.
    fn on_succeeded(&self, info: &ResponseInfo);

    /// `info` is `None` when the failure happened before any response arrived.
    fn on_failed(&self, info: Option<&ResponseInfo>, error: &EngineError);
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;
    use tokio::task::AbortHandle;
    use url::Url;

    use super::*;
    use crate::core::{is_redirect, preserves_method};
    use crate::data::{Method, ResponseHeaders};
    use crate::error::EngineErrorKind;

    /// Upper bound on redirects followed for one request.
    pub const MAX_REDIRECTS: usize = 20;

    /// Production engine backed by `reqwest`.
    ///
    /// Every request runs as one task on the supplied tokio runtime, which
    /// keeps its callbacks serialized. reqwest's own redirect handling is
    /// disabled so that every hop goes through
    /// [`RequestCallback::on_redirect_received`].
    #[derive(Clone)]
    pub struct ReqwestEngine {
        client:  reqwest::Client,
        runtime: Handle,
    }

    impl ReqwestEngine {
        /// Create an engine with a default client.
        pub fn new(runtime: Handle) -> Result<Self, EngineError> {
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| map_error(&e))?;
            Ok(Self { client, runtime })
        }

        /// Use a preconfigured client. It must not follow redirects itself,
        /// or redirect callbacks are never delivered.
        pub fn with_client(client: reqwest::Client, runtime: Handle) -> Self {
            Self { client, runtime }
        }
    }

    impl HttpEngine for ReqwestEngine {
        fn new_request(
            &self,
            request: OutgoingRequest,
            callback: Arc<dyn RequestCallback>,
        ) -> Result<Arc<dyn UrlRequest>, EngineError> {
            let (reads_tx, reads_rx) = mpsc::unbounded_channel();
            Ok(Arc::new(ReqwestRequest {
                client: self.client.clone(),
                runtime: self.runtime.clone(),
                status: Arc::new(AtomicU8::new(RequestStatus::Idle as u8)),
                reads: reads_tx,
                pending: Mutex::new(Some(Pending {
                    request,
                    callback,
                    reads: reads_rx,
                })),
                task: Mutex::new(TaskState::NotStarted),
            }))
        }
    }

    struct Pending {
        request:  OutgoingRequest,
        callback: Arc<dyn RequestCallback>,
        reads:    mpsc::UnboundedReceiver<usize>,
    }

    enum TaskState {
        NotStarted,
        Running(AbortHandle),
        Canceled,
    }

    struct ReqwestRequest {
        client:  reqwest::Client,
        runtime: Handle,
        status:  Arc<AtomicU8>,
        reads:   mpsc::UnboundedSender<usize>,
        pending: Mutex<Option<Pending>>,
        task:    Mutex<TaskState>,
    }

    impl UrlRequest for ReqwestRequest {
        fn start(&self) {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(*task, TaskState::NotStarted) {
                return;
            }
            let Some(pending) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
            else {
                return;
            };
            let driver = Driver {
                client:   self.client.clone(),
                status:   Arc::clone(&self.status),
                callback: pending.callback,
            };
            let handle = self.runtime.spawn(driver.run(pending.request, pending.reads));
            *task = TaskState::Running(handle.abort_handle());
        }

        fn read(&self, max_len: usize) {
            if self.reads.send(max_len).is_err() {
                tracing::debug!("read requested after the request finished");
            }
        }

        fn cancel(&self) {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            if let TaskState::Running(handle) = &*task {
                handle.abort();
            }
            *task = TaskState::Canceled;
            self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
            self.status.store(RequestStatus::Invalid as u8, Ordering::Release);
        }

        fn status(&self) -> RequestStatus {
            RequestStatus::from_u8(self.status.load(Ordering::Acquire))
        }
    }

    struct Driver {
        client:   reqwest::Client,
        status:   Arc<AtomicU8>,
        callback: Arc<dyn RequestCallback>,
    }

    impl Driver {
        fn set_status(&self, status: RequestStatus) {
            self.status.store(status as u8, Ordering::Release);
        }

        async fn run(self, request: OutgoingRequest, mut reads: mpsc::UnboundedReceiver<usize>) {
            let Some(mut response) = self.connect(request).await else {
                self.set_status(RequestStatus::Invalid);
                return;
            };
            let info = response_info(&response);
            self.callback.on_response_started(&info);
            self.set_status(RequestStatus::Idle);

            let mut pending = Bytes::new();
            while let Some(max_len) = reads.recv().await {
                self.set_status(RequestStatus::ReadingResponse);
                while pending.is_empty() {
                    match response.chunk().await {
                        Ok(Some(chunk)) => pending = chunk,
                        Ok(None) => {
                            self.set_status(RequestStatus::Invalid);
                            self.callback.on_succeeded(&info);
                            return;
                        }
                        Err(e) => {
                            self.set_status(RequestStatus::Invalid);
                            self.callback.on_failed(Some(&info), &map_error(&e));
                            return;
                        }
                    }
                }
                let chunk = pending.split_to(max_len.min(pending.len()));
                self.set_status(RequestStatus::Idle);
                self.callback.on_read_completed(&info, &chunk);
            }
        }

        /// Sends the request and walks redirects until a final response.
        async fn connect(&self, request: OutgoingRequest) -> Option<reqwest::Response> {
            let OutgoingRequest {
                mut url,
                mut method,
                headers,
                body,
            } = request;
            let mut body = body.and_then(|body| body.take());

            for _ in 0..=MAX_REDIRECTS {
                self.set_status(RequestStatus::SendingRequest);
                let mut builder = self.client.request(to_reqwest_method(method), url.clone());
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                if let Some(body) = &body {
                    builder = builder.body(body.clone());
                }

                self.set_status(RequestStatus::WaitingForResponse);
                let response = match builder.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        self.callback.on_failed(None, &map_error(&e));
                        return None;
                    }
                };

                let status = response.status().as_u16();
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let (true, Some(location)) = (is_redirect(status), location) else {
                    return Some(response);
                };

                let info = response_info(&response);
                let target = match url.join(&location) {
                    Ok(target) => target,
                    Err(e) => {
                        let error = EngineError::new(
                            EngineErrorKind::Other,
                            format!("invalid redirect location {location:?}: {e}"),
                        );
                        self.callback.on_failed(Some(&info), &error);
                        return None;
                    }
                };
                match self.callback.on_redirect_received(&info, target.as_str()) {
                    RedirectAction::Follow => {}
                    RedirectAction::Cancel => return None,
                }
                if !preserves_method(status) && method == Method::Post {
                    method = Method::Get;
                    body = None;
                }
                url = target;
            }

            let error = EngineError::new(
                EngineErrorKind::TooManyRedirects,
                format!("more than {MAX_REDIRECTS} redirects"),
            );
            self.callback.on_failed(None, &error);
            None
        }
    }

    fn to_reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }

    fn response_info(response: &reqwest::Response) -> ResponseInfo {
        let headers: ResponseHeaders = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let url: Url = response.url().clone();
        ResponseInfo::new(url, response.status().as_u16(), headers)
    }

    fn map_error(error: &reqwest::Error) -> EngineError {
        let kind = if error.is_timeout() {
            EngineErrorKind::TimedOut
        } else if is_dns_failure(error) {
            EngineErrorKind::HostNameNotResolved
        } else if error.is_connect() {
            EngineErrorKind::ConnectionFailed
        } else if error.is_redirect() {
            EngineErrorKind::TooManyRedirects
        } else {
            EngineErrorKind::Other
        };
        EngineError::new(kind, error.to_string())
    }

    /// hyper reports resolver failures only through the error message.
    fn is_dns_failure(error: &reqwest::Error) -> bool {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
        while let Some(current) = source {
            if current.to_string().contains("dns error") {
                return true;
            }
            source = current.source();
        }
        false
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::{MAX_REDIRECTS, ReqwestEngine};
