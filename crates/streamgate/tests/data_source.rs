//! Integration tests for the blocking data source.
//!
//! Most tests drive `EngineDataSource` with the scripted `MockEngine`. A small
//! hand-driven engine at the bottom covers callbacks that arrive after their
//! attempt was closed.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use streamgate::core::Clock;
use streamgate::{
    ConnectionState, DataSource, EngineDataSource, EngineError, EngineErrorKind, HttpDataSource,
    HttpEngine, Method, MockEngine, MockResponse, OpenFailure, OutgoingRequest, ReadFailure,
    ReadOutcome, RequestCallback, RequestSpec, RequestStatus, ResponseHeaders, ResponseInfo,
    SourceError, SourceOptions, TransferEvent, UrlRequest,
};
use url::Url;

fn url(path: &str) -> Url { Url::parse("https://media.example/").unwrap().join(path).unwrap() }

fn spec(path: &str) -> RequestSpec { RequestSpec::new(url(path)) }

fn body(len: usize) -> Vec<u8> { (0..len).map(|i| (i % 251) as u8).collect() }

/// Reads until end of stream, returning everything read.
fn drain<E: HttpEngine>(source: &EngineDataSource<E>, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        match source.read(&mut buf).unwrap() {
            ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
            ReadOutcome::EndOfStream => return out,
        }
    }
}

/// Clock that jumps forward by `step` on every query.
struct JumpingClock {
    base:  Instant,
    step:  Duration,
    ticks: AtomicU32,
}

impl JumpingClock {
    fn new(step: Duration) -> Self {
        Self {
            base: Instant::now(),
            step,
            ticks: AtomicU32::new(0),
        }
    }
}

impl Clock for JumpingClock {
    fn now(&self) -> Instant { self.base + self.step * self.ticks.fetch_add(1, Ordering::SeqCst) }
}

#[test]
fn test_open_read_close() {
    let engine = MockEngine::new();
    let data = body(100);
    engine.respond(MockResponse::ok(data.clone()));

    let source = EngineDataSource::new(engine.clone());
    assert_eq!(source.state(), ConnectionState::Idle);
    assert_eq!(source.open(spec("clip.mp4")).unwrap(), Some(100));
    assert_eq!(source.state(), ConnectionState::Open);

    assert_eq!(drain(&source, 16), data);
    assert_eq!(source.bytes_remaining(), Some(0));

    source.close();
    assert_eq!(source.state(), ConnectionState::Idle);
    assert_eq!(engine.log().cancels, 1);
}

#[test]
fn test_reads_after_exhaustion_skip_the_engine() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(10)));

    let source = EngineDataSource::new(engine.clone());
    source.open(spec("a")).unwrap();
    assert_eq!(drain(&source, 64).len(), 10);

    let reads = engine.log().reads;
    let mut buf = [0u8; 8];
    for _ in 0..3 {
        assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
    }
    assert_eq!(engine.log().reads, reads);
}

#[test]
fn test_unknown_length_ends_on_success() {
    let engine = MockEngine::new();
    let data = body(50);
    engine.respond(MockResponse::ok_unbounded(data.clone()).max_chunk(7));

    let source = EngineDataSource::new(engine.clone());
    assert_eq!(source.open(spec("live")).unwrap(), None);
    assert_eq!(drain(&source, 5), data);

    let reads = engine.log().reads;
    let mut buf = [0u8; 4];
    assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
    assert_eq!(engine.log().reads, reads);
}

#[test]
fn test_zero_length_response() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(Vec::<u8>::new()));

    let source = EngineDataSource::new(engine);
    assert_eq!(source.open(spec("empty")).unwrap(), Some(0));
    let mut buf = [0u8; 4];
    assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
}

#[test]
fn test_empty_destination_reads_nothing() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(4)));

    let source = EngineDataSource::new(engine.clone());
    source.open(spec("a")).unwrap();
    assert_eq!(source.read(&mut []).unwrap(), ReadOutcome::Data(0));
    assert_eq!(engine.log().reads, 0);
}

#[test]
fn test_range_and_headers_are_sent() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::partial(body(5), 10, 100));

    let source = EngineDataSource::new(engine.clone());
    source.set_request_header("User-Agent", "streamgate-test");
    source.set_request_header("X-Drop", "1");
    source.clear_request_header("x-drop");

    let length = source.open(spec("clip").position(10).length(5)).unwrap();
    assert_eq!(length, Some(5));

    let log = engine.log();
    let request = &log.requests[0];
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.header("range"), Some("bytes=10-14"));
    assert_eq!(request.header("user-agent"), Some("streamgate-test"));
    assert_eq!(request.header("x-drop"), None);
    assert_eq!(request.body, None);
}

#[test]
fn test_whole_resource_sends_no_range() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(3)));

    let source = EngineDataSource::new(engine.clone());
    source.open(spec("a")).unwrap();
    assert_eq!(engine.log().requests[0].header("Range"), None);
}

#[test]
fn test_content_range_longer_than_content_length_wins() {
    let engine = MockEngine::new();
    engine.respond(
        MockResponse::status(206)
            .header("Content-Length", "10")
            .header("Content-Range", "bytes 0-19/100")
            .body(body(20)),
    );

    let source = EngineDataSource::new(engine);
    assert_eq!(source.open(spec("a")).unwrap(), Some(20));
}

#[test]
fn test_unparsable_length_headers_are_ignored() {
    let engine = MockEngine::new();
    engine.respond(
        MockResponse::status(200)
            .header("Content-Length", "lots")
            .header("Content-Range", "bytes */100")
            .body(body(3)),
    );

    let source = EngineDataSource::new(engine);
    assert_eq!(source.open(spec("a")).unwrap(), None);
    assert_eq!(drain(&source, 8).len(), 3);
}

#[test]
fn test_compressed_body_uses_requested_length() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(10)).header("Content-Encoding", "gzip"));
    engine.respond(MockResponse::ok(body(10)).header("Content-Encoding", "gzip"));

    let source = EngineDataSource::new(engine);
    assert_eq!(source.open(spec("a").length(40)).unwrap(), Some(40));
    assert!(source.response().unwrap().compressed);
    source.close();

    assert_eq!(source.open(spec("a")).unwrap(), None);
}

#[test]
fn test_requested_length_mismatch_fails_open() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(10)));

    let source = EngineDataSource::new(engine);
    let error = source.open(spec("a").length(5)).unwrap_err();
    assert!(matches!(
        error,
        SourceError::Open {
            cause: OpenFailure::ContentLengthMismatch {
                requested: 5,
                resolved: 10
            },
            ..
        }
    ));
    assert_eq!(source.state(), ConnectionState::Opening);
    source.close();
}

#[test]
fn test_position_out_of_range() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::status(416).header("Content-Range", "bytes */100"));

    let source = EngineDataSource::new(engine);
    let error = source.open(spec("a").position(500)).unwrap_err();
    assert!(error.is_position_out_of_range());
    match error {
        SourceError::InvalidStatus { status, headers, .. } => {
            assert_eq!(status, 416);
            assert_eq!(headers["Content-Range"], vec!["bytes */100".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_other_status_has_no_range_cause() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::status(404));

    let source = EngineDataSource::new(engine);
    let error = source.open(spec("missing")).unwrap_err();
    assert!(matches!(error, SourceError::InvalidStatus { status: 404, cause: None, .. }));
    assert!(!error.is_position_out_of_range());
}

#[test]
fn test_content_type_predicate_rejects() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(3)).header("Content-Type", "text/html"));
    engine.respond(MockResponse::ok(body(3)).header("Content-Type", "video/mp4"));

    let options = SourceOptions::default()
        .content_type_predicate(|ct| ct.is_some_and(|ct| ct.starts_with("video/")));
    let source = EngineDataSource::new(engine).with_options(options);

    let error = source.open(spec("a")).unwrap_err();
    match error {
        SourceError::Open {
            cause: OpenFailure::InvalidContentType { content_type },
            ..
        } => assert_eq!(content_type.as_deref(), Some("text/html")),
        other => panic!("unexpected error: {other}"),
    }
    source.close();

    assert_eq!(source.open(spec("a")).unwrap(), Some(3));
}

#[test]
fn test_post_requires_content_type() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(2)));

    let source = EngineDataSource::new(engine.clone());
    let error = source.open(spec("upload").body(&b"{}"[..])).unwrap_err();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::MissingContentType, .. }));
    assert_eq!(engine.log().starts, 0);

    // A failed open still has to be closed.
    assert!(matches!(
        source.open(spec("upload")),
        Err(SourceError::IllegalState(_))
    ));
    source.close();

    source.set_request_header("content-type", "application/json");
    assert_eq!(source.open(spec("upload").body(&b"{}"[..])).unwrap(), Some(2));

    let log = engine.log();
    let request = &log.requests[0];
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
}

#[test]
fn test_post_rejects_method_preserving_redirects() {
    for status in [307, 308] {
        let engine = MockEngine::new();
        engine.respond(MockResponse::ok(body(2)).redirect(status, "/elsewhere"));

        let source = EngineDataSource::new(engine.clone());
        source.set_request_header("Content-Type", "text/plain");
        let error = source.open(spec("upload").body(&b"x"[..])).unwrap_err();

        assert!(matches!(
            error,
            SourceError::Open {
                cause: OpenFailure::RedirectNotAllowed { status: s },
                ..
            } if s == status
        ));
        let log = engine.log();
        assert!(log.followed_redirects.is_empty());
        assert_eq!(log.refused_redirects, 1);
    }
}

#[test]
fn test_post_follows_other_redirects() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(2)).redirect(303, "/result"));

    let source = EngineDataSource::new(engine.clone());
    source.set_request_header("Content-Type", "text/plain");
    assert_eq!(source.open(spec("upload").body(&b"x"[..])).unwrap(), Some(2));
    assert_eq!(
        engine.log().followed_redirects,
        vec!["https://media.example/result".to_string()]
    );
}

#[test]
fn test_get_follows_redirects_and_reports_final_uri() {
    let engine = MockEngine::new();
    engine.respond(
        MockResponse::ok(body(4))
            .redirect(302, "/hop")
            .redirect(307, "https://cdn.example/final")
            .header("X-Cache", "HIT")
            .header("x-cache", "MISS"),
    );

    let source = EngineDataSource::new(engine.clone()).with_options(
        SourceOptions::default().reset_timeout_on_redirect(true),
    );
    assert_eq!(source.uri(), None);
    assert_eq!(source.response_headers(), None);

    source.open(spec("start")).unwrap();
    assert_eq!(engine.log().followed_redirects.len(), 2);
    assert_eq!(source.uri().unwrap().as_str(), "https://cdn.example/final");
    let headers = source.response_headers().unwrap();
    assert_eq!(headers["X-Cache"], vec!["HIT".to_string()]);
    assert_eq!(headers["x-cache"], vec!["MISS".to_string()]);

    source.close();
    assert_eq!(source.uri(), None);
    assert_eq!(source.response_headers(), None);
}

#[test]
fn test_open_while_open_is_illegal() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(4)));
    engine.respond(MockResponse::ok(body(4)));

    let source = EngineDataSource::new(engine.clone());
    source.open(spec("a")).unwrap();

    let error = source.open(spec("b")).unwrap_err();
    assert!(matches!(error, SourceError::IllegalState(_)));
    assert_eq!(engine.log().starts, 1);
    assert_eq!(source.state(), ConnectionState::Open);
}

#[test]
fn test_read_requires_open() {
    let source = EngineDataSource::new(MockEngine::new());
    let mut buf = [0u8; 4];
    assert!(matches!(source.read(&mut buf), Err(SourceError::IllegalState(_))));
}

#[test]
fn test_close_is_idempotent() {
    let engine = MockEngine::new();
    let source = EngineDataSource::new(engine.clone());
    source.close();
    source.close();
    assert_eq!(engine.log().cancels, 0);
}

#[test]
fn test_connect_timeout_reports_status() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::hang());

    let source =
        EngineDataSource::new(engine.clone()).with_clock(JumpingClock::new(Duration::from_secs(10)));
    let error = source.open(spec("slow")).unwrap_err();

    assert!(error.is_timeout());
    assert!(matches!(
        error,
        SourceError::Open {
            status: RequestStatus::WaitingForResponse,
            cause: OpenFailure::ConnectTimeout,
            ..
        }
    ));
}

#[test]
fn test_reopen_after_hung_attempt() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::hang());
    engine.respond(MockResponse::ok(body(8)));

    let source = EngineDataSource::new(engine.clone())
        .with_options(SourceOptions::default().connect_timeout(Duration::from_millis(30)));

    let started = Instant::now();
    assert!(source.open(spec("a")).unwrap_err().is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(30));

    source.close();
    assert_eq!(source.open(spec("a")).unwrap(), Some(8));
    assert_eq!(drain(&source, 3).len(), 8);

    let log = engine.log();
    assert_eq!(log.starts, 2);
    assert_eq!(log.cancels, 1);
}

#[test]
fn test_unbounded_connect_timeout_waits_for_response() {
    let engine = MockEngine::threaded();
    engine.respond(MockResponse::ok(body(4)).delay(Duration::from_millis(20)));

    let source = EngineDataSource::new(engine)
        .with_options(SourceOptions::default().connect_timeout(Duration::MAX));
    assert_eq!(source.open(spec("a")).unwrap(), Some(4));
    assert_eq!(drain(&source, 4).len(), 4);
}

/// Two redirects, each answered 200 ms after the previous hop, so the final
/// response lands 600 ms after `start`.
fn slow_redirect_chain() -> MockEngine {
    let engine = MockEngine::threaded();
    engine.respond(
        MockResponse::ok(body(4))
            .redirect(302, "/hop")
            .redirect(302, "/final")
            .delay(Duration::from_millis(200))
            .hop_delay(Duration::from_millis(200)),
    );
    engine
}

#[test]
fn test_redirect_restarts_connect_timeout() {
    let engine = slow_redirect_chain();
    let source = EngineDataSource::new(engine.clone()).with_options(
        SourceOptions::default()
            .connect_timeout(Duration::from_millis(300))
            .reset_timeout_on_redirect(true),
    );

    assert_eq!(source.open(spec("start")).unwrap(), Some(4));
    assert_eq!(engine.log().followed_redirects.len(), 2);
    assert_eq!(source.uri().unwrap().path(), "/final");
}

#[test]
fn test_redirects_share_one_connect_timeout_by_default() {
    let engine = slow_redirect_chain();
    let source = EngineDataSource::new(engine)
        .with_options(SourceOptions::default().connect_timeout(Duration::from_millis(300)));

    let started = Instant::now();
    let error = source.open(spec("start")).unwrap_err();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::ConnectTimeout, .. }));
    assert!(started.elapsed() < Duration::from_millis(600));
    source.close();
}

#[test]
fn test_close_wakes_blocked_open() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::hang());

    let source = Arc::new(EngineDataSource::new(engine).with_options(
        SourceOptions::default().connect_timeout(Duration::from_secs(30)),
    ));
    let closer = {
        let source = Arc::clone(&source);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            source.close();
        })
    };

    let error = source.open(spec("a")).unwrap_err();
    closer.join().unwrap();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::Closed, .. }));
    assert_eq!(source.state(), ConnectionState::Idle);
}

#[test]
fn test_read_timeout() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(4)).hang_read_at(2));

    let source = EngineDataSource::new(engine)
        .with_options(SourceOptions::default().read_timeout(Duration::from_millis(30)));
    source.open(spec("a")).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Data(2));
    let error = source.read(&mut buf).unwrap_err();
    assert!(error.is_timeout());
    assert!(matches!(error, SourceError::Read { cause: ReadFailure::Timeout(_), .. }));
}

#[test]
fn test_transport_failure_mid_stream() {
    let engine = MockEngine::new();
    let failure = EngineError::new(EngineErrorKind::ConnectionFailed, "reset by peer");
    engine.respond(MockResponse::ok(body(6)).fail_read_at(3, failure.clone()));

    let source = EngineDataSource::new(engine);
    source.open(spec("a")).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Data(3));
    let error = source.read(&mut buf).unwrap_err();
    match &error {
        SourceError::Read {
            cause: ReadFailure::Transport(cause),
            ..
        } => assert_eq!(cause, &failure),
        other => panic!("unexpected error: {other}"),
    }
    // The failure is sticky until close.
    assert!(matches!(source.read(&mut buf), Err(SourceError::Read { .. })));
}

#[test]
fn test_unresolved_host() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::fail(EngineError::new(
        EngineErrorKind::HostNameNotResolved,
        "no such host",
    )));
    engine.respond(MockResponse::fail(EngineError::new(
        EngineErrorKind::ConnectionFailed,
        "refused",
    )));

    let source = EngineDataSource::new(engine);
    let error = source.open(spec("a")).unwrap_err();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::HostNotResolved(_), .. }));
    source.close();

    let error = source.open(spec("a")).unwrap_err();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::Transport(_), .. }));
}

#[test]
fn test_engine_refusing_request() {
    let source = EngineDataSource::new(MockEngine::new());
    let error = source.open(spec("a")).unwrap_err();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::Transport(_), .. }));
    source.close();
    assert_eq!(source.state(), ConnectionState::Idle);
}

#[test]
fn test_transfer_events() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    let options = SourceOptions::default().on_transfer(move |event| {
        let line = match event {
            TransferEvent::Started { spec } => format!("started {}", spec.uri.path()),
            TransferEvent::BytesTransferred(n) => format!("bytes {n}"),
            TransferEvent::Ended => "ended".to_string(),
        };
        recorded.lock().unwrap().push(line);
    });

    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(10)));
    engine.respond(MockResponse::status(500));

    let source = EngineDataSource::new(engine).with_options(options);
    source.open(spec("clip")).unwrap();
    drain(&source, 4);
    source.close();

    // A failed open neither starts nor ends a transfer.
    assert!(source.open(spec("clip")).is_err());
    source.close();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["started /clip", "bytes 4", "bytes 4", "bytes 2", "ended"]
    );
}

#[test]
fn test_io_read_adapter() {
    let engine = MockEngine::new();
    let data = body(300);
    engine.respond(MockResponse::ok(data.clone()).max_chunk(64));

    let mut source = EngineDataSource::new(engine);
    source.open(spec("a")).unwrap();

    let mut out = Vec::new();
    std::io::Read::read_to_end(&mut source, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_io_read_timeout_kind() {
    let engine = MockEngine::new();
    engine.respond(MockResponse::ok(body(4)).hang_read_at(0));

    let mut source = EngineDataSource::new(engine)
        .with_options(SourceOptions::default().read_timeout(Duration::from_millis(20)));
    source.open(spec("a")).unwrap();

    let mut buf = [0u8; 4];
    let error = std::io::Read::read(&mut source, &mut buf).unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::TimedOut);
}

#[test]
fn test_threaded_engine_full_transfer() {
    let engine = MockEngine::threaded();
    let data = body(10_000);
    engine.respond(MockResponse::ok(data.clone()).max_chunk(333).delay(Duration::from_millis(5)));

    let source = EngineDataSource::new(engine.clone());
    assert_eq!(source.open(spec("big")).unwrap(), Some(10_000));
    assert_eq!(drain(&source, 1000), data);

    // One receive per delivered chunk; the last counted byte ends the stream.
    assert_eq!(engine.log().reads, 10_000usize.div_ceil(333));
}

#[test]
fn test_threaded_late_response_after_close_is_dropped() {
    let engine = MockEngine::threaded();
    engine.respond(MockResponse::ok(body(4)).delay(Duration::from_millis(400)));
    engine.respond(MockResponse::ok(body(6)));

    let source = EngineDataSource::new(engine)
        .with_options(SourceOptions::default().connect_timeout(Duration::from_millis(100)));
    assert!(source.open(spec("a")).unwrap_err().is_timeout());
    source.close();

    assert_eq!(source.open(spec("b")).unwrap(), Some(6));
    thread::sleep(Duration::from_millis(450));
    assert_eq!(source.response().unwrap().content_length, Some(6));
    assert_eq!(drain(&source, 4).len(), 6);
}

/// Engine whose requests never act on their own; tests fire the callbacks.
#[derive(Default)]
struct ManualEngine {
    callbacks: Mutex<Vec<Arc<dyn RequestCallback>>>,
    reads:     Arc<AtomicUsize>,
}

impl ManualEngine {
    fn callback(&self, index: usize) -> Option<Arc<dyn RequestCallback>> {
        self.callbacks.lock().unwrap().get(index).cloned()
    }

    /// Receives issued across all requests.
    fn reads(&self) -> usize { self.reads.load(Ordering::SeqCst) }
}

struct IdleRequest {
    reads: Arc<AtomicUsize>,
}

impl UrlRequest for IdleRequest {
    fn start(&self) {}

    fn read(&self, _max_len: usize) { self.reads.fetch_add(1, Ordering::SeqCst); }

    fn cancel(&self) {}

    fn status(&self) -> RequestStatus { RequestStatus::WaitingForResponse }
}

impl HttpEngine for ManualEngine {
    fn new_request(
        &self,
        _request: OutgoingRequest,
        callback: Arc<dyn RequestCallback>,
    ) -> Result<Arc<dyn UrlRequest>, EngineError> {
        self.callbacks.lock().unwrap().push(callback);
        Ok(Arc::new(IdleRequest {
            reads: Arc::clone(&self.reads),
        }))
    }
}

fn ok_info(length: usize) -> ResponseInfo {
    ResponseInfo::new(
        url("a"),
        200,
        ResponseHeaders::new().with("Content-Length", length.to_string()),
    )
}

/// Waits until the engine has handed out callback `index`.
fn wait_for_callback(engine: &ManualEngine, index: usize) -> Arc<dyn RequestCallback> {
    loop {
        if let Some(callback) = engine.callback(index) {
            return callback;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_stale_callbacks_do_not_touch_new_attempt() {
    let source = Arc::new(EngineDataSource::new(ManualEngine::default()));

    let driver = {
        let source = Arc::clone(&source);
        thread::spawn(move || {
            let first = wait_for_callback(source.engine(), 0);
            first.on_failed(None, &EngineError::new(EngineErrorKind::ConnectionFailed, "refused"));

            let second = wait_for_callback(source.engine(), 1);
            first.on_response_started(&ok_info(3));
            second.on_response_started(&ok_info(5));
        })
    };

    let error = source.open(spec("a")).unwrap_err();
    assert!(matches!(error, SourceError::Open { cause: OpenFailure::Transport(_), .. }));
    source.close();

    assert_eq!(source.open(spec("a")).unwrap(), Some(5));
    driver.join().unwrap();

    let stale = source.engine().callback(0).unwrap();
    stale.on_read_completed(&ok_info(3), b"xyz");
    stale.on_failed(None, &EngineError::new(EngineErrorKind::Other, "late"));
    stale.on_succeeded(&ok_info(3));

    assert_eq!(source.state(), ConnectionState::Open);
    assert_eq!(source.bytes_remaining(), Some(5));
    assert_eq!(source.response().unwrap().content_length, Some(5));
}

#[test]
fn test_callbacks_after_drop_are_ignored() {
    let source = EngineDataSource::new(ManualEngine::default())
        .with_options(SourceOptions::default().connect_timeout(Duration::from_millis(10)));
    assert!(source.open(spec("a")).is_err());
    let callback = source.engine().callback(0).unwrap();
    drop(source);

    callback.on_response_started(&ok_info(1));
    callback.on_failed(None, &EngineError::new(EngineErrorKind::Other, "late"));
}

#[test]
fn test_read_after_timeout_keeps_outstanding_receive() {
    let source = Arc::new(
        EngineDataSource::new(ManualEngine::default())
            .with_options(SourceOptions::default().read_timeout(Duration::from_millis(30))),
    );
    let driver = {
        let source = Arc::clone(&source);
        thread::spawn(move || wait_for_callback(source.engine(), 0).on_response_started(&ok_info(6)))
    };
    assert_eq!(source.open(spec("a")).unwrap(), Some(6));
    driver.join().unwrap();
    let callback = source.engine().callback(0).unwrap();

    // Retrying a timed-out read waits on the same receive.
    let mut buf = [0u8; 2];
    for _ in 0..2 {
        assert!(source.read(&mut buf).unwrap_err().is_timeout());
    }
    assert_eq!(source.engine().reads(), 1);

    callback.on_read_completed(&ok_info(6), b"abc");
    assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Data(2));
    assert_eq!(&buf, b"ab");
    assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Data(1));
    assert_eq!(&buf[..1], b"c");
    assert_eq!(source.engine().reads(), 1);

    assert!(source.read(&mut buf).unwrap_err().is_timeout());
    assert_eq!(source.engine().reads(), 2);
    callback.on_read_completed(&ok_info(6), b"def");
    assert_eq!(drain(&*source, 2), b"def");
    assert_eq!(source.bytes_remaining(), Some(0));
    assert_eq!(source.engine().reads(), 2);
}
