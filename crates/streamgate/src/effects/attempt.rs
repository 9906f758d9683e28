use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::core::ConnectDeadline;
use crate::data::{RequestSpec, ResponseMeta};
use crate::effects::http::UrlRequest;
use crate::error::SourceError;

/// Size of the receive buffer handed to the engine on each refill.
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Lifecycle of a data source.
///
/// A successful attempt only moves forward: Idle → Opening → Connected → Open.
/// `close` returns to Idle from anywhere. Failures do not move the state; they
/// are captured next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    /// `open` is waiting for response headers.
    Opening,
    /// Response headers were accepted; `open` has not returned yet.
    Connected,
    /// `open` returned; reads are allowed.
    Open,
}

/// Receive buffer and end-of-stream bookkeeping of one attempt.
#[derive(Debug)]
pub(crate) struct ReadBuffer {
    buf:       BytesMut,
    has_data:  bool,
    remaining: Option<u64>,
    finished:  bool,
    /// A receive was handed to the engine and has not completed yet.
    receiving: bool,
}

impl ReadBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buf:       BytesMut::with_capacity(READ_BUFFER_SIZE),
            has_data:  false,
            remaining: None,
            finished:  false,
            receiving: false,
        }
    }

    /// Starts counting down from a known, positive content length.
    pub(crate) fn expect(&mut self, content_length: Option<u64>) {
        self.remaining = content_length.filter(|&length| length > 0);
    }

    /// Marks a receive as outstanding. Returns `false` if one already is, in
    /// which case no new receive must be issued.
    pub(crate) fn begin_receive(&mut self) -> bool {
        !std::mem::replace(&mut self.receiving, true)
    }

    /// Completes the outstanding receive with `chunk`, appended after any
    /// bytes not yet consumed.
    pub(crate) fn fill(&mut self, chunk: &[u8]) {
        if chunk.len() > READ_BUFFER_SIZE {
            tracing::warn!(len = chunk.len(), "engine delivered more than requested");
        }
        self.receiving = false;
        self.buf.extend_from_slice(chunk);
        self.has_data = !self.buf.is_empty();
    }

    pub(crate) fn finish(&mut self) {
        self.receiving = false;
        self.finished = true;
    }

    pub(crate) fn has_data(&self) -> bool { self.has_data }

    pub(crate) fn is_finished(&self) -> bool { self.finished }

    /// The known content length has been fully delivered.
    pub(crate) fn is_exhausted(&self) -> bool { self.remaining == Some(0) }

    pub(crate) fn remaining(&self) -> Option<u64> { self.remaining }

    /// Copies buffered bytes into `dst` and advances the cursor.
    pub(crate) fn consume(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.buf.len());
        dst[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        if self.buf.is_empty() {
            self.has_data = false;
        }
        if let Some(remaining) = &mut self.remaining {
            *remaining = remaining.saturating_sub(n as u64);
        }
        n
    }
}

/// Everything that lives from `open` to `close`.
pub(crate) struct Attempt {
    pub(crate) generation: u64,
    pub(crate) spec:       RequestSpec,
    pub(crate) state:      ConnectionState,
    pub(crate) request:    Option<Arc<dyn UrlRequest>>,
    pub(crate) deadline:   ConnectDeadline,
    pub(crate) response:   Option<ResponseMeta>,
    /// First failure reported for this attempt; sticky until `close`.
    pub(crate) error:      Option<SourceError>,
    pub(crate) read:       ReadBuffer,
}

impl Attempt {
    pub(crate) fn new(generation: u64, spec: RequestSpec, deadline: ConnectDeadline) -> Self {
        Self {
            generation,
            spec,
            state: ConnectionState::Opening,
            request: None,
            deadline,
            response: None,
            error: None,
            read: ReadBuffer::new(),
        }
    }

    pub(crate) fn capture(&mut self, error: SourceError) {
        if self.error.is_none() {
            self.error = Some(error);
        } else {
            tracing::debug!(%error, "dropping secondary failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpenFailure;
    use std::time::{Duration, Instant};
    use url::Url;

    #[test]
    fn test_consume_in_pieces() {
        let mut read = ReadBuffer::new();
        read.expect(Some(6));
        read.fill(b"abcdef");

        let mut dst = [0u8; 4];
        assert_eq!(read.consume(&mut dst), 4);
        assert_eq!(&dst, b"abcd");
        assert!(read.has_data());
        assert_eq!(read.remaining(), Some(2));

        assert_eq!(read.consume(&mut dst), 2);
        assert_eq!(&dst[..2], b"ef");
        assert!(!read.has_data());
        assert!(read.is_exhausted());
    }

    #[test]
    fn test_unknown_or_zero_length_has_no_counter() {
        let mut read = ReadBuffer::new();
        read.expect(None);
        assert_eq!(read.remaining(), None);
        read.expect(Some(0));
        assert_eq!(read.remaining(), None);
        assert!(!read.is_exhausted());
    }

    #[test]
    fn test_empty_chunk_is_not_data() {
        let mut read = ReadBuffer::new();
        read.fill(b"");
        assert!(!read.has_data());
    }

    #[test]
    fn test_refill_reuses_buffer() {
        let mut read = ReadBuffer::new();
        let mut dst = [0u8; 3];
        for chunk in [&b"one"[..], &b"two"[..], &b"six"[..]] {
            read.fill(chunk);
            assert_eq!(read.consume(&mut dst), 3);
            assert_eq!(&dst, chunk);
        }
    }

    #[test]
    fn test_one_receive_outstanding_at_a_time() {
        let mut read = ReadBuffer::new();
        assert!(read.begin_receive());
        assert!(!read.begin_receive());

        read.fill(b"abc");
        assert!(read.begin_receive());
        assert!(!read.begin_receive());

        read.finish();
        assert!(read.begin_receive());
    }

    #[test]
    fn test_late_fill_keeps_unconsumed_bytes() {
        let mut read = ReadBuffer::new();
        read.fill(b"abc");
        let mut dst = [0u8; 1];
        assert_eq!(read.consume(&mut dst), 1);

        read.fill(b"def");
        let mut rest = [0u8; 8];
        assert_eq!(read.consume(&mut rest), 5);
        assert_eq!(&rest[..5], b"bcdef");
    }

    #[test]
    fn test_first_error_wins() {
        let spec = RequestSpec::new(Url::parse("http://host/").unwrap());
        let deadline = ConnectDeadline::start(Duration::from_secs(1), Instant::now());
        let mut attempt = Attempt::new(1, spec.clone(), deadline);

        attempt.capture(SourceError::Open {
            uri:    spec.uri.clone(),
            status: Default::default(),
            cause:  OpenFailure::ConnectTimeout,
        });
        attempt.capture(SourceError::IllegalState("later"));

        assert!(matches!(
            attempt.error,
            Some(SourceError::Open { cause: OpenFailure::ConnectTimeout, .. })
        ));
    }
}
