use std::fmt;
use std::sync::Mutex;

use bytes::Bytes;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Request body that can be handed to the transport exactly once.
pub struct UploadBody {
    data: Mutex<Option<Bytes>>,
    len:  usize,
}

impl UploadBody {
    pub fn new(data: Bytes) -> Self {
        Self {
            len:  data.len(),
            data: Mutex::new(Some(data)),
        }
    }

    /// Size of the body in bytes, whether or not it was taken.
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Takes the body; later calls return `None`.
    pub fn take(&self) -> Option<Bytes> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadBody").field("len", &self.len).finish()
    }
}

/// A fully built request, ready to hand to an engine.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub url:     Url,
    pub method:  Method,
    pub headers: Vec<(String, String)>,
    pub body:    Option<UploadBody>,
}

impl OutgoingRequest {
    /// The first value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
