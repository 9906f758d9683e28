use std::collections::HashMap;
use std::fmt;

use url::Url;

/// Connection-establishment status of an in-flight request, as last reported
/// by the engine.
///
/// Carried by open failures so callers can tell, for example, a timeout while
/// resolving the host apart from one while waiting for the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RequestStatus {
    /// The request has finished or was never started.
    #[default]
    Invalid = 0,
    Idle = 1,
    ResolvingHost = 2,
    Connecting = 3,
    SslHandshake = 4,
    SendingRequest = 5,
    WaitingForResponse = 6,
    ReadingResponse = 7,
}

impl RequestStatus {
    /// Decodes a value stored with `as u8`; unknown values map to `Invalid`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => RequestStatus::Idle,
            2 => RequestStatus::ResolvingHost,
            3 => RequestStatus::Connecting,
            4 => RequestStatus::SslHandshake,
            5 => RequestStatus::SendingRequest,
            6 => RequestStatus::WaitingForResponse,
            7 => RequestStatus::ReadingResponse,
            _ => RequestStatus::Invalid,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Invalid => "Invalid",
            RequestStatus::Idle => "Idle",
            RequestStatus::ResolvingHost => "ResolvingHost",
            RequestStatus::Connecting => "Connecting",
            RequestStatus::SslHandshake => "SslHandshake",
            RequestStatus::SendingRequest => "SendingRequest",
            RequestStatus::WaitingForResponse => "WaitingForResponse",
            RequestStatus::ReadingResponse => "ReadingResponse",
        };
        f.write_str(name)
    }
}

/// Response header list in wire order.
///
/// Lookups are case-insensitive; names keep the case the engine delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(String, String)>,
}

impl ResponseHeaders {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// All values for `name`, in the order they were received.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The first value for `name`. The result borrows only from `self`.
    pub fn first<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Groups values by header name, keyed exactly as delivered. Names that
    /// differ only in case land under separate keys.
    pub fn to_multimap(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &self.entries {
            map.entry(name.clone()).or_default().push(value.clone());
        }
        map
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// What the engine reports about a response (or a redirect) when it invokes a
/// callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// URL the response was served from.
    pub url:     Url,
    pub status:  u16,
    pub headers: ResponseHeaders,
}

impl ResponseInfo {
    pub fn new(url: Url, status: u16, headers: ResponseHeaders) -> Self {
        Self {
            url,
            status,
            headers,
        }
    }
}

/// Response metadata accepted for the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub url:            Url,
    pub status:         u16,
    pub headers:        ResponseHeaders,
    /// Authoritative number of bytes the stream will deliver, if known.
    pub content_length: Option<u64>,
    /// Whether the body uses a non-identity `Content-Encoding`.
    pub compressed:     bool,
}
