use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Request headers applied to every attempt of a source.
///
/// Has its own lock, independent from the attempt state, so the caller may
/// edit headers while a request is in flight. Each attempt works from a
/// [`snapshot`](Self::snapshot). Setting a header replaces any previous value
/// for the same name, ignoring case.
#[derive(Debug, Default)]
pub struct HeaderStore {
    headers: Mutex<BTreeMap<String, (String, String)>>,
}

impl HeaderStore {
    pub fn new() -> Self { Self::default() }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.lock().insert(name.to_ascii_lowercase(), (name, value.into()));
    }

    pub fn remove(&self, name: &str) { self.lock().remove(&name.to_ascii_lowercase()); }

    pub fn clear(&self) { self.lock().clear(); }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(&name.to_ascii_lowercase()).map(|(_, value)| value.clone())
    }

    pub fn len(&self) -> usize { self.lock().len() }

    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Copies every header out under a single lock acquisition.
    pub fn snapshot(&self) -> Vec<(String, String)> { self.lock().values().cloned().collect() }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, (String, String)>> {
        self.headers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
