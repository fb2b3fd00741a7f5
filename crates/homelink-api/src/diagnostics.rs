// Bounded diagnostic history.
//
// Request and event logs exist purely for inspection. They are
// fixed-capacity FIFO buffers: appends evict the oldest entry silently,
// and snapshots copy out `Arc`s so readers hold the lock only briefly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default capacity of an [`ApplianceClient`](crate::ApplianceClient) request log.
pub const REQUEST_LOG_CAPACITY: usize = 50;

/// Default capacity of an [`EventStream`](crate::EventStream) event log.
pub const EVENT_LOG_CAPACITY: usize = 150;

// ── DiagnosticLog ────────────────────────────────────────────────────

/// Fixed-capacity, insertion-ordered log of immutable entries.
#[derive(Debug)]
pub struct DiagnosticLog<T> {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<T>>>,
}

impl<T> DiagnosticLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Create a log pre-seeded with earlier history (oldest first).
    ///
    /// Only the newest `capacity` entries of `history` are kept.
    pub fn with_history(capacity: usize, history: impl IntoIterator<Item = Arc<T>>) -> Self {
        let log = Self::new(capacity);
        for entry in history {
            log.push_arc(entry);
        }
        log
    }

    pub fn push(&self, entry: T) {
        self.push_arc(Arc::new(entry));
    }

    pub fn push_arc(&self, entry: Arc<T>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().expect("diagnostic log lock poisoned");
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .lock()
            .expect("diagnostic log lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("diagnostic log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ── Request records ──────────────────────────────────────────────────

/// One HTTP attempt, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub appliance_id: Option<String>,
    pub request: RequestSnapshot,
    /// `None` when the attempt failed before a response arrived.
    pub response: Option<ResponseSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestSnapshot {
    /// Capture a request, redacting the bearer token.
    pub(crate) fn capture(request: &reqwest::Request) -> Self {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = if *name == reqwest::header::AUTHORIZATION {
                    "Bearer ***".to_owned()
                } else {
                    value.to_str().unwrap_or("<binary>").to_owned()
                };
                (name.as_str().to_owned(), value)
            })
            .collect();
        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map(|bytes| pretty_body(&String::from_utf8_lossy(bytes)));

        Self {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers,
            body,
        }
    }
}

impl ResponseSnapshot {
    pub(crate) fn new(status: u16, headers: &reqwest::header::HeaderMap, body: &str) -> Self {
        Self {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_owned(),
                        value.to_str().unwrap_or("<binary>").to_owned(),
                    )
                })
                .collect(),
            body: (!body.is_empty()).then(|| pretty_body(body)),
        }
    }
}

/// Pretty-print a JSON body, or return it unchanged when it is not JSON.
pub fn pretty_body(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| raw.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keeps_last_capacity_entries_in_order() {
        let log = DiagnosticLog::new(50);
        for i in 0..57 {
            log.push(i);
        }
        let entries: Vec<i32> = log.snapshot().iter().map(|e| **e).collect();
        assert_eq!(entries, (7..57).collect::<Vec<_>>());
        assert_eq!(log.len(), 50);
    }

    #[test]
    fn history_is_truncated_to_capacity() {
        let history = (0..5).map(Arc::new);
        let log = DiagnosticLog::with_history(3, history);
        let entries: Vec<i32> = log.snapshot().iter().map(|e| **e).collect();
        assert_eq!(entries, vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_log_stays_empty() {
        let log = DiagnosticLog::new(0);
        log.push("x");
        assert!(log.is_empty());
    }

    #[test]
    fn pretty_body_formats_json_only() {
        assert_eq!(pretty_body(r#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(pretty_body("not json"), "not json");
    }

    #[test]
    fn request_capture_redacts_bearer() {
        let client = reqwest::Client::new();
        let request = client
            .get("https://api.home-connect.com/api/homeappliances")
            .header(reqwest::header::AUTHORIZATION, "Bearer secret-token")
            .header(reqwest::header::ACCEPT, "application/vnd.bsh.sdk.v1+json")
            .build()
            .unwrap();

        let snapshot = RequestSnapshot::capture(&request);
        assert_eq!(snapshot.method, "GET");
        assert!(
            snapshot
                .headers
                .iter()
                .any(|(k, v)| k == "authorization" && v == "Bearer ***")
        );
        assert!(!format!("{snapshot:?}").contains("secret-token"));
    }
}
