use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::http::OneOrMany;

/// A completed request, as captured by the request logger middleware.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Upper-case HTTP method.
    pub method: String,
    /// Path portion of the request target.
    pub path: String,
    /// Query parameters as observed on the request.
    pub query: HashMap<String, OneOrMany>,
    /// Request headers as observed on the request.
    pub headers: HashMap<String, OneOrMany>,
    /// Cookies as observed on the request.
    pub cookies: HashMap<String, String>,
    /// Client address, best-effort.
    pub client_ip: String,
    /// Request body, capped at the logger's ceiling. `None` if the body
    /// exceeded the ceiling and was not captured.
    pub body: Option<Vec<u8>>,
    /// Wall-clock time the request started.
    pub started_at: SystemTime,
    /// How long the request took end to end.
    pub duration: Duration,
    /// Final HTTP status code written.
    pub status: u16,
    /// Number of response body bytes written.
    pub bytes_written: u64,
    /// Name of the handler that served the request, if any matched.
    pub handler_name: Option<String>,
}

/// A fixed-capacity, multi-writer FIFO of finished [`RequestRecord`]s.
///
/// Oldest records are evicted once the ring is full. Snapshots are taken
/// under the same mutex so readers always see a consistent view.
pub struct RequestRecordRing {
    capacity: usize,
    records: Mutex<VecDeque<RequestRecord>>,
}

impl RequestRecordRing {
    /// Create a ring holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        RequestRecordRing {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Publish a finished record, evicting the oldest one if full.
    pub fn push(&self, record: RequestRecord) {
        let mut records = self.records.lock().expect("request record ring poisoned");
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Snapshot all currently retained records, oldest first.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        let records = self.records.lock().expect("request record ring poisoned");
        records.iter().cloned().collect()
    }

    /// Number of records currently retained.
    pub fn len(&self) -> usize {
        self.records.lock().expect("request record ring poisoned").len()
    }

    /// Whether the ring currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u16) -> RequestRecord {
        RequestRecord {
            method: "GET".to_string(),
            path: "/".to_string(),
            query: HashMap::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            client_ip: "127.0.0.1".to_string(),
            body: None,
            started_at: SystemTime::now(),
            duration: Duration::from_millis(1),
            status,
            bytes_written: 0,
            handler_name: None,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let ring = RequestRecordRing::new(2);
        ring.push(record(200));
        ring.push(record(201));
        ring.push(record(202));
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].status, 201);
        assert_eq!(snapshot[1].status, 202);
    }
}
