use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    #[serde(rename = "durationMs", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub timestamp: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis().min(u128::from(u64::MAX)) as u64)
}

/// Bounded FIFO of recently settled requests.
pub(crate) struct RequestLog {
    entries: Mutex<VecDeque<RequestLogEntry>>,
    capacity: usize,
}

impl RequestLog {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub(crate) fn append(&self, entry: RequestLogEntry) {
        let mut entries = lock_unpoisoned(&self.entries);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub(crate) fn entries(&self) -> Vec<RequestLogEntry> {
        lock_unpoisoned(&self.entries).iter().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{RequestLog, RequestLogEntry};

    fn entry(index: u16) -> RequestLogEntry {
        RequestLogEntry {
            endpoint: format!("/loans/{index}"),
            method: "GET".to_owned(),
            status: 200,
            duration: Duration::from_millis(u64::from(index)),
            timestamp: SystemTime::UNIX_EPOCH,
            error: None,
        }
    }

    #[test]
    fn oldest_entries_are_evicted_at_capacity() {
        let log = RequestLog::new(3);
        for index in 0..5 {
            log.append(entry(index));
        }
        let endpoints: Vec<String> = log.entries().into_iter().map(|e| e.endpoint).collect();
        assert_eq!(endpoints, ["/loans/2", "/loans/3", "/loans/4"]);

        log.clear();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn entry_serializes_duration_in_millis() {
        let mut failed = entry(7);
        failed.status = 0;
        failed.error = Some("Network error. Please check your connection.".to_owned());
        let value = serde_json::to_value(&failed).expect("entry serializes");
        assert_eq!(value["durationMs"], 7);
        assert_eq!(value["status"], 0);
        assert_eq!(
            value["error"],
            "Network error. Please check your connection."
        );
    }
}
