//! Rolling inference history
//!
//! Every attempt lands here, success or failure. The ring is bounded so a
//! long-lived worker never grows without limit; statistics are computed over
//! what the ring currently holds, not all-time.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default ring capacity
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// One inference attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRecord {
    pub inference_id: String,
    pub model_id: String,
    pub processing_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregates over the current ring contents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_records: usize,
    pub successes: usize,
    pub failures: usize,
    pub average_processing_ms: f64,
}

/// Bounded ring of inference records
pub struct InferenceHistory {
    capacity: usize,
    ring: Mutex<VecDeque<InferenceRecord>>,
}

impl InferenceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a record, dropping the oldest when full
    pub fn push(&self, record: InferenceRecord) {
        let mut ring = self.ring.lock().expect("history lock poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// The most recent `n` records, newest last
    pub fn recent(&self, n: usize) -> Vec<InferenceRecord> {
        let ring = self.ring.lock().expect("history lock poisoned");
        ring.iter().rev().take(n).rev().cloned().collect()
    }

    /// Aggregates over the ring
    pub fn stats(&self) -> HistoryStats {
        let ring = self.ring.lock().expect("history lock poisoned");
        let successes = ring.iter().filter(|r| r.success).count();
        let total_ms: u64 = ring.iter().map(|r| r.processing_ms).sum();
        let average = if ring.is_empty() {
            0.0
        } else {
            total_ms as f64 / ring.len() as f64
        };
        HistoryStats {
            total_records: ring.len(),
            successes,
            failures: ring.len() - successes,
            average_processing_ms: average,
        }
    }
}

impl Default for InferenceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, success: bool, ms: u64) -> InferenceRecord {
        InferenceRecord {
            inference_id: format!("inf-{}", id),
            model_id: "m1".to_string(),
            processing_ms: ms,
            timestamp: Utc::now(),
            success,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_ring_is_bounded() {
        let history = InferenceHistory::new(3);
        for i in 0..10 {
            history.push(record(i, true, 10));
        }
        let stats = history.stats();
        assert_eq!(stats.total_records, 3);

        let recent = history.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].inference_id, "inf-7");
        assert_eq!(recent[2].inference_id, "inf-9");
    }

    #[test]
    fn test_stats_over_ring_only() {
        let history = InferenceHistory::new(2);
        history.push(record(0, false, 100));
        history.push(record(1, true, 10));
        history.push(record(2, true, 20));

        // The failure has been pushed out of the ring
        let stats = history.stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.successes, 2);
        assert!((stats.average_processing_ms - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_history() {
        let history = InferenceHistory::default();
        let stats = history.stats();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.average_processing_ms, 0.0);
    }
}
