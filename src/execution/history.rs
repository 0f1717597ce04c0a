use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// One finished execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: Uuid,
    pub duration: Duration,
    pub status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(task_id: Uuid, duration: Duration, status: ExecutionStatus) -> Self {
        Self {
            task_id,
            duration,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Fixed-capacity ring of recent executions, oldest dropped first
#[derive(Debug)]
pub struct BoundedHistory {
    records: RwLock<VecDeque<ExecutionRecord>>,
    capacity: usize,
}

impl BoundedHistory {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, record: ExecutionRecord) {
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Up to `n` most recent records, newest first
    pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
        self.records.read().iter().rev().take(n).cloned().collect()
    }

    /// Snapshot in insertion order, oldest first
    pub fn iter(&self) -> std::vec::IntoIter<ExecutionRecord> {
        self.records.read().iter().cloned().collect::<Vec<_>>().into_iter()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Share of retained records that succeeded; `0.0` when empty
    pub fn success_rate(&self) -> f64 {
        let records = self.records.read();
        if records.is_empty() {
            return 0.0;
        }
        let successes = records
            .iter()
            .filter(|record| record.status == ExecutionStatus::Success)
            .count();
        successes as f64 / records.len() as f64
    }

    pub fn average_duration(&self) -> Duration {
        let records = self.records.read();
        if records.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = records.iter().map(|record| record.duration).sum();
        total / records.len() as u32
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}
