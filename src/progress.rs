//! Fast-path progress snapshots for polling clients.
//!
//! [`ProgressCache`] is the ephemeral read side of job progress: written by
//! the single worker that owns a job, read by any number of pollers, and
//! expired by TTL when nobody asks. It is derived state — it may lag the
//! durable job record but must never lead it, and within a job both the
//! percentage and every element counter are monotonically non-decreasing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// Prune threshold: expired entries are swept when the map outgrows this.
const PRUNE_AT: usize = 256;

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job: JobId,
    pub status: JobStatus,
    /// 0–100, never decreasing within a job.
    pub percent: u8,
    /// Human-readable description of the current stage.
    pub stage_description: String,
    /// Detected element counters (headings, images, tables, ...), each
    /// monotonically non-decreasing.
    pub elements_detected: HashMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(job: JobId, status: JobStatus, percent: u8, description: impl Into<String>) -> Self {
        Self {
            job,
            status,
            percent: percent.min(100),
            stage_description: description.into(),
            elements_detected: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_elements(mut self, elements: HashMap<String, u64>) -> Self {
        self.elements_detected = elements;
        self
    }
}

/// Sink for progress updates. The cache implements it; tests substitute a
/// recording sink.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, snapshot: ProgressSnapshot);
}

struct CacheEntry {
    snapshot: ProgressSnapshot,
    expires_at: Instant,
}

/// TTL-bounded progress cache.
///
/// Single writer per job (the owning worker), many readers. Publishing a
/// snapshot that would move percent backwards, or shrink a counter, is
/// clamped against the cached value: retries and re-publishes can only
/// hold or advance what pollers see.
pub struct ProgressCache {
    entries: RwLock<HashMap<JobId, CacheEntry>>,
    ttl: Duration,
}

impl ProgressCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Current snapshot for a job, if present and not expired.
    pub fn get(&self, job: JobId) -> Option<ProgressSnapshot> {
        let entries = self.entries.read();
        entries.get(&job).and_then(|e| {
            if Instant::now() >= e.expires_at {
                None
            } else {
                Some(e.snapshot.clone())
            }
        })
    }

    fn merge(previous: &ProgressSnapshot, mut next: ProgressSnapshot) -> ProgressSnapshot {
        next.percent = next.percent.max(previous.percent);
        for (name, count) in &previous.elements_detected {
            let entry = next.elements_detected.entry(name.clone()).or_insert(0);
            *entry = (*entry).max(*count);
        }
        next
    }
}

impl ProgressSink for ProgressCache {
    fn publish(&self, snapshot: ProgressSnapshot) {
        let mut entries = self.entries.write();

        let merged = match entries.get(&snapshot.job) {
            Some(existing) => Self::merge(&existing.snapshot, snapshot),
            None => snapshot,
        };

        entries.insert(
            merged.job,
            CacheEntry {
                snapshot: merged,
                expires_at: Instant::now() + self.ttl,
            },
        );

        if entries.len() > PRUNE_AT {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ProgressCache {
        ProgressCache::new(Duration::from_secs(60))
    }

    fn snapshot(job: JobId, percent: u8) -> ProgressSnapshot {
        ProgressSnapshot::new(job, JobStatus::Running, percent, "converting document")
    }

    #[test]
    fn test_publish_and_get() {
        let cache = cache();
        let job = JobId::new();
        cache.publish(snapshot(job, 25));

        let got = cache.get(job).unwrap();
        assert_eq!(got.percent, 25);
        assert_eq!(got.stage_description, "converting document");
    }

    #[test]
    fn test_missing_job_is_none() {
        assert!(cache().get(JobId::new()).is_none());
    }

    #[test]
    fn test_percent_never_decreases() {
        let cache = cache();
        let job = JobId::new();
        cache.publish(snapshot(job, 60));
        cache.publish(snapshot(job, 30));

        assert_eq!(cache.get(job).unwrap().percent, 60);
    }

    #[test]
    fn test_counters_merge_by_max() {
        let cache = cache();
        let job = JobId::new();

        let mut first = HashMap::new();
        first.insert("images".to_string(), 5);
        first.insert("tables".to_string(), 2);
        cache.publish(snapshot(job, 40).with_elements(first));

        let mut second = HashMap::new();
        second.insert("images".to_string(), 3); // lower: must not shrink
        second.insert("headings".to_string(), 7);
        cache.publish(snapshot(job, 70).with_elements(second));

        let got = cache.get(job).unwrap();
        assert_eq!(got.elements_detected["images"], 5);
        assert_eq!(got.elements_detected["tables"], 2);
        assert_eq!(got.elements_detected["headings"], 7);
        assert_eq!(got.percent, 70);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = ProgressCache::new(Duration::ZERO);
        let job = JobId::new();
        cache.publish(snapshot(job, 10));
        assert!(cache.get(job).is_none());
    }

    #[test]
    fn test_percent_capped_at_100() {
        let snap = ProgressSnapshot::new(JobId::new(), JobStatus::Completed, 250, "done");
        assert_eq!(snap.percent, 100);
    }

    #[test]
    fn test_jobs_are_independent() {
        let cache = cache();
        let a = JobId::new();
        let b = JobId::new();
        cache.publish(snapshot(a, 90));
        cache.publish(snapshot(b, 10));

        assert_eq!(cache.get(a).unwrap().percent, 90);
        assert_eq!(cache.get(b).unwrap().percent, 10);
    }
}
