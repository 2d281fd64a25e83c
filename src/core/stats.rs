use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide observability sink. One instance per engine, shared by
/// reference; all counters are monotone.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub segments_decompressed: AtomicU64,
    pub postings_merged: AtomicU64,
    pub partitions_flushed: AtomicU64,
    pub queries_executed: AtomicU64,
}

/// Point-in-time copy of the counters, for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub segments_decompressed: u64,
    pub postings_merged: u64,
    pub partitions_flushed: u64,
    pub queries_executed: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        EngineStats::default()
    }

    pub fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_segments_decompressed(&self, n: u64) {
        self.segments_decompressed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_postings_merged(&self, n: u64) {
        self.postings_merged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            segments_decompressed: self.segments_decompressed.load(Ordering::Relaxed),
            postings_merged: self.postings_merged.load(Ordering::Relaxed),
            partitions_flushed: self.partitions_flushed.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
        }
    }
}
