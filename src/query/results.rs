//! Scored results and the bounded top-k heap.
//!
//! The heap is a min-heap over scores kept in an array of `2k + 2` slots;
//! the slots past `k` hold +inf sentinels so the reheap loop never checks
//! whether a child exists.

use crate::core::types::Posting;
use serde::Serialize;

/// One ranked search result: the matching region, the containing document,
/// and its score. `additional` carries executor-specific bits (e.g. which
/// query terms matched).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoredExtent {
    pub from: Posting,
    pub to: Posting,
    pub container_from: Posting,
    pub container_to: Posting,
    pub score: f32,
    pub additional: u32,
}

impl ScoredExtent {
    pub fn new(from: Posting, to: Posting, score: f32) -> ScoredExtent {
        ScoredExtent { from, to, container_from: from, container_to: to, score, additional: 0 }
    }
}

/// Sort by decreasing score; equal scores order by ascending position.
pub fn sort_results_by_score(results: &mut [ScoredExtent]) {
    results.sort_by(|a, b| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.from.cmp(&b.from))
    });
}

/// Inverse order, used to heapify the first k candidates.
pub fn sort_results_by_score_inverted(results: &mut [ScoredExtent]) {
    results.sort_by(|a, b| {
        a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal).then(b.from.cmp(&a.from))
    });
}

pub struct ScoredHeap {
    entries: Vec<ScoredExtent>,
    capacity: usize,
    used: usize,
}

impl ScoredHeap {
    pub fn new(capacity: usize) -> ScoredHeap {
        ScoredHeap { entries: Vec::with_capacity(2 * capacity + 2), capacity, used: 0 }
    }

    /// Worst score currently needed to enter the result set. Zero until the
    /// heap fills, so only positive scores ever qualify.
    pub fn worst_score(&self) -> f32 {
        if self.used < self.capacity { 0.0 } else { self.entries[0].score }
    }

    pub fn is_full(&self) -> bool {
        self.used >= self.capacity
    }

    pub fn insert(&mut self, candidate: ScoredExtent) {
        if self.capacity == 0 || candidate.score <= self.worst_score() {
            return;
        }
        if self.used < self.capacity {
            self.entries.push(candidate);
            self.used += 1;
            if self.used == self.capacity {
                // heapify: ascending order is a valid min-heap, then plant
                // the sentinels that spare the reheap loop its bound checks
                sort_results_by_score_inverted(&mut self.entries);
                let sentinel = ScoredExtent::new(0, 0, f32::INFINITY);
                self.entries.resize(2 * self.capacity + 2, sentinel);
            }
            return;
        }

        // replace the minimum and sift down; sentinel children terminate
        let mut node = 0;
        let mut child = 1;
        loop {
            if self.entries[child + 1].score < self.entries[child].score {
                child += 1;
            }
            if self.entries[child].score >= candidate.score {
                break;
            }
            self.entries[node] = self.entries[child];
            node = child;
            child = 2 * node + 1;
        }
        self.entries[node] = candidate;
    }

    /// Extract the collected results, best first.
    pub fn into_sorted_results(mut self) -> Vec<ScoredExtent> {
        self.entries.truncate(self.used);
        sort_results_by_score(&mut self.entries);
        self.entries
    }
}

/// Plain result line: `id score from to`.
pub fn format_result_line(query_id: &str, result: &ScoredExtent) -> String {
    format!("{} {:.6} {} {}", query_id, result.score, result.from, result.to)
}

/// TREC run-file line: `qid Q0 docid rank score runid`.
pub fn format_trec_line(
    query_id: &str,
    document_id: &str,
    rank: usize,
    result: &ScoredExtent,
    run_id: &str,
) -> String {
    format!("{} Q0 {} {} {:.6} {}", query_id, document_id, rank, result.score, run_id)
}
