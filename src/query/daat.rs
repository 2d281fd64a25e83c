//! Document-at-a-time execution over document-level posting lists. A
//! min-heap of posting cursors is keyed on the current document (the tf bits
//! are masked out by comparing against `next | DOC_LEVEL_MAX_TF`); sentinel
//! cursors at +inf remove the end-of-heap branches, and each cursor buffers
//! PREVIEW postings to amortize list dispatch.
//!
//! With MaxScore, the term with the least possible contribution is removed
//! from the heap once the result heap's floor provably exceeds everything it
//! could add; its list is only probed for documents that already score close
//! to the floor.

use super::results::{ScoredExtent, ScoredHeap};
use crate::index::doclen::DocLenTable;
use crate::index::extent::{ExtentList, ExtentSource};
use crate::core::types::{
    DOC_LEVEL_MAX_TF, DOCUMENT_COUNT_OFFSET, MAX_POSTING, decode_doc_level_tf, doc_id_from_posting,
};
use roaring::RoaringTreemap;

/// Postings pulled from a list per refill.
pub const PREVIEW: usize = 64;

struct Cursor {
    preview: [u64; PREVIEW],
    position: usize,
    loaded: usize,
}

#[derive(Default)]
pub struct DaatOptions {
    pub use_max_score: bool,
    /// Score missing terms with their minimum contribution (Ntoulas-style
    /// upper-bounded evaluation); results become approximate.
    pub ntoulas: bool,
}

pub fn execute(
    lists: &mut [ExtentList],
    weights: &[f64],
    doclens: &DocLenTable,
    k1: f32,
    b: f32,
    count: usize,
    deleted: Option<&RoaringTreemap>,
    options: &DaatOptions,
) -> Vec<ScoredExtent> {
    let n = lists.len();
    if n == 0 || count == 0 {
        return Vec::new();
    }
    let avgdl = doclens.average_length().max(1.0);

    // Ntoulas mode needs each term's minimum observed contribution
    let min_contrib: Vec<f32> = if options.ntoulas {
        (0..n)
            .map(|i| {
                let mut least = (weights[i] as f32) * (k1 + 1.0);
                let mut cursor = 0u64;
                while let Some((s, _)) = lists[i].first_start_bigger_eq(cursor) {
                    if s >= DOCUMENT_COUNT_OFFSET {
                        break;
                    }
                    let dl = doclens.doc_length(doc_id_from_posting(s));
                    let tf = decode_doc_level_tf(s & DOC_LEVEL_MAX_TF);
                    let k = k1 * (1.0 - b + b * dl / avgdl);
                    least = least.min((weights[i] as f32) * (tf * (k1 + 1.0)) / (tf + k));
                    cursor = s + 1;
                }
                least
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut cursors: Vec<Cursor> = (0..n)
        .map(|_| Cursor { preview: [0; PREVIEW], position: PREVIEW, loaded: PREVIEW })
        .collect();

    // scorer heap with sentinels; entries are (next posting, term index)
    let mut heap: Vec<(u64, usize)> = Vec::with_capacity(2 * n + 2);
    for (i, list) in lists.iter_mut().enumerate() {
        let next = list.first_start_bigger_eq(0).map(|(s, _)| s).unwrap_or(MAX_POSTING);
        heap.push((next, i));
    }
    heap.sort_unstable();
    heap.resize(2 * n + 2, (MAX_POSTING, usize::MAX));

    // ----- MaxScore bookkeeping -----
    let mut eliminated: Vec<usize> = Vec::new();
    let mut eliminated_sum = 0.0f32;
    let mut least_term: Option<usize> = None;
    let mut least_impact = f32::MAX;
    if options.use_max_score {
        for i in 0..n {
            let impact = (weights[i] as f32) * (k1 + 1.0);
            if impact < least_impact {
                least_impact = impact;
                least_term = Some(i);
            }
        }
    }

    let mut results = ScoredHeap::new(count);
    let mut dummy_ends = [0u64; PREVIEW];

    while heap[0].0 < MAX_POSTING {
        let where_ = heap[0].0 | DOC_LEVEL_MAX_TF;
        if where_ >= DOCUMENT_COUNT_OFFSET {
            break;
        }
        let doc_id = doc_id_from_posting(where_);
        let dl = doclens.doc_length(doc_id);
        let k = k1 * (1.0 - b + b * dl / avgdl);

        let mut score = 0.0f32;
        let mut terms_in_document = 0u64;

        // drain every cursor sitting in the current document
        loop {
            let who = heap[0].1;
            let tf = decode_doc_level_tf(heap[0].0 & DOC_LEVEL_MAX_TF);
            score += (weights[who] as f32) * (tf * (k1 + 1.0)) / (tf + k);
            if who < 64 {
                terms_in_document |= 1 << who;
            }

            // pull the cursor's next posting, refilling its preview buffer
            let cursor = &mut cursors[who];
            let next = if cursor.position < cursor.loaded {
                let p = cursor.preview[cursor.position];
                cursor.position += 1;
                p
            } else if cursor.loaded >= PREVIEW {
                cursor.loaded = lists[who].next_n(
                    where_ + 1,
                    MAX_POSTING,
                    PREVIEW,
                    &mut cursor.preview,
                    &mut dummy_ends,
                );
                cursor.position = 0;
                if cursor.loaded > 0 {
                    cursor.position = 1;
                    cursor.preview[0]
                } else {
                    MAX_POSTING
                }
            } else {
                MAX_POSTING
            };

            // reheap; cursors within the same document compare equal
            if n <= 3 {
                let original = (next, who);
                heap[0] = original;
                if heap[1].0 < original.0 {
                    heap[0] = heap[1];
                    if heap[2].0 < original.0 {
                        heap[1] = heap[2];
                        heap[2] = original;
                    } else {
                        heap[1] = original;
                    }
                }
            } else {
                let original = (next, who);
                let mut node = 0;
                let mut left = 1;
                let mut right = 2;
                loop {
                    let child = if heap[right].0 < heap[left].0 { right } else { left };
                    if original.0 <= (heap[child].0 | DOC_LEVEL_MAX_TF) {
                        break;
                    }
                    heap[node] = heap[child];
                    node = child;
                    left = 2 * node + 1;
                    right = 2 * node + 2;
                }
                heap[node] = original;
            }

            if heap[0].0 > where_ {
                break;
            }
        }

        if deleted.is_some_and(|d| d.contains(doc_id)) {
            continue;
        }

        if options.ntoulas {
            for (i, &contribution) in min_contrib.iter().enumerate().take(64) {
                if terms_in_document & (1 << i) == 0 {
                    score += contribution;
                }
            }
        }

        if score + eliminated_sum > results.worst_score() {
            // lazily probe the lists MaxScore removed from the heap
            for &who in &eliminated {
                if let Some((s, _)) = lists[who].first_start_bigger_eq(where_ ^ DOC_LEVEL_MAX_TF) {
                    if s <= where_ {
                        let tf = decode_doc_level_tf(s & DOC_LEVEL_MAX_TF);
                        score += (weights[who] as f32) * (tf * (k1 + 1.0)) / (tf + k);
                    }
                }
            }
            if score <= results.worst_score() {
                continue;
            }

            let was_full = results.is_full();
            let mut extent = ScoredExtent::new(doc_id, doc_id, score);
            extent.additional = terms_in_document as u32;
            results.insert(extent);

            // MaxScore: once the floor covers the weakest essential term's
            // best case, stop iterating its list
            if options.use_max_score && was_full {
                while let Some(least) = least_term {
                    if results.worst_score() < eliminated_sum + least_impact {
                        break;
                    }
                    for entry in heap.iter_mut().take(n) {
                        if entry.1 == least {
                            entry.0 = MAX_POSTING;
                        }
                    }
                    heap[..n].sort_unstable();
                    eliminated_sum += least_impact;
                    eliminated.push(least);

                    least_term = None;
                    least_impact = f32::MAX;
                    for entry in heap.iter().take(n) {
                        if entry.0 != MAX_POSTING {
                            let impact = (weights[entry.1] as f32) * (k1 + 1.0);
                            if impact < least_impact {
                                least_impact = impact;
                                least_term = Some(entry.1);
                            }
                        }
                    }
                }
            }
        }
    }

    results.into_sorted_results()
}
