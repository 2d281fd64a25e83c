//! Term-at-a-time execution. Terms are processed in increasing document
//! frequency order into a bounded accumulator table kept sorted by document
//! id. Once the table would overflow, a per-chunk histogram of observed tf
//! buckets raises the minimum tf required to open a new accumulator, so the
//! remaining budget is spent on the most promising documents.

use super::results::{ScoredExtent, ScoredHeap};
use crate::core::types::{
    DOC_LEVEL_MAX_TF, DOC_LEVEL_SHIFT, DOCUMENT_COUNT_OFFSET, MAX_POSTING, decode_doc_level_tf,
};
use crate::index::doclen::DocLenTable;
use crate::index::extent::{ExtentList, ExtentSource};
use roaring::RoaringTreemap;

const CHUNK_SIZE: usize = 128;
/// Histogram buckets for adaptive pruning; tf buckets above are folded in.
const PRUNING_TF_BUCKETS: usize = 16;

#[derive(Clone, Copy)]
struct Accumulator {
    doc_id: u64,
    score: f32,
    k: f32,
}

#[allow(clippy::too_many_arguments)]
pub fn execute(
    lists: &mut [ExtentList],
    weights: &[f64],
    doclens: &DocLenTable,
    k1: f32,
    b: f32,
    count: usize,
    accumulator_limit: usize,
    use_max_score: bool,
    deleted: Option<&RoaringTreemap>,
) -> Vec<ScoredExtent> {
    let n = lists.len();
    if n == 0 || count == 0 || accumulator_limit == 0 {
        return Vec::new();
    }
    let avgdl = doclens.average_length().max(1.0);

    let mut order: Vec<usize> = (0..n).collect();
    let lengths: Vec<u64> = lists.iter_mut().map(|l| l.length()).collect();
    order.sort_by_key(|&i| lengths[i]);

    let mut limit = accumulator_limit;
    let mut accumulators: Vec<Accumulator> = Vec::new();

    for (position, &who) in order.iter().enumerate() {
        let weight = weights[who] as f32;
        let list = &mut lists[who];
        let list_length = lengths[who] as usize;

        // best case any unseen document can still reach from here on
        let max_impact_left: f32 = order[position..]
            .iter()
            .map(|&k| (weights[k] as f32) * (k1 + 1.0))
            .sum();
        let mut above_max_impact_left = 0usize;

        let needs_pruning = accumulators.len() + list_length > limit;
        let mut min_tf_for_new = 1u64;
        let mut tf_counts = [0u64; PRUNING_TF_BUCKETS];
        let mut chunks_done = 0usize;

        let mut merged: Vec<Accumulator> = Vec::with_capacity(accumulators.len().min(limit) + 16);
        let mut used = accumulators.len();
        let mut in_pos = 0usize;

        let mut starts = [0u64; CHUNK_SIZE];
        let mut ends = [0u64; CHUNK_SIZE];
        let mut cursor = 0u64;
        let mut left = list_length;
        'chunks: while left > 0 {
            let take = left.min(CHUNK_SIZE);
            let got = list.next_n(cursor, MAX_POSTING, take, &mut starts, &mut ends);
            if got == 0 {
                break;
            }
            left -= got;
            chunks_done += 1;

            for &posting in &starts[..got] {
                if posting >= DOCUMENT_COUNT_OFFSET {
                    break 'chunks;
                }
                let doc_id = posting >> DOC_LEVEL_SHIFT;
                while in_pos < accumulators.len() && accumulators[in_pos].doc_id < doc_id {
                    merged.push(accumulators[in_pos]);
                    in_pos += 1;
                }
                let tf_bucket = posting & DOC_LEVEL_MAX_TF;
                let tf = decode_doc_level_tf(tf_bucket);

                if in_pos < accumulators.len() && accumulators[in_pos].doc_id == doc_id {
                    let mut acc = accumulators[in_pos];
                    in_pos += 1;
                    acc.score += weight * tf * (k1 + 1.0) / (tf + acc.k);
                    if use_max_score && acc.score > max_impact_left {
                        above_max_impact_left += 1;
                        if above_max_impact_left >= count {
                            // enough candidates already beat anything new
                            limit = used;
                        }
                    }
                    merged.push(acc);
                } else if used < limit {
                    if needs_pruning {
                        tf_counts[(tf_bucket as usize).min(PRUNING_TF_BUCKETS - 1)] += 1;
                        if tf_bucket < min_tf_for_new {
                            continue;
                        }
                    }
                    let k = k1 * (1.0 - b + b * doclens.doc_length(doc_id) / avgdl);
                    used += 1;
                    merged.push(Accumulator {
                        doc_id,
                        score: weight * tf * (k1 + 1.0) / (tf + k),
                        k,
                    });
                }
            }
            cursor = starts[got - 1] + 1;
            if used >= limit {
                break;
            }

            if needs_pruning {
                // re-aim the tf floor so the remaining budget lasts the list
                let chunks_left = (left / CHUNK_SIZE) as f64;
                let budget_left = limit.saturating_sub(used) as f64;
                let allowed_per_chunk = budget_left / (chunks_left + 0.5);
                let per_chunk = 1.0 / chunks_done as f64;
                let mut sum = 0.0;
                min_tf_for_new = 1;
                for t in (1..PRUNING_TF_BUCKETS).rev() {
                    sum += tf_counts[t] as f64 * per_chunk;
                    if sum > allowed_per_chunk {
                        min_tf_for_new = t as u64 + 1;
                        break;
                    }
                }
            }
        }

        // accumulators the list ran past still need this term's contribution
        while in_pos < accumulators.len() {
            let mut acc = accumulators[in_pos];
            in_pos += 1;
            let doc_start = acc.doc_id << DOC_LEVEL_SHIFT;
            if let Some((s, _)) = list.first_start_bigger_eq(doc_start) {
                if s <= doc_start + DOC_LEVEL_MAX_TF {
                    let tf = decode_doc_level_tf(s & DOC_LEVEL_MAX_TF);
                    acc.score += weight * tf * (k1 + 1.0) / (tf + acc.k);
                }
            }
            merged.push(acc);
        }
        accumulators = merged;
    }

    let mut results = ScoredHeap::new(count);
    for acc in &accumulators {
        if deleted.is_some_and(|d| d.contains(acc.doc_id)) {
            continue;
        }
        if acc.score > results.worst_score() {
            results.insert(ScoredExtent::new(acc.doc_id, acc.doc_id, acc.score));
        }
    }
    results.into_sorted_results()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::make_doc_level_posting;
    use crate::query::daat::{self, DaatOptions};

    fn corpus(
        dir: &tempfile::TempDir,
        document_count: u64,
        seed: u64,
    ) -> (Vec<ExtentList>, Vec<f64>, DocLenTable) {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let records: Vec<(i64, f64)> =
            (0..document_count).map(|d| (d as i64 * 64, rng.gen_range(8.0..64.0))).collect();
        let path = dir.path().join("doclens");
        DocLenTable::write(&path, &records).unwrap();
        let doclens = DocLenTable::open(&path).unwrap();

        let mut lists = Vec::new();
        let mut weights = Vec::new();
        for density in [70u32, 30, 10] {
            let mut postings: Vec<u64> = Vec::new();
            for d in 0..document_count {
                if rng.gen_ratio(density, 100) {
                    postings.push(make_doc_level_posting(d, rng.gen_range(1..25)));
                }
            }
            weights.push((document_count as f64 / postings.len() as f64).ln());
            lists.push(ExtentList::from_postings(postings));
        }
        (lists, weights, doclens)
    }

    #[test]
    fn unbounded_taat_matches_daat() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lists, weights, doclens) = corpus(&dir, 400, 3);
        let taat = execute(
            &mut lists,
            &weights,
            &doclens,
            1.2,
            0.75,
            15,
            1_000_000,
            false,
            None,
        );
        let daat = daat::execute(
            &mut lists,
            &weights,
            &doclens,
            1.2,
            0.75,
            15,
            None,
            &DaatOptions::default(),
        );
        assert_eq!(taat.len(), daat.len());
        for (a, b) in taat.iter().zip(daat.iter()) {
            assert_eq!(a.from, b.from);
            assert!((a.score - b.score).abs() < 1e-4);
        }
    }

    #[test]
    fn bounded_accumulators_stay_within_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lists, weights, doclens) = corpus(&dir, 2000, 9);
        let limit = 100;
        let results =
            execute(&mut lists, &weights, &doclens, 1.2, 0.75, 10, limit, false, None);
        assert!(!results.is_empty());
        assert!(results.len() <= 10);
        // the top result still has to be a genuinely good document
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn accumulator_pruning_keeps_high_tf_documents() {
        let dir = tempfile::tempdir().unwrap();
        let document_count = 3000u64;
        let records: Vec<(i64, f64)> =
            (0..document_count).map(|d| (d as i64 * 32, 20.0)).collect();
        let path = dir.path().join("doclens");
        DocLenTable::write(&path, &records).unwrap();
        let doclens = DocLenTable::open(&path).unwrap();

        // one strong document in a sea of tf=1 noise
        let strong = 1500u64;
        let postings: Vec<u64> = (0..document_count)
            .map(|d| make_doc_level_posting(d, if d == strong { 19 } else { 1 }))
            .collect();
        let mut lists = vec![ExtentList::from_postings(postings)];
        let results =
            execute(&mut lists, &[1.0], &doclens, 1.2, 0.75, 5, 200, false, None);
        assert_eq!(results[0].from, strong);
    }
}
