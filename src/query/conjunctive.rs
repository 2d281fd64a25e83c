//! Conjunctive (AND) execution: the shortest list drives, every other list
//! is probed per candidate document. A document scores only when every term
//! has a posting inside it.

use super::results::{ScoredExtent, ScoredHeap};
use crate::core::types::{
    DOC_LEVEL_MAX_TF, DOCUMENT_COUNT_OFFSET, decode_doc_level_tf, doc_id_from_posting,
};
use crate::index::doclen::DocLenTable;
use crate::index::extent::{ExtentList, ExtentSource};
use roaring::RoaringTreemap;

pub fn execute(
    lists: &mut [ExtentList],
    weights: &[f64],
    doclens: &DocLenTable,
    k1: f32,
    b: f32,
    count: usize,
    deleted: Option<&RoaringTreemap>,
) -> Vec<ScoredExtent> {
    let n = lists.len();
    if n == 0 || count == 0 {
        return Vec::new();
    }
    let avgdl = doclens.average_length().max(1.0);

    // probe in ascending document-frequency order; the rarest term drives
    let mut order: Vec<usize> = (0..n).collect();
    let lengths: Vec<u64> = lists.iter_mut().map(|l| l.length()).collect();
    order.sort_by_key(|&i| lengths[i]);

    let mut results = ScoredHeap::new(count);
    let mut tf = vec![0u64; n];
    let mask = !DOC_LEVEL_MAX_TF;

    let mut where_ = 0u64;
    'pivot: while let Some((s, _)) = lists[order[0]].first_start_bigger_eq(where_) {
        tf[0] = s & DOC_LEVEL_MAX_TF;
        where_ = s & mask;
        if where_ >= DOCUMENT_COUNT_OFFSET {
            break;
        }

        for probe in 1..n {
            match lists[order[probe]].first_start_bigger_eq(where_) {
                None => break 'pivot,
                Some((p, _)) if p > where_ + DOC_LEVEL_MAX_TF => {
                    // the probed term skipped past this document
                    where_ = p & mask;
                    continue 'pivot;
                }
                Some((p, _)) => tf[probe] = p & DOC_LEVEL_MAX_TF,
            }
        }

        let doc_id = doc_id_from_posting(where_);
        if !deleted.is_some_and(|d| d.contains(doc_id)) {
            let dl = doclens.doc_length(doc_id);
            let k = k1 * (1.0 - b + b * dl / avgdl);
            let mut score = 0.0f32;
            for probe in 0..n {
                let decoded = decode_doc_level_tf(tf[probe]);
                score += (weights[order[probe]] as f32) * (decoded * (k1 + 1.0)) / (decoded + k);
            }
            if score > results.worst_score() {
                results.insert(ScoredExtent::new(doc_id, doc_id, score));
            }
        }

        where_ += DOC_LEVEL_MAX_TF + 1;
    }

    results.into_sorted_results()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::make_doc_level_posting;

    fn doclens(dir: &tempfile::TempDir, lens: &[f64]) -> DocLenTable {
        let path = dir.path().join("doclens");
        let mut records = Vec::new();
        let mut start = 0i64;
        for &len in lens {
            records.push((start, len));
            start += len as i64 + 2;
        }
        DocLenTable::write(&path, &records).unwrap();
        DocLenTable::open(&path).unwrap()
    }

    #[test]
    fn only_documents_with_every_term_survive() {
        let dir = tempfile::tempdir().unwrap();
        let doclens = doclens(&dir, &[2.0, 2.0, 1.0]);
        // d0 = "cat cat", d1 = "cat dog", d2 = "dog"
        let mut lists = vec![
            ExtentList::from_postings(vec![
                make_doc_level_posting(0, 2),
                make_doc_level_posting(1, 1),
            ]),
            ExtentList::from_postings(vec![
                make_doc_level_posting(1, 1),
                make_doc_level_posting(2, 1),
            ]),
        ];
        let w = (3.0f64 / 2.0).ln();
        let results = execute(&mut lists, &[w, w], &doclens, 1.2, 0.75, 10, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].from, 1);
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn conjunction_matches_brute_force_membership() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(77);
        let dir = tempfile::tempdir().unwrap();
        let lens: Vec<f64> = (0..300).map(|_| rng.gen_range(5.0..50.0)).collect();
        let doclens = doclens(&dir, &lens);

        let docs_a: Vec<u64> = (0..300u64).filter(|_| rng.gen_bool(0.5)).collect();
        let docs_b: Vec<u64> = (0..300u64).filter(|_| rng.gen_bool(0.3)).collect();
        let expected: Vec<u64> =
            docs_a.iter().copied().filter(|d| docs_b.contains(d)).collect();

        let mut lists = vec![
            ExtentList::from_postings(
                docs_a.iter().map(|&d| make_doc_level_posting(d, 1)).collect(),
            ),
            ExtentList::from_postings(
                docs_b.iter().map(|&d| make_doc_level_posting(d, 2)).collect(),
            ),
        ];
        let results = execute(&mut lists, &[1.0, 1.0], &doclens, 1.2, 0.75, 1000, None);
        let mut found: Vec<u64> = results.iter().map(|r| r.from).collect();
        found.sort_unstable();
        assert_eq!(found, expected);
    }
}
