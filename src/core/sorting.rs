//! Sort routines used by the dictionary flush and the query layer.
//!
//! The flush path sorts hundreds of thousands of term slots; it buckets them
//! by the first two term bytes and runs a merge sort inside each bucket,
//! dropping to selection sort for tiny runs.

use std::cmp::Ordering;

/// Runs at or below this length use selection sort.
const SELECTION_SORT_THRESHOLD: usize = 11;

/// Sort a slice of postings (or any u64 values) ascending.
pub fn sort_offsets(values: &mut [u64]) {
    merge_sort_by(values, &|a, b| a.cmp(b));
}

/// Sort descending.
pub fn sort_offsets_desc(values: &mut [u64]) {
    merge_sort_by(values, &|a, b| b.cmp(a));
}

/// Sort ascending and remove duplicates. Returns the deduplicated length;
/// elements past it are unspecified.
pub fn sort_and_dedup(values: &mut Vec<u64>) {
    sort_offsets(values);
    values.dedup();
}

fn selection_sort_by<T: Copy, F: Fn(&T, &T) -> Ordering>(values: &mut [T], cmp: &F) {
    for i in 0..values.len() {
        let mut best = i;
        for k in i + 1..values.len() {
            if cmp(&values[k], &values[best]) == Ordering::Less {
                best = k;
            }
        }
        values.swap(i, best);
    }
}

fn merge_sort_by<T: Copy, F: Fn(&T, &T) -> Ordering>(values: &mut [T], cmp: &F) {
    if values.len() <= SELECTION_SORT_THRESHOLD {
        selection_sort_by(values, cmp);
        return;
    }
    let mid = values.len() / 2;
    merge_sort_by(&mut values[..mid], cmp);
    merge_sort_by(&mut values[mid..], cmp);

    let mut merged = Vec::with_capacity(values.len());
    {
        let (left, right) = values.split_at(mid);
        let (mut i, mut k) = (0, 0);
        while i < left.len() && k < right.len() {
            // <= keeps the sort stable
            if cmp(&left[i], &right[k]) != Ordering::Greater {
                merged.push(left[i]);
                i += 1;
            } else {
                merged.push(right[k]);
                k += 1;
            }
        }
        merged.extend_from_slice(&left[i..]);
        merged.extend_from_slice(&right[k..]);
    }
    values.copy_from_slice(&merged);
}

/// Sort term-slot ids lexicographically by term. `bucket_of` maps a slot id
/// to a bucket derived from the first two term bytes (0..65536); `cmp`
/// compares two slot ids by full term.
pub fn hybrid_sort_terms<B, F>(ids: &mut Vec<u32>, bucket_of: B, cmp: F)
where
    B: Fn(u32) -> usize,
    F: Fn(u32, u32) -> Ordering,
{
    if ids.len() <= SELECTION_SORT_THRESHOLD {
        selection_sort_by(ids, &|a, b| cmp(*a, *b));
        return;
    }

    // counting sort on the first two bytes
    let mut counts = vec![0usize; 65537];
    for &id in ids.iter() {
        counts[bucket_of(id) + 1] += 1;
    }
    for i in 1..counts.len() {
        counts[i] += counts[i - 1];
    }
    let mut bucketed = vec![0u32; ids.len()];
    let mut cursors = counts.clone();
    for &id in ids.iter() {
        let b = bucket_of(id);
        bucketed[cursors[b]] = id;
        cursors[b] += 1;
    }

    // order within each bucket
    for b in 0..65536 {
        let (lo, hi) = (counts[b], counts[b + 1]);
        if hi - lo > 1 {
            merge_sort_by(&mut bucketed[lo..hi], &|a, b| cmp(*a, *b));
        }
    }
    ids.copy_from_slice(&bucketed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    #[test]
    fn sort_matches_reference_on_random_inputs() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut len = 1usize;
        while len < 100_000 {
            let mut values: Vec<u64> = (0..len).map(|_| rng.gen_range(0..1 << 40)).collect();
            let mut reference = values.clone();
            reference.sort_unstable();
            sort_offsets(&mut values);
            assert_eq!(values, reference, "len={}", len);
            len += rng.gen_range(1..=len);
        }
    }

    #[test]
    fn descending_sort_matches_reference() {
        let mut rng = StdRng::seed_from_u64(11);
        for len in [1usize, 2, 11, 12, 100, 5000] {
            let mut values: Vec<u64> = (0..len).map(|_| rng.gen_range(0..1000)).collect();
            let mut reference = values.clone();
            reference.sort_unstable_by(|a, b| b.cmp(a));
            sort_offsets_desc(&mut values);
            assert_eq!(values, reference, "len={}", len);
        }
    }

    #[test]
    fn dedup_removes_duplicates() {
        let mut rng = StdRng::seed_from_u64(13);
        for len in [1usize, 2, 50, 10_000] {
            let mut values: Vec<u64> = (0..len).map(|_| rng.gen_range(0..100)).collect();
            let mut reference = values.clone();
            reference.sort_unstable();
            reference.dedup();
            sort_and_dedup(&mut values);
            assert_eq!(values, reference, "len={}", len);
        }
    }

    #[test]
    fn hybrid_term_sort_orders_lexicographically() {
        let terms: Vec<&[u8]> = vec![
            b"zebra", b"apple", b"ant", b"b", b"banana", b"", b"aardvark", b"zeb", b"apples",
        ];
        let mut ids: Vec<u32> = (0..terms.len() as u32).collect();
        hybrid_sort_terms(
            &mut ids,
            |id| {
                let t = terms[id as usize];
                let b0 = *t.first().unwrap_or(&0) as usize;
                let b1 = *t.get(1).unwrap_or(&0) as usize;
                (b0 << 8) | b1
            },
            |a, b| terms[a as usize].cmp(terms[b as usize]),
        );
        let sorted: Vec<&[u8]> = ids.iter().map(|&i| terms[i as usize]).collect();
        let mut reference = terms.clone();
        reference.sort();
        assert_eq!(sorted, reference);
    }
}
