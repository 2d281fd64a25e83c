//! Combines several index iterators into one term-ordered stream. For equal
//! terms, inputs are drained in input order, so the merger sees a stable
//! segment sequence. Large merges group their inputs through this class to
//! keep the top-level frontier small.

use super::compact::PostingListSegmentHeader;
use super::iterator::IndexSource;
use crate::core::error::Result;

pub struct MultipleIndexIterator {
    inputs: Vec<Box<dyn IndexSource>>,
    /// Input indices ordered by `(current_term, input_id)`; exhausted inputs
    /// sink to the back.
    order: Vec<usize>,
    list_count: u64,
}

impl MultipleIndexIterator {
    pub fn new(inputs: Vec<Box<dyn IndexSource>>) -> MultipleIndexIterator {
        let list_count = inputs.iter().map(|input| input.list_count()).sum();
        let order: Vec<usize> = (0..inputs.len()).collect();
        let mut iterator = MultipleIndexIterator { inputs, order, list_count };
        iterator.reorder();
        iterator
    }

    fn reorder(&mut self) {
        let inputs = &self.inputs;
        self.order.sort_by(|&a, &b| {
            match (inputs[a].current_term(), inputs[b].current_term()) {
                (Some(ta), Some(tb)) => ta.cmp(tb).then(a.cmp(&b)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.cmp(&b),
            }
        });
    }

    fn front(&self) -> Option<usize> {
        let first = *self.order.first()?;
        self.inputs[first].current_term().map(|_| first)
    }
}

impl IndexSource for MultipleIndexIterator {
    fn term_count(&self) -> u64 {
        // upper bound; inputs may share terms
        self.inputs.iter().map(|input| input.term_count()).sum()
    }

    fn list_count(&self) -> u64 {
        self.list_count
    }

    fn current_term(&self) -> Option<&str> {
        self.inputs[self.front()?].current_term()
    }

    fn current_header(&self) -> Option<&PostingListSegmentHeader> {
        self.inputs[self.front()?].current_header()
    }

    fn next_compressed(&mut self) -> Result<Option<(PostingListSegmentHeader, Vec<u8>)>> {
        let Some(front) = self.front() else {
            return Ok(None);
        };
        let result = self.inputs[front].next_compressed()?;
        self.reorder();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::compact_writer::CompactIndexWriter;
    use super::super::iterator::CompactIndexIterator;
    use crate::core::config::Config;
    use crate::core::stats::EngineStats;
    use std::sync::Arc;

    fn write_index(
        dir: &tempfile::TempDir,
        name: &str,
        terms: &[(&str, Vec<u64>)],
    ) -> Box<dyn IndexSource> {
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        let path = dir.path().join(name);
        let mut writer =
            CompactIndexWriter::create(&path, &config, Arc::new(EngineStats::new())).unwrap();
        for (term, postings) in terms {
            writer.add_postings(term, postings).unwrap();
        }
        writer.finish().unwrap();
        Box::new(CompactIndexIterator::open(&path, 65536).unwrap())
    }

    #[test]
    fn interleaves_terms_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_index(&dir, "a", &[("apple", vec![1]), ("cherry", vec![3])]);
        let b = write_index(&dir, "b", &[("banana", vec![2]), ("cherry", vec![30])]);
        let mut multi = MultipleIndexIterator::new(vec![a, b]);

        let mut stream = Vec::new();
        while let Some(term) = multi.current_term().map(String::from) {
            let (_, postings) = multi.next_uncompressed().unwrap().unwrap();
            stream.push((term, postings));
        }
        assert_eq!(
            stream,
            vec![
                ("apple".to_string(), vec![1]),
                ("banana".to_string(), vec![2]),
                ("cherry".to_string(), vec![3]),
                ("cherry".to_string(), vec![30]),
            ]
        );
    }

    #[test]
    fn equal_terms_drain_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_index(&dir, "a", &[("shared", vec![100])]);
        let b = write_index(&dir, "b", &[("shared", vec![1])]);
        let mut multi = MultipleIndexIterator::new(vec![a, b]);
        let (_, first) = multi.next_uncompressed().unwrap().unwrap();
        let (_, second) = multi.next_uncompressed().unwrap().unwrap();
        // input 0 wins the tie even though its postings are larger
        assert_eq!(first, vec![100]);
        assert_eq!(second, vec![1]);
    }
}
