//! N-way merge of index iterators into a new compact index. Inputs expose
//! sorted `(term, segment)` streams; for each term the merger either passes
//! compressed segments straight through (disjoint posting ranges, the common
//! case) or re-merges the postings through an inner streaming merge. With a
//! visibility list it garbage-collects deleted regions on the way.

use super::compact_writer::CompactIndexWriter;
use super::compact::{IndexTrailer, PostingListSegmentHeader};
use super::iterator::IndexSource;
use super::multi_iterator::MultipleIndexIterator;
use crate::compression::decompress_any;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::stats::EngineStats;
use crate::core::types::{Posting, TARGET_SEGMENT_SIZE};
use std::path::Path;
use std::sync::Arc;

/// Above this many inputs, group them into second-level iterators.
pub const MULTIPLE_ITERATOR_THRESHOLD: usize = 10;
pub const ITERATORS_PER_MULTIPLE_ITERATOR: usize = 5;

/// Sorted, disjoint corpus intervals that are still visible. Postings
/// outside every interval are garbage and dropped during a merge.
pub struct VisibleExtents {
    intervals: Vec<(Posting, Posting)>,
}

impl VisibleExtents {
    pub fn new(mut intervals: Vec<(Posting, Posting)>) -> VisibleExtents {
        intervals.sort_unstable();
        VisibleExtents { intervals }
    }

    pub fn contains(&self, posting: Posting) -> bool {
        match self.intervals.partition_point(|&(start, _)| start <= posting).checked_sub(1) {
            Some(index) => posting <= self.intervals[index].1,
            None => false,
        }
    }

    /// Drop postings outside every interval. Both lists are sorted, so one
    /// forward pass suffices.
    pub fn filter(&self, postings: &mut Vec<Posting>) {
        let mut interval = 0;
        postings.retain(|&p| {
            while interval < self.intervals.len() && self.intervals[interval].1 < p {
                interval += 1;
            }
            interval < self.intervals.len()
                && self.intervals[interval].0 <= p
                && p <= self.intervals[interval].1
        });
    }
}

pub struct IndexMerger;

impl IndexMerger {
    /// Merge `inputs` into a new compact index at `output`. The iterators
    /// are consumed. With `visible`, deleted regions are dropped on the fly.
    pub fn merge(
        inputs: Vec<Box<dyn IndexSource>>,
        output: &Path,
        config: &Config,
        stats: Arc<EngineStats>,
        visible: Option<&VisibleExtents>,
    ) -> Result<IndexTrailer> {
        let mut inputs = Self::group_inputs(inputs);
        let mut writer = CompactIndexWriter::create(output, config, Arc::clone(&stats))?;

        loop {
            // the frontier is small; a linear scan finds the minimum term
            let Some(term) = inputs
                .iter()
                .filter_map(|input| input.current_term())
                .min()
                .map(String::from)
            else {
                break;
            };

            // gather this term's segments from every input, in input order
            let mut segments: Vec<(PostingListSegmentHeader, Vec<u8>)> = Vec::new();
            for input in inputs.iter_mut() {
                while input.current_term() == Some(term.as_str()) {
                    let Some(segment) = input.next_compressed()? else {
                        break;
                    };
                    segments.push(segment);
                }
            }

            if let Some(visible) = visible {
                Self::merge_filtered(&mut writer, &term, segments, visible, &stats)?;
            } else if Self::ranges_are_disjoint(&segments) && !cfg!(feature = "append-tait") {
                for (header, bytes) in segments {
                    writer.add_postings_compressed(
                        &term,
                        &bytes,
                        header.posting_count as u32,
                        header.first_element as u64,
                        header.last_element as u64,
                    )?;
                    stats.add_postings_merged(header.posting_count as u64);
                }
            } else {
                Self::merge_overlapping(&mut writer, &term, segments, &stats)?;
            }
        }
        writer.finish()
    }

    fn group_inputs(inputs: Vec<Box<dyn IndexSource>>) -> Vec<Box<dyn IndexSource>> {
        if inputs.len() <= MULTIPLE_ITERATOR_THRESHOLD {
            return inputs;
        }
        let mut grouped: Vec<Box<dyn IndexSource>> = Vec::new();
        let mut batch: Vec<Box<dyn IndexSource>> = Vec::new();
        for input in inputs {
            batch.push(input);
            if batch.len() == ITERATORS_PER_MULTIPLE_ITERATOR {
                grouped.push(Box::new(MultipleIndexIterator::new(std::mem::take(&mut batch))));
            }
        }
        if !batch.is_empty() {
            grouped.push(Box::new(MultipleIndexIterator::new(batch)));
        }
        grouped
    }

    fn ranges_are_disjoint(segments: &[(PostingListSegmentHeader, Vec<u8>)]) -> bool {
        segments
            .windows(2)
            .all(|pair| pair[1].0.first_element > pair[0].0.last_element)
    }

    /// Inner merge for overlapping (append-mode) ranges: decompress one
    /// segment per input position at a time and emit target-sized runs.
    fn merge_overlapping(
        writer: &mut CompactIndexWriter,
        term: &str,
        segments: Vec<(PostingListSegmentHeader, Vec<u8>)>,
        stats: &EngineStats,
    ) -> Result<()> {
        // split the segment sequence into its ascending runs; each run is
        // one input's contribution and is internally sorted
        let mut runs: Vec<Vec<(PostingListSegmentHeader, Vec<u8>)>> = Vec::new();
        let mut last_end = i64::MIN;
        for segment in segments {
            if runs.is_empty() || segment.0.first_element <= last_end {
                runs.push(Vec::new());
            }
            last_end = segment.0.last_element;
            runs.last_mut().unwrap().push(segment);
        }

        struct RunCursor {
            segments: std::vec::IntoIter<(PostingListSegmentHeader, Vec<u8>)>,
            current: Vec<Posting>,
            position: usize,
        }
        impl RunCursor {
            fn refill(&mut self) -> Result<()> {
                while self.position >= self.current.len() {
                    match self.segments.next() {
                        Some((_, bytes)) => {
                            self.current = decompress_any(&bytes)?;
                            self.position = 0;
                        }
                        None => return Ok(()),
                    }
                }
                Ok(())
            }
            fn peek(&self) -> Option<Posting> {
                self.current.get(self.position).copied()
            }
        }

        let mut cursors = Vec::new();
        for run in runs {
            let mut cursor =
                RunCursor { segments: run.into_iter(), current: Vec::new(), position: 0 };
            cursor.refill()?;
            cursors.push(cursor);
        }

        let mut buffer: Vec<Posting> = Vec::with_capacity(TARGET_SEGMENT_SIZE);
        let mut last_written: Option<Posting> = None;
        loop {
            let Some(best) = cursors
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.peek().map(|p| (p, i)))
                .min()
            else {
                break;
            };
            let (posting, index) = best;
            cursors[index].position += 1;
            cursors[index].refill()?;

            if last_written == Some(posting) {
                log::warn!("duplicate posting {} for {:?} dropped during merge", posting, term);
                continue;
            }
            last_written = Some(posting);
            buffer.push(posting);
            if buffer.len() >= TARGET_SEGMENT_SIZE {
                writer.add_postings(term, &buffer)?;
                stats.add_postings_merged(buffer.len() as u64);
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            writer.add_postings(term, &buffer)?;
            stats.add_postings_merged(buffer.len() as u64);
        }
        Ok(())
    }

    /// Garbage-collecting path: decompress, drop invisible postings,
    /// re-compress through the writer.
    fn merge_filtered(
        writer: &mut CompactIndexWriter,
        term: &str,
        segments: Vec<(PostingListSegmentHeader, Vec<u8>)>,
        visible: &VisibleExtents,
        stats: &EngineStats,
    ) -> Result<()> {
        let disjoint = Self::ranges_are_disjoint(&segments);
        if disjoint {
            for (_, bytes) in segments {
                let mut postings = decompress_any(&bytes)?;
                visible.filter(&mut postings);
                if !postings.is_empty() {
                    stats.add_postings_merged(postings.len() as u64);
                    writer.add_postings(term, &postings)?;
                }
            }
            return Ok(());
        }
        // overlapping and filtered: filter each segment, then re-merge
        let mut filtered_segments = Vec::new();
        for (_, bytes) in segments {
            let mut postings = decompress_any(&bytes)?;
            visible.filter(&mut postings);
            if postings.is_empty() {
                continue;
            }
            let recompressed = crate::compression::compress_with(
                crate::compression::CompressionMethod::VByte,
                &postings,
            )?;
            let header = PostingListSegmentHeader {
                posting_count: postings.len() as i32,
                byte_length: recompressed.len() as i32,
                first_element: postings[0] as i64,
                last_element: postings[postings.len() - 1] as i64,
            };
            filtered_segments.push((header, recompressed));
        }
        Self::merge_overlapping(writer, term, filtered_segments, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::compact_reader::CompactIndex;
    use super::super::extent::ExtentSource;
    use super::super::iterator::CompactIndexIterator;

    fn setup() -> (tempfile::TempDir, Config, Arc<EngineStats>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        (dir, config, Arc::new(EngineStats::new()))
    }

    fn write_index(config: &Config, stats: &Arc<EngineStats>, name: &str, terms: &[(&str, Vec<u64>)]) {
        let path = config.storage_path.join(name);
        let mut writer = CompactIndexWriter::create(&path, config, Arc::clone(stats)).unwrap();
        for (term, postings) in terms {
            writer.add_postings(term, postings).unwrap();
        }
        writer.finish().unwrap();
    }

    fn open_iterator(config: &Config, name: &str) -> Box<dyn IndexSource> {
        Box::new(CompactIndexIterator::open(&config.storage_path.join(name), 65536).unwrap())
    }

    #[test]
    fn merging_disjoint_shards_equals_concatenation() {
        let (_dir, config, stats) = setup();
        write_index(&config, &stats, "shard.0", &[("cat", vec![1, 5]), ("dog", vec![2])]);
        write_index(&config, &stats, "shard.1", &[("cat", vec![100, 105]), ("fox", vec![101])]);
        write_index(&config, &stats, "shard.2", &[("cat", vec![200]), ("dog", vec![201])]);

        let inputs = vec![
            open_iterator(&config, "shard.0"),
            open_iterator(&config, "shard.1"),
            open_iterator(&config, "shard.2"),
        ];
        let merged_path = config.storage_path.join("merged");
        let trailer =
            IndexMerger::merge(inputs, &merged_path, &config, Arc::clone(&stats), None).unwrap();
        assert_eq!(trailer.term_count, 3);

        let merged = CompactIndex::open(&merged_path, &config, stats).unwrap();
        assert_eq!(merged.get_postings("cat").unwrap().to_vec(), vec![1, 5, 100, 105, 200]);
        assert_eq!(merged.get_postings("dog").unwrap().to_vec(), vec![2, 201]);
        assert_eq!(merged.get_postings("fox").unwrap().to_vec(), vec![101]);
    }

    #[test]
    fn overlapping_ranges_are_re_merged() {
        let (_dir, config, stats) = setup();
        write_index(&config, &stats, "a", &[("term", vec![1, 10, 20])]);
        write_index(&config, &stats, "b", &[("term", vec![5, 15, 25])]);
        let inputs = vec![open_iterator(&config, "a"), open_iterator(&config, "b")];
        let merged_path = config.storage_path.join("merged");
        IndexMerger::merge(inputs, &merged_path, &config, Arc::clone(&stats), None).unwrap();
        let merged = CompactIndex::open(&merged_path, &config, stats).unwrap();
        assert_eq!(merged.get_postings("term").unwrap().to_vec(), vec![1, 5, 10, 15, 20, 25]);
    }

    #[test]
    fn garbage_collection_drops_invisible_postings() {
        let (_dir, config, stats) = setup();
        write_index(&config, &stats, "a", &[("term", vec![1, 5, 50, 90, 200])]);
        let inputs = vec![open_iterator(&config, "a")];
        let visible = VisibleExtents::new(vec![(0, 10), (100, 300)]);
        let merged_path = config.storage_path.join("merged");
        IndexMerger::merge(inputs, &merged_path, &config, Arc::clone(&stats), Some(&visible))
            .unwrap();
        let merged = CompactIndex::open(&merged_path, &config, stats).unwrap();
        assert_eq!(merged.get_postings("term").unwrap().to_vec(), vec![1, 5, 200]);
    }

    #[test]
    fn many_inputs_are_grouped() {
        let (_dir, config, stats) = setup();
        let mut inputs = Vec::new();
        let mut expected = Vec::new();
        for shard in 0..12u64 {
            let name = format!("shard.{}", shard);
            let postings: Vec<u64> = (0..5).map(|i| shard * 1000 + i).collect();
            expected.extend_from_slice(&postings);
            write_index(&config, &stats, &name, &[("term", postings)]);
            inputs.push(open_iterator(&config, &name));
        }
        let merged_path = config.storage_path.join("merged");
        IndexMerger::merge(inputs, &merged_path, &config, Arc::clone(&stats), None).unwrap();
        let merged = CompactIndex::open(&merged_path, &config, stats).unwrap();
        assert_eq!(merged.get_postings("term").unwrap().to_vec(), expected);
    }

    #[test]
    fn visible_extents_filtering() {
        let visible = VisibleExtents::new(vec![(10, 20), (40, 40)]);
        assert!(visible.contains(10));
        assert!(visible.contains(20));
        assert!(visible.contains(40));
        assert!(!visible.contains(9));
        assert!(!visible.contains(39));
        let mut postings = vec![1, 10, 15, 21, 40, 41];
        visible.filter(&mut postings);
        assert_eq!(postings, vec![10, 15, 40]);
    }
}
