//! Query-time reader over one term's compressed segments, with a two-level
//! cache: L2 keeps compressed segments in RAM, L1 keeps decoded ones.
//! Positional lookups search the current decoded segment outward from the
//! last-queried index; out-of-range targets binary-search the segment
//! descriptors. Sequential access prefetches ahead into L2.

use super::extent::{ExtentSource, first_bigger_eq, last_smaller_eq};
use crate::compression::decompress_any;
use crate::core::error::{Error, Result};
use crate::core::stats::EngineStats;
use crate::core::types::Posting;
use lru::LruCache;
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

/// Compressed segments held in the L2 cache.
pub const IN_MEMORY_SEGMENT_COUNT: usize = 64;

/// Decoded segments held in the L1 cache.
pub const DECOMPRESSED_SEGMENT_COUNT: usize = 4;

/// Segments prefetched into L2 when the access pattern is sequential.
pub const READ_AHEAD_SEGMENT_COUNT: usize = 8;

/// Where a segment's compressed bytes live.
#[derive(Clone)]
pub enum SegmentSource {
    OnDisk { file: Arc<File>, offset: u64 },
    InMemory(Arc<Vec<u8>>),
}

/// One segment of the list: header fields plus the byte source.
#[derive(Clone)]
pub struct SegmentSpec {
    pub posting_count: u32,
    pub byte_length: u32,
    pub first_posting: Posting,
    pub last_posting: Posting,
    pub source: SegmentSource,
}

pub struct SegmentedPostingList {
    segments: Vec<SegmentSpec>,
    l2: LruCache<usize, Arc<Vec<u8>>>,
    l1: LruCache<usize, Arc<Vec<Posting>>>,

    current: Option<Arc<Vec<Posting>>>,
    current_id: usize,
    current_first: Posting,
    current_last: Posting,
    position: usize,

    first_posting: Posting,
    last_posting: Posting,
    total_length: u64,
    stats: Option<Arc<EngineStats>>,
}

impl SegmentedPostingList {
    pub fn new(segments: Vec<SegmentSpec>, stats: Option<Arc<EngineStats>>) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::malformed("segmented list needs at least one segment"));
        }
        for pair in segments.windows(2) {
            if pair[1].first_posting <= pair[0].last_posting {
                return Err(Error::malformed(format!(
                    "unordered segments: {} <= {}",
                    pair[1].first_posting, pair[0].last_posting
                )));
            }
        }
        let total_length = segments.iter().map(|s| s.posting_count as u64).sum();
        Ok(SegmentedPostingList {
            first_posting: segments[0].first_posting,
            last_posting: segments[segments.len() - 1].last_posting,
            total_length,
            segments,
            l2: LruCache::new(NonZeroUsize::new(IN_MEMORY_SEGMENT_COUNT).unwrap()),
            l1: LruCache::new(NonZeroUsize::new(DECOMPRESSED_SEGMENT_COUNT).unwrap()),
            current: None,
            current_id: usize::MAX,
            current_first: Posting::MAX,
            current_last: 0,
            position: 0,
            stats,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn fetch_compressed(&mut self, id: usize) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.l2.get(&id) {
            return Ok(Arc::clone(bytes));
        }
        let spec = &self.segments[id];
        let bytes = match &spec.source {
            SegmentSource::InMemory(bytes) => Arc::clone(bytes),
            SegmentSource::OnDisk { file, offset } => {
                let mut buffer = vec![0u8; spec.byte_length as usize];
                file.read_exact_at(&mut buffer, *offset)?;
                if let Some(stats) = &self.stats {
                    stats.add_bytes_read(spec.byte_length as u64);
                }
                Arc::new(buffer)
            }
        };
        self.l2.put(id, Arc::clone(&bytes));
        Ok(bytes)
    }

    fn decode_segment(&mut self, id: usize) -> Result<Arc<Vec<Posting>>> {
        if let Some(postings) = self.l1.get(&id) {
            return Ok(Arc::clone(postings));
        }
        let compressed = self.fetch_compressed(id)?;
        let postings = Arc::new(decompress_any(&compressed)?);
        if postings.len() != self.segments[id].posting_count as usize {
            return Err(Error::malformed("segment count does not match its header"));
        }
        if let Some(stats) = &self.stats {
            stats.add_segments_decompressed(1);
        }
        self.l1.put(id, Arc::clone(&postings));
        Ok(postings)
    }

    fn load_segment(&mut self, id: usize) -> Result<()> {
        // sequential scans prefetch the next few compressed segments
        if self.current_id != usize::MAX
            && id == self.current_id + 1
            && !self.l2.contains(&(id + 1))
        {
            for ahead in 1..=READ_AHEAD_SEGMENT_COUNT {
                if id + ahead >= self.segments.len() {
                    break;
                }
                self.fetch_compressed(id + ahead)?;
            }
        }
        let postings = self.decode_segment(id)?;
        self.current_first = postings[0];
        self.current_last = postings[postings.len() - 1];
        self.current = Some(postings);
        self.current_id = id;
        self.position = 0;
        Ok(())
    }

    /// Segment that may contain the first posting >= position.
    fn segment_first_bigger_eq(&self, position: Posting) -> Option<usize> {
        if position > self.last_posting {
            return None;
        }
        Some(self.segments.partition_point(|s| s.last_posting < position))
    }

    /// Segment that may contain the last posting <= position.
    fn segment_last_smaller_eq(&self, position: Posting) -> Option<usize> {
        if position < self.first_posting {
            return None;
        }
        Some(self.segments.partition_point(|s| s.first_posting <= position) - 1)
    }

    fn ensure_segment_for(&mut self, position: Posting, forward: bool) -> Result<bool> {
        if self.current.is_some() && position >= self.current_first && position <= self.current_last
        {
            return Ok(true);
        }
        let target = if forward {
            self.segment_first_bigger_eq(position)
        } else {
            self.segment_last_smaller_eq(position)
        };
        match target {
            Some(id) => {
                self.load_segment(id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decode everything into one array (merging, pruning, tests).
    pub fn to_vec(&mut self) -> Vec<Posting> {
        let mut result = Vec::with_capacity(self.total_length as usize);
        for id in 0..self.segments.len() {
            match self.decode_segment(id) {
                Ok(postings) => result.extend_from_slice(&postings),
                Err(e) => {
                    log::error!("segment {} unreadable, list truncated: {}", id, e);
                    break;
                }
            }
        }
        result
    }

    fn lookup<F>(&mut self, position: Posting, forward: bool, search: F) -> Option<(Posting, Posting)>
    where
        F: Fn(&[Posting], usize, Posting) -> Option<usize>,
    {
        match self.ensure_segment_for(position, forward) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                log::error!("posting lookup failed, treating list as truncated: {}", e);
                return None;
            }
        }
        let postings = Arc::clone(self.current.as_ref()?);
        match search(&postings, self.position, position) {
            Some(index) => {
                self.position = index;
                let p = postings[index];
                Some((p, p))
            }
            None => {
                // the loaded segment is chosen so that the target is always
                // inside it; a miss means the segment lied about its range
                debug_assert!(false, "segment header range does not cover its postings");
                None
            }
        }
    }
}

impl ExtentSource for SegmentedPostingList {
    fn first_start_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.lookup(position, true, first_bigger_eq)
    }

    fn first_end_bigger_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.lookup(position, true, first_bigger_eq)
    }

    fn last_start_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.lookup(position, false, last_smaller_eq)
    }

    fn last_end_smaller_eq(&mut self, position: Posting) -> Option<(Posting, Posting)> {
        self.lookup(position, false, last_smaller_eq)
    }

    fn length(&mut self) -> u64 {
        self.total_length
    }

    fn count(&mut self, start: Posting, end: Posting) -> u64 {
        // whole segments inside the interval contribute their header counts;
        // only the two boundary segments need decoding
        let Some((first_start, _)) = self.first_start_bigger_eq(start) else {
            return 0;
        };
        if first_start > end {
            return 0;
        }
        let start_segment = self.current_id;
        let start_position = self.position as u64;
        let Some((last_start, _)) = self.last_end_smaller_eq(end) else {
            return 0;
        };
        if last_start < start {
            return 0;
        }
        let end_segment = self.current_id;
        let end_position = self.position as u64;

        if start_segment == end_segment {
            return end_position - start_position + 1;
        }
        let mut result =
            self.segments[start_segment].posting_count as u64 - start_position + end_position + 1;
        for id in start_segment + 1..end_segment {
            result += self.segments[id].posting_count as u64;
        }
        result
    }

    fn get_nth(&mut self, n: u64) -> Option<(Posting, Posting)> {
        if n >= self.total_length {
            return None;
        }
        let mut remaining = n;
        for id in 0..self.segments.len() {
            let count = self.segments[id].posting_count as u64;
            if remaining < count {
                self.load_segment(id).ok()?;
                self.position = remaining as usize;
                let p = self.current.as_ref()?[remaining as usize];
                return Some((p, p));
            }
            remaining -= count;
        }
        None
    }

    fn next_n(
        &mut self,
        from: Posting,
        to: Posting,
        n: usize,
        starts: &mut [Posting],
        ends: &mut [Posting],
    ) -> usize {
        let mut produced = 0;
        let mut cursor = from;
        while produced < n {
            let Some((s, _)) = self.first_start_bigger_eq(cursor) else {
                break;
            };
            if s > to {
                break;
            }
            // drain the rest of the current decoded segment without re-searching
            let postings = Arc::clone(self.current.as_ref().unwrap());
            let mut index = self.position;
            while produced < n && index < postings.len() {
                let p = postings[index];
                if p > to {
                    self.position = index;
                    return produced;
                }
                starts[produced] = p;
                ends[produced] = p;
                produced += 1;
                index += 1;
            }
            self.position = index.min(postings.len() - 1);
            cursor = postings[postings.len() - 1] + 1;
        }
        produced
    }
}
