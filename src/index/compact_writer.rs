//! Single-pass compact-index writer. Streams a sorted term → segment
//! sequence into blocks behind a 4 MB write cache, then appends the
//! descriptor table and the trailer. Output goes to a temp name and is
//! renamed into place on success; an abandoned writer removes its partial
//! file.

use super::compact::{
    BlockDescriptor, IndexTrailer, PostingListSegmentHeader, split_into_segments, validate_term,
};
use crate::compression::{compress_for_index, count_of};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::EngineStats;
use crate::core::types::Posting;
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const WRITE_CACHE_SIZE: usize = 4 * 1024 * 1024;
pub const MAX_SEGMENTS_IN_MEMORY: usize =
    WRITE_CACHE_SIZE / crate::core::types::TARGET_SEGMENT_SIZE;
pub const DESCRIPTOR_GROWTH_RATE: f64 = 1.21;

struct PendingSegment {
    header: PostingListSegmentHeader,
    bytes: Vec<u8>,
}

pub struct CompactIndexWriter {
    file: Option<File>,
    final_path: PathBuf,
    temp_path: PathBuf,
    config: Config,
    stats: Arc<EngineStats>,

    cache: BytesMut,
    bytes_flushed: u64,

    descriptors: Vec<BlockDescriptor>,
    current_block: Option<(String, u64)>,

    pending_term: Option<String>,
    pending_segments: Vec<PendingSegment>,
    last_term_added: String,
    last_segment_end: i64,

    trailer: IndexTrailer,
    finished: bool,
}

impl CompactIndexWriter {
    pub fn create(path: &Path, config: &Config, stats: Arc<EngineStats>) -> Result<Self> {
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        let file = OpenOptions::new().write(true).create_new(true).open(&temp_path)?;
        Ok(CompactIndexWriter {
            file: Some(file),
            final_path: path.to_path_buf(),
            temp_path,
            config: config.clone(),
            stats,
            cache: BytesMut::with_capacity(WRITE_CACHE_SIZE + 65536),
            bytes_flushed: 0,
            descriptors: Vec::new(),
            current_block: None,
            pending_term: None,
            pending_segments: Vec::new(),
            last_term_added: String::new(),
            last_segment_end: -1,
            trailer: IndexTrailer::default(),
            finished: false,
        })
    }

    fn file_position(&self) -> u64 {
        self.bytes_flushed + self.cache.len() as u64
    }

    /// Add a term's postings, compressing and splitting into segments. Terms
    /// must arrive in ascending order; a repeated term appends segments.
    pub fn add_postings(&mut self, term: &str, postings: &[Posting]) -> Result<()> {
        if postings.is_empty() {
            return Ok(());
        }
        for chunk in split_into_segments(postings) {
            let bytes = compress_for_index(self.config.compression_mode, chunk)?;
            self.add_postings_compressed(
                term,
                &bytes,
                chunk.len() as u32,
                chunk[0],
                chunk[chunk.len() - 1],
            )?;
        }
        Ok(())
    }

    /// Add an already-compressed segment.
    pub fn add_postings_compressed(
        &mut self,
        term: &str,
        bytes: &[u8],
        count: u32,
        first: Posting,
        last: Posting,
    ) -> Result<()> {
        validate_term(term)?;
        debug_assert_eq!(count_of(bytes).unwrap_or(0), count as usize);

        match self.pending_term.as_deref() {
            Some(pending) if term == pending => {}
            Some(_) => {
                self.emit_pending()?;
                self.begin_term(term)?;
            }
            None => self.begin_term(term)?,
        }
        if term == self.last_term_added && (first as i64) <= self.last_segment_end {
            return Err(Error::malformed(format!(
                "segment ranges overlap for {:?}: {} <= {}",
                term, first, self.last_segment_end
            )));
        }
        self.last_segment_end = last as i64;

        self.pending_segments.push(PendingSegment {
            header: PostingListSegmentHeader {
                posting_count: count as i32,
                byte_length: bytes.len() as i32,
                first_element: first as i64,
                last_element: last as i64,
            },
            bytes: bytes.to_vec(),
        });
        self.trailer.list_count += 1;
        self.trailer.posting_count += count as u64;

        // keep the record bounded; the reader concatenates repeated records
        if self.pending_segments.len() >= MAX_SEGMENTS_IN_MEMORY {
            self.emit_pending()?;
        }
        Ok(())
    }

    fn begin_term(&mut self, term: &str) -> Result<()> {
        use std::cmp::Ordering;
        match term.cmp(self.last_term_added.as_str()) {
            Ordering::Less => {
                return Err(Error::malformed(format!(
                    "terms out of order: {:?} after {:?}",
                    term, self.last_term_added
                )));
            }
            // continuation record of a term whose previous record was
            // emitted at the segment cap; its posting ranges keep ascending
            Ordering::Equal if !self.last_term_added.is_empty() => {
                // term_count counts records, so every record holds at most
                // MAX_SEGMENTS_IN_MEMORY of the trailer's list_count
                self.trailer.term_count += 1;
            }
            _ => {
                self.last_term_added = term.to_string();
                self.last_segment_end = -1;
                self.trailer.term_count += 1;
            }
        }
        self.pending_term = Some(term.to_string());
        Ok(())
    }

    /// Write the pending term record into the cache, opening or closing a
    /// block as needed.
    fn emit_pending(&mut self) -> Result<()> {
        let Some(term) = self.pending_term.take() else {
            return Ok(());
        };
        let segments = std::mem::take(&mut self.pending_segments);
        if segments.is_empty() {
            return Ok(());
        }

        if self.current_block.is_none() {
            self.current_block = Some((term.clone(), self.file_position()));
        }

        let mut record = Vec::new();
        record.extend_from_slice(term.as_bytes());
        record.push(0);
        if segments.len() == 1 {
            // compact singleton form: negative byte length instead of a header
            let only = &segments[0];
            record.extend_from_slice(&(-only.header.byte_length).to_le_bytes());
            self.pad_for_alignment(&mut record);
            record.extend_from_slice(&only.bytes);
        } else {
            record.extend_from_slice(&(segments.len() as i32).to_le_bytes());
            self.pad_for_alignment(&mut record);
            for segment in &segments {
                segment.header.write(&mut record);
            }
            for segment in &segments {
                record.extend_from_slice(&segment.bytes);
            }
        }
        self.cache.extend_from_slice(&record);

        if self.cache.len() >= WRITE_CACHE_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    #[cfg(feature = "word-aligned-index")]
    fn pad_for_alignment(&self, record: &mut Vec<u8>) {
        let position = self.file_position() + record.len() as u64;
        let pad = (8 - position % 8) % 8;
        record.extend(std::iter::repeat_n(0u8, pad as usize));
    }

    #[cfg(not(feature = "word-aligned-index"))]
    fn pad_for_alignment(&self, _record: &mut Vec<u8>) {}

    /// Flush the cache as one block and record its descriptor. Blocks end on
    /// term-record boundaries.
    fn flush_block(&mut self) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().expect("writer already finished");
        file.write_all(&self.cache)?;
        self.stats.add_bytes_written(self.cache.len() as u64);
        self.bytes_flushed += self.cache.len() as u64;
        self.advise_dont_need();
        self.cache.clear();

        let (first_term, block_start) =
            self.current_block.take().expect("flushing a block that never opened");
        self.push_descriptor(BlockDescriptor {
            first_term,
            block_start,
            block_end: self.bytes_flushed,
        });
        Ok(())
    }

    fn push_descriptor(&mut self, descriptor: BlockDescriptor) {
        // geometric slot growth, matching the on-disk descriptor budget
        if self.descriptors.len() == self.descriptors.capacity() {
            let grown = ((self.descriptors.capacity() as f64) * DESCRIPTOR_GROWTH_RATE) as usize;
            let target = grown.max(self.descriptors.capacity() + 16);
            self.descriptors.reserve_exact(target - self.descriptors.len());
        }
        self.descriptors.push(descriptor);
        self.trailer.descriptor_count = self.descriptors.len() as u32;
    }

    /// Drop flushed pages from the page cache so a heavy build does not
    /// evict query-time data. Only active under `use_direct_io`.
    fn advise_dont_need(&self) {
        if !self.config.use_direct_io {
            return;
        }
        if let Some(file) = &self.file {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::posix_fadvise(
                    file.as_raw_fd(),
                    0,
                    self.bytes_flushed as libc::off_t,
                    libc::POSIX_FADV_DONTNEED,
                );
            }
        }
    }

    /// Flush everything, append descriptors and trailer, sync, and rename
    /// into place. Returns the trailer of the finished index.
    pub fn finish(mut self) -> Result<IndexTrailer> {
        self.emit_pending()?;
        self.flush_block()?;

        let mut tail = Vec::new();
        for descriptor in &self.descriptors {
            descriptor.write(&mut tail);
        }
        self.trailer.write(&mut tail);

        let mut file = self.file.take().expect("writer already finished");
        file.write_all(&tail)?;
        self.stats.add_bytes_written(tail.len() as u64);
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.temp_path, &self.final_path)?;
        self.finished = true;
        Ok(self.trailer)
    }
}

impl Drop for CompactIndexWriter {
    fn drop(&mut self) {
        // abandoned build: roll the partial output back
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_setup() -> (tempfile::TempDir, Config, Arc<EngineStats>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        (dir, config, Arc::new(EngineStats::new()))
    }

    #[test]
    fn writer_enforces_term_order() {
        let (dir, config, stats) = test_setup();
        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, stats).unwrap();
        writer.add_postings("beta", &[1, 2, 3]).unwrap();
        assert!(writer.add_postings("alpha", &[4, 5]).is_err());
    }

    #[test]
    fn repeated_term_appends_ascending_segments() {
        let (dir, config, stats) = test_setup();
        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, stats).unwrap();
        writer.add_postings("term", &[1, 2, 3]).unwrap();
        writer.add_postings("term", &[10, 11]).unwrap();
        // overlapping range is refused
        assert!(writer.add_postings("term", &[5, 6]).is_err());
    }

    #[test]
    fn abandoned_writer_removes_temp_file() {
        let (dir, config, stats) = test_setup();
        let path = dir.path().join("index.000");
        {
            let mut writer = CompactIndexWriter::create(&path, &config, stats).unwrap();
            writer.add_postings("term", &[1, 2, 3]).unwrap();
            // dropped without finish()
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn segment_cap_spills_into_continuation_records() {
        use crate::compression::{CompressionMethod, compress_with};
        let (dir, config, stats) = test_setup();
        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, stats).unwrap();

        // one stopword-sized term: more segments than fit in a single record
        let segments = MAX_SEGMENTS_IN_MEMORY + 44;
        for segment in 0..segments as u64 {
            let postings: Vec<u64> = (segment * 10..segment * 10 + 10).collect();
            let bytes = compress_with(CompressionMethod::VByte, &postings).unwrap();
            writer
                .add_postings_compressed("the", &bytes, 10, postings[0], postings[9])
                .unwrap();
        }
        let trailer = writer.finish().unwrap();

        assert_eq!(trailer.list_count as usize, segments);
        // the record cap forced one continuation record
        assert_eq!(trailer.term_count, 2);
        assert!(
            trailer.term_count as u64
                >= (trailer.list_count as u64).div_ceil(MAX_SEGMENTS_IN_MEMORY as u64)
        );
    }

    #[test]
    fn finish_renames_into_place() {
        let (dir, config, stats) = test_setup();
        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, stats).unwrap();
        writer.add_postings("a", &[1, 2, 3]).unwrap();
        writer.add_postings("b", &[4, 5]).unwrap();
        let trailer = writer.finish().unwrap();
        assert!(path.exists());
        assert_eq!(trailer.term_count, 2);
        assert_eq!(trailer.list_count, 2);
        assert_eq!(trailer.posting_count, 5);
        assert_eq!(trailer.descriptor_count, 1);
    }
}
