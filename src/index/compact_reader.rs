//! Read side of the compact index: open validates the trailer and loads the
//! descriptor table; lookups binary-search the descriptors and scan one
//! block of term records. Short lists come back fully decoded; long lists
//! come back as lazily-loaded segmented lists.

use super::compact::{
    BlockDescriptor, DESCRIPTOR_BYTES, IndexTrailer, PostingListSegmentHeader,
    SEGMENT_HEADER_BYTES, TRAILER_BYTES,
};
use super::extent::ExtentList;
use super::iterator::CompactIndexIterator;
use super::segmented::{SegmentSource, SegmentSpec, SegmentedPostingList};
use crate::compression::decompress_any;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::EngineStats;
use crate::core::types::MAX_TOKEN_LENGTH;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct CompactIndex {
    path: PathBuf,
    file: Arc<File>,
    /// Whole-file copy when `all_indices_in_memory` is set. Pure cache.
    memory: Option<Arc<Vec<u8>>>,
    descriptors: Vec<BlockDescriptor>,
    trailer: IndexTrailer,
    file_size: u64,
    stats: Arc<EngineStats>,
}

/// One parsed term record inside a block.
struct RawRecord<'a> {
    term: &'a str,
    /// (header, payload range within the block); the header of a singleton
    /// record is reconstructed from its payload on demand.
    segments: Vec<(Option<PostingListSegmentHeader>, std::ops::Range<usize>)>,
    next_offset: usize,
}

impl CompactIndex {
    pub fn open(path: &Path, config: &Config, stats: Arc<EngineStats>) -> Result<CompactIndex> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < TRAILER_BYTES as u64 {
            return Err(Error::malformed("index file too small for a trailer"));
        }

        let mut trailer_bytes = [0u8; TRAILER_BYTES];
        file.read_exact_at(&mut trailer_bytes, file_size - TRAILER_BYTES as u64)?;
        let trailer = IndexTrailer::read(&trailer_bytes)?;

        let table_bytes = trailer.descriptor_count as u64 * DESCRIPTOR_BYTES as u64;
        if table_bytes + TRAILER_BYTES as u64 > file_size {
            return Err(Error::malformed("descriptor table exceeds file size"));
        }
        let table_start = file_size - TRAILER_BYTES as u64 - table_bytes;
        let mut table = vec![0u8; table_bytes as usize];
        file.read_exact_at(&mut table, table_start)?;
        stats.add_bytes_read(table_bytes + TRAILER_BYTES as u64);

        let mut descriptors = Vec::with_capacity(trailer.descriptor_count as usize);
        for chunk in table.chunks_exact(DESCRIPTOR_BYTES) {
            descriptors.push(BlockDescriptor::read(chunk)?);
        }
        for pair in descriptors.windows(2) {
            // equal first terms are legal: a giant term can span blocks
            if pair[0].block_end != pair[1].block_start || pair[0].first_term > pair[1].first_term {
                return Err(Error::malformed("corrupt descriptor table"));
            }
        }
        if let Some(last) = descriptors.last() {
            if last.block_end != table_start {
                return Err(Error::malformed("blocks do not cover the file body"));
            }
        }

        let memory = if config.all_indices_in_memory {
            let mut whole = vec![0u8; file_size as usize];
            file.read_exact_at(&mut whole, 0)?;
            stats.add_bytes_read(file_size);
            Some(Arc::new(whole))
        } else {
            None
        };

        Ok(CompactIndex {
            path: path.to_path_buf(),
            file: Arc::new(file),
            memory,
            descriptors,
            trailer,
            file_size,
            stats,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn term_count(&self) -> u64 {
        self.trailer.term_count as u64
    }

    pub fn posting_count(&self) -> u64 {
        self.trailer.posting_count
    }

    pub fn byte_size(&self) -> u64 {
        self.file_size
    }

    /// Sequential iterator over the whole index, for merging.
    pub fn iterate(&self, buffer_size: usize) -> Result<CompactIndexIterator> {
        CompactIndexIterator::open(&self.path, buffer_size)
    }

    fn read_block(&self, descriptor: &BlockDescriptor) -> Result<Vec<u8>> {
        let len = (descriptor.block_end - descriptor.block_start) as usize;
        match &self.memory {
            Some(memory) => {
                let start = descriptor.block_start as usize;
                Ok(memory[start..start + len].to_vec())
            }
            None => {
                let mut block = vec![0u8; len];
                self.file.read_exact_at(&mut block, descriptor.block_start)?;
                self.stats.add_bytes_read(len as u64);
                Ok(block)
            }
        }
    }

    fn parse_record<'a>(&self, block: &'a [u8], offset: usize, base: u64) -> Result<RawRecord<'a>> {
        let term_end = block[offset..]
            .iter()
            .take(MAX_TOKEN_LENGTH + 1)
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed("unterminated term in block"))?;
        let term = std::str::from_utf8(&block[offset..offset + term_end])
            .map_err(|_| Error::malformed("term is not UTF-8"))?;
        let mut at = offset + term_end + 1;
        if at + 4 > block.len() {
            return Err(Error::malformed("record truncated at segment count"));
        }
        let seg_count = i32::from_le_bytes(block[at..at + 4].try_into().unwrap());
        at += 4;
        at = self.skip_alignment(at, base);

        let mut segments = Vec::new();
        if seg_count < 0 {
            // singleton short list: payload follows directly
            let byte_length = (-seg_count) as usize;
            if at + byte_length > block.len() {
                return Err(Error::malformed("singleton payload exceeds block"));
            }
            segments.push((None, at..at + byte_length));
            at += byte_length;
        } else {
            let seg_count = seg_count as usize;
            if at + seg_count * SEGMENT_HEADER_BYTES > block.len() {
                return Err(Error::malformed("segment headers exceed block"));
            }
            let mut headers = Vec::with_capacity(seg_count);
            for _ in 0..seg_count {
                headers.push(PostingListSegmentHeader::read(&block[at..])?);
                at += SEGMENT_HEADER_BYTES;
            }
            for header in headers {
                let len = header.byte_length as usize;
                if at + len > block.len() {
                    return Err(Error::malformed("segment payload exceeds block"));
                }
                segments.push((Some(header), at..at + len));
                at += len;
            }
        }
        Ok(RawRecord { term, segments, next_offset: at })
    }

    #[cfg(feature = "word-aligned-index")]
    fn skip_alignment(&self, at: usize, base: u64) -> usize {
        let position = base + at as u64;
        at + ((8 - position % 8) % 8) as usize
    }

    #[cfg(not(feature = "word-aligned-index"))]
    fn skip_alignment(&self, at: usize, _base: u64) -> usize {
        at
    }

    /// Index of the first block that may contain `term`: the block before
    /// the first descriptor at or past the term, so a term whose records
    /// begin mid-block (and possibly spill across blocks) is always caught.
    fn block_for(&self, term: &str) -> Option<usize> {
        if self.descriptors.is_empty() {
            return None;
        }
        Some(self.descriptors.partition_point(|d| d.first_term.as_str() < term).saturating_sub(1))
    }

    fn specs_for_record(&self, record: &RawRecord, block: &[u8], base: u64) -> Result<Vec<SegmentSpec>> {
        let mut specs = Vec::with_capacity(record.segments.len());
        for (header, range) in &record.segments {
            let bytes = &block[range.clone()];
            let header = match header {
                Some(h) => *h,
                None => {
                    // reconstruct the singleton header from the payload
                    let postings = decompress_any(bytes)?;
                    PostingListSegmentHeader {
                        posting_count: postings.len() as i32,
                        byte_length: bytes.len() as i32,
                        first_element: postings[0] as i64,
                        last_element: postings[postings.len() - 1] as i64,
                    }
                }
            };
            let source = match &self.memory {
                Some(_) => SegmentSource::InMemory(Arc::new(bytes.to_vec())),
                None => SegmentSource::OnDisk {
                    file: Arc::clone(&self.file),
                    offset: base + range.start as u64,
                },
            };
            specs.push(SegmentSpec {
                posting_count: header.posting_count as u32,
                byte_length: header.byte_length as u32,
                first_posting: header.first_element as u64,
                last_posting: header.last_element as u64,
                source,
            });
        }
        Ok(specs)
    }

    fn build_list(&self, specs: Vec<SegmentSpec>, block_cache: &[(u64, Vec<u8>)]) -> Result<ExtentList> {
        if specs.is_empty() {
            return Ok(ExtentList::Empty);
        }
        if specs.len() == 1 {
            // short lists come back as one contiguous decoded buffer
            let spec = &specs[0];
            let bytes = match &spec.source {
                SegmentSource::InMemory(bytes) => bytes.as_ref().clone(),
                SegmentSource::OnDisk { file, offset } => {
                    // serve from the block we already read if possible
                    if let Some((base, block)) =
                        block_cache.iter().find(|(base, block)| {
                            *offset >= *base && *offset + spec.byte_length as u64 <= base + block.len() as u64
                        })
                    {
                        let start = (offset - base) as usize;
                        block[start..start + spec.byte_length as usize].to_vec()
                    } else {
                        let mut buffer = vec![0u8; spec.byte_length as usize];
                        file.read_exact_at(&mut buffer, *offset)?;
                        buffer
                    }
                }
            };
            return Ok(ExtentList::from_postings(decompress_any(&bytes)?));
        }
        Ok(ExtentList::Segmented(SegmentedPostingList::new(
            specs,
            Some(Arc::clone(&self.stats)),
        )?))
    }

    /// All postings for a term. Supports exact terms, trailing-star prefixes
    /// (`europ*`), general wildcards (`?`, inner `*`), and stem lookups
    /// (`$effective`). A missing term is an empty list, not an error.
    pub fn get_postings(&self, term: &str) -> Result<ExtentList> {
        if let Some(word) = term.strip_prefix('$') {
            let stemmer = rust_stemmers::Stemmer::create(rust_stemmers::Algorithm::English);
            let mut stemmed = stemmer.stem(&word.to_ascii_lowercase()).to_string();
            stemmed.truncate(MAX_TOKEN_LENGTH - 1);
            stemmed.push('$');
            return self.get_exact(&stemmed);
        }
        if term.contains('*') || term.contains('?') {
            return self.get_wildcard(term);
        }
        self.get_exact(term)
    }

    fn get_exact(&self, term: &str) -> Result<ExtentList> {
        let Some(mut block_index) = self.block_for(term) else {
            return Ok(ExtentList::Empty);
        };
        let mut specs = Vec::new();
        let mut blocks = Vec::new();
        loop {
            let descriptor = &self.descriptors[block_index];
            let block = self.read_block(descriptor)?;
            let base = descriptor.block_start;
            let mut offset = 0;
            let mut past_term = false;
            while offset < block.len() {
                let record = self.parse_record(&block, offset, base)?;
                match record.term.cmp(term) {
                    std::cmp::Ordering::Less => {}
                    std::cmp::Ordering::Equal => {
                        specs.extend(self.specs_for_record(&record, &block, base)?);
                    }
                    std::cmp::Ordering::Greater => {
                        past_term = true;
                        break;
                    }
                }
                offset = record.next_offset;
            }
            blocks.push((base, block));
            // a term's records can spill into the next block
            if past_term
                || block_index + 1 >= self.descriptors.len()
                || self.descriptors[block_index + 1].first_term.as_str() > term
            {
                break;
            }
            block_index += 1;
        }
        self.build_list(specs, &blocks)
    }

    fn get_wildcard(&self, pattern: &str) -> Result<ExtentList> {
        let prefix_len = pattern.find(['*', '?']).unwrap_or(pattern.len());
        let prefix = &pattern[..prefix_len];
        let simple_prefix = prefix_len + 1 == pattern.len() && pattern.ends_with('*');
        let matcher = if simple_prefix {
            None
        } else {
            let escaped = regex::escape(pattern).replace("\\*", ".*").replace("\\?", ".");
            Some(regex::Regex::new(&format!("^{}$", escaped))?)
        };

        let start_block = if prefix.is_empty() { 0 } else { self.block_for(prefix).unwrap_or(0) };
        let mut lists = Vec::new();
        for block_index in start_block..self.descriptors.len() {
            let descriptor = &self.descriptors[block_index];
            if !prefix.is_empty()
                && !descriptor.first_term.starts_with(prefix)
                && descriptor.first_term.as_str() > prefix
            {
                // every later term sorts past the prefix range
                break;
            }
            let block = self.read_block(descriptor)?;
            let base = descriptor.block_start;
            let mut offset = 0;
            while offset < block.len() {
                let record = self.parse_record(&block, offset, base)?;
                let matches = if record.term.starts_with(prefix) {
                    match &matcher {
                        None => true,
                        Some(re) => re.is_match(record.term),
                    }
                } else {
                    false
                };
                if matches {
                    let specs = self.specs_for_record(&record, &block, base)?;
                    lists.push(self.build_list(specs, &[])?);
                }
                offset = record.next_offset;
            }
        }
        Ok(ExtentList::or(lists))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::compact_writer::CompactIndexWriter;
    use super::super::extent::ExtentSource;
    use crate::core::types::TARGET_SEGMENT_SIZE;

    fn build_index(
        terms: &[(&str, Vec<u64>)],
        configure: impl Fn(&mut Config),
    ) -> (tempfile::TempDir, CompactIndex) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        configure(&mut config);
        let stats = Arc::new(EngineStats::new());
        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, Arc::clone(&stats)).unwrap();
        for (term, postings) in terms {
            writer.add_postings(term, postings).unwrap();
        }
        writer.finish().unwrap();
        let index = CompactIndex::open(&path, &config, stats).unwrap();
        (dir, index)
    }

    #[test]
    fn minimal_index_round_trip() {
        let (_dir, index) =
            build_index(&[("a", vec![1, 2, 3]), ("b", vec![4, 5])], |_| {});
        let mut list = index.get_postings("a").unwrap();
        assert_eq!(list.to_vec(), vec![1, 2, 3]);
        let mut list = index.get_postings("b").unwrap();
        assert_eq!(list.to_vec(), vec![4, 5]);
        let mut missing = index.get_postings("c").unwrap();
        assert_eq!(missing.length(), 0);
        assert_eq!(index.term_count(), 2);
        assert_eq!(index.posting_count(), 5);
    }

    #[test]
    fn long_lists_come_back_segmented() {
        let postings: Vec<u64> = (0..3 * TARGET_SEGMENT_SIZE as u64 + 100).map(|i| i * 2).collect();
        let (_dir, index) = build_index(&[("big", postings.clone())], |_| {});
        let mut list = index.get_postings("big").unwrap();
        assert!(matches!(list, ExtentList::Segmented(_)));
        assert_eq!(list.length(), postings.len() as u64);
        assert_eq!(list.to_vec(), postings);
        // positional probe deep into the list
        assert_eq!(list.first_start_bigger_eq(99_999).map(|(s, _)| s), Some(100_000));
    }

    #[test]
    fn in_memory_mode_is_semantically_identical() {
        let postings: Vec<u64> = (0..50_000u64).map(|i| i * 3 + 1).collect();
        let terms = [("alpha", vec![5u64, 9]), ("huge", postings.clone())];
        let (_dir, on_disk) = build_index(&terms, |_| {});
        let (_dir2, in_memory) = build_index(&terms, |c| c.all_indices_in_memory = true);
        for term in ["alpha", "huge", "missing"] {
            let mut a = on_disk.get_postings(term).unwrap();
            let mut b = in_memory.get_postings(term).unwrap();
            assert_eq!(a.to_vec(), b.to_vec(), "term {:?}", term);
        }
    }

    #[test]
    fn continuation_records_read_back_as_one_list() {
        use super::super::compact_writer::MAX_SEGMENTS_IN_MEMORY;
        use crate::compression::{CompressionMethod, compress_with};
        let dir = tempfile::tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        let stats = Arc::new(EngineStats::new());
        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, Arc::clone(&stats)).unwrap();

        let mut expected = Vec::new();
        for segment in 0..(MAX_SEGMENTS_IN_MEMORY as u64 + 44) {
            let postings: Vec<u64> = (segment * 10..segment * 10 + 10).collect();
            let bytes = compress_with(CompressionMethod::VByte, &postings).unwrap();
            writer
                .add_postings_compressed("the", &bytes, 10, postings[0], postings[9])
                .unwrap();
            expected.extend_from_slice(&postings);
        }
        writer.finish().unwrap();

        // the reader concatenates the term's records seamlessly
        let index = CompactIndex::open(&path, &config, stats).unwrap();
        let mut list = index.get_postings("the").unwrap();
        assert_eq!(list.length(), expected.len() as u64);
        assert_eq!(list.to_vec(), expected);
        let probe = 10 * MAX_SEGMENTS_IN_MEMORY as u64; // first posting past record 1
        assert_eq!(list.first_start_bigger_eq(probe).map(|(s, _)| s), Some(probe));
    }

    #[test]
    fn prefix_wildcard_unions_matching_terms() {
        let (_dir, index) = build_index(
            &[
                ("eure", vec![100u64]),
                ("europa", vec![1, 5]),
                ("europe", vec![2, 6]),
                ("eurozone", vec![3]),
                ("evening", vec![4]),
            ],
            |_| {},
        );
        let mut list = index.get_postings("euro*").unwrap();
        assert_eq!(list.to_vec(), vec![1, 2, 3, 5, 6]);
    }

    #[test]
    fn general_wildcards_use_regex_matching() {
        let (_dir, index) = build_index(
            &[("hat", vec![1u64]), ("hit", vec![2u64]), ("hoot", vec![3u64])],
            |_| {},
        );
        let mut list = index.get_postings("h?t").unwrap();
        assert_eq!(list.to_vec(), vec![1, 2]);
    }

    #[test]
    fn stem_lookup_finds_stemmed_form() {
        let (_dir, index) = build_index(
            &[("effect", vec![10u64]), ("effect$", vec![10u64, 20])],
            |_| {},
        );
        // "$effective" stems to "effect" and resolves the stored "effect$"
        let mut list = index.get_postings("$effective").unwrap();
        assert_eq!(list.to_vec(), vec![10, 20]);
    }

    #[test]
    fn corrupt_trailer_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bad");
        std::fs::write(&path, b"not an index").unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        assert!(CompactIndex::open(&path, &config, Arc::new(EngineStats::new())).is_err());
    }
}
