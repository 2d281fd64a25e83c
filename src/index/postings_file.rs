//! Standalone posting-list file for terms hot enough to deserve their own
//! file. Trailer-at-end layout, so the file can be appended to and sealed:
//!
//! ```text
//! [segment payloads][segment headers][seg_count:i32]
//! ```
//!
//! A singleton list stores `seg_count = -byte_length` and no headers.

use super::compact::{PostingListSegmentHeader, SEGMENT_HEADER_BYTES, split_into_segments};
use super::extent::ExtentList;
use super::segmented::{SegmentSource, SegmentSpec, SegmentedPostingList};
use crate::compression::{CompressionMethod, compress_for_index, decompress_any};
use crate::core::error::{Error, Result};
use crate::core::stats::EngineStats;
use crate::core::types::Posting;
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

pub struct PostingListInFile;

impl PostingListInFile {
    /// Write one term's postings as a standalone file.
    pub fn write(path: &Path, postings: &[Posting], method: CompressionMethod) -> Result<()> {
        if postings.is_empty() {
            return Err(Error::malformed("refusing to write an empty posting list"));
        }
        let chunks = split_into_segments(postings);
        let mut file = File::create(path)?;

        if chunks.len() == 1 {
            let bytes = compress_for_index(method, chunks[0])?;
            file.write_all(&bytes)?;
            file.write_all(&(-(bytes.len() as i32)).to_le_bytes())?;
            file.sync_all()?;
            return Ok(());
        }

        let mut headers = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let bytes = compress_for_index(method, chunk)?;
            headers.push(PostingListSegmentHeader {
                posting_count: chunk.len() as i32,
                byte_length: bytes.len() as i32,
                first_element: chunk[0] as i64,
                last_element: chunk[chunk.len() - 1] as i64,
            });
            file.write_all(&bytes)?;
        }
        let mut tail = Vec::new();
        for header in &headers {
            header.write(&mut tail);
        }
        tail.extend_from_slice(&(headers.len() as i32).to_le_bytes());
        file.write_all(&tail)?;
        file.sync_all()?;
        Ok(())
    }

    /// Open a standalone posting list as an extent list.
    pub fn open(path: &Path, stats: Option<Arc<EngineStats>>) -> Result<ExtentList> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < 4 {
            return Err(Error::malformed("posting-list file too small"));
        }
        let mut count_bytes = [0u8; 4];
        file.read_exact_at(&mut count_bytes, file_size - 4)?;
        let seg_count = i32::from_le_bytes(count_bytes);

        if seg_count < 0 {
            // singleton: payload occupies the front of the file
            let byte_length = (-seg_count) as u64;
            if byte_length + 4 > file_size {
                return Err(Error::malformed("singleton payload exceeds file"));
            }
            let mut bytes = vec![0u8; byte_length as usize];
            file.read_exact_at(&mut bytes, 0)?;
            return Ok(ExtentList::from_postings(decompress_any(&bytes)?));
        }

        let seg_count = seg_count as u64;
        let table_bytes = seg_count * SEGMENT_HEADER_BYTES as u64;
        if table_bytes + 4 > file_size {
            return Err(Error::malformed("segment table exceeds file"));
        }
        let mut table = vec![0u8; table_bytes as usize];
        file.read_exact_at(&mut table, file_size - 4 - table_bytes)?;

        let file = Arc::new(file);
        let mut specs = Vec::with_capacity(seg_count as usize);
        let mut offset = 0u64;
        for chunk in table.chunks_exact(SEGMENT_HEADER_BYTES) {
            let header = PostingListSegmentHeader::read(chunk)?;
            specs.push(SegmentSpec {
                posting_count: header.posting_count as u32,
                byte_length: header.byte_length as u32,
                first_posting: header.first_element as u64,
                last_posting: header.last_element as u64,
                source: SegmentSource::OnDisk { file: Arc::clone(&file), offset },
            });
            offset += header.byte_length as u64;
        }
        Ok(ExtentList::Segmented(SegmentedPostingList::new(specs, stats)?))
    }
}
