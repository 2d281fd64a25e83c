//! On-disk compact index layout. Little-endian, records packed:
//!
//! ```text
//! [block 0][block 1]...[block N-1]
//! [descriptor table][trailer]
//! ```
//!
//! A block is a run of term records, each
//! `term NUL | seg_count:i32 | seg_headers | seg_payloads`; a single-segment
//! short list stores `seg_count = -byte_length` and its payload directly.
//! The trailer is written last so the writer stays single-pass. This layout
//! is a compatibility surface: byte-exact across sessions.

use crate::core::error::{Error, Result};
use crate::core::types::{MAX_TOKEN_LENGTH, Posting};

/// Header of one posting-list segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingListSegmentHeader {
    pub posting_count: i32,
    pub byte_length: i32,
    pub first_element: i64,
    pub last_element: i64,
}

pub const SEGMENT_HEADER_BYTES: usize = 24;

impl PostingListSegmentHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.posting_count.to_le_bytes());
        out.extend_from_slice(&self.byte_length.to_le_bytes());
        out.extend_from_slice(&self.first_element.to_le_bytes());
        out.extend_from_slice(&self.last_element.to_le_bytes());
    }

    pub fn read(bytes: &[u8]) -> Result<PostingListSegmentHeader> {
        if bytes.len() < SEGMENT_HEADER_BYTES {
            return Err(Error::malformed("truncated segment header"));
        }
        Ok(PostingListSegmentHeader {
            posting_count: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            byte_length: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            first_element: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            last_element: i64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}

/// Points the reader's binary search at one block of term records.
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    pub first_term: String,
    pub block_start: u64,
    pub block_end: u64,
}

pub const DESCRIPTOR_BYTES: usize = MAX_TOKEN_LENGTH + 1 + 16;

impl BlockDescriptor {
    pub fn write(&self, out: &mut Vec<u8>) {
        let mut term_bytes = [0u8; MAX_TOKEN_LENGTH + 1];
        let raw = self.first_term.as_bytes();
        term_bytes[..raw.len()].copy_from_slice(raw);
        out.extend_from_slice(&term_bytes);
        out.extend_from_slice(&self.block_start.to_le_bytes());
        out.extend_from_slice(&self.block_end.to_le_bytes());
    }

    pub fn read(bytes: &[u8]) -> Result<BlockDescriptor> {
        if bytes.len() < DESCRIPTOR_BYTES {
            return Err(Error::malformed("truncated block descriptor"));
        }
        let term_field = &bytes[..MAX_TOKEN_LENGTH + 1];
        let term_len = term_field.iter().position(|&b| b == 0).unwrap_or(term_field.len());
        let first_term = std::str::from_utf8(&term_field[..term_len])
            .map_err(|_| Error::malformed("descriptor term is not UTF-8"))?
            .to_string();
        let at = MAX_TOKEN_LENGTH + 1;
        Ok(BlockDescriptor {
            first_term,
            block_start: u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()),
            block_end: u64::from_le_bytes(bytes[at + 8..at + 16].try_into().unwrap()),
        })
    }
}

/// Index trailer, found in the last TRAILER_BYTES of the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexTrailer {
    /// Number of term records. A term whose segments spill across several
    /// records counts once per record, so
    /// `term_count >= list_count / MAX_SEGMENTS_IN_MEMORY` always holds.
    pub term_count: u32,
    /// Number of list segments.
    pub list_count: u32,
    pub descriptor_count: u32,
    /// Total number of postings in the index.
    pub posting_count: u64,
}

pub const TRAILER_BYTES: usize = 20;

impl IndexTrailer {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.term_count.to_le_bytes());
        out.extend_from_slice(&self.list_count.to_le_bytes());
        out.extend_from_slice(&self.descriptor_count.to_le_bytes());
        out.extend_from_slice(&self.posting_count.to_le_bytes());
    }

    pub fn read(bytes: &[u8]) -> Result<IndexTrailer> {
        if bytes.len() < TRAILER_BYTES {
            return Err(Error::malformed("truncated index trailer"));
        }
        Ok(IndexTrailer {
            term_count: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            list_count: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            descriptor_count: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            posting_count: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
        })
    }
}

/// A term must be non-empty, fit the fixed field, and carry no NUL.
pub fn validate_term(term: &str) -> Result<()> {
    if term.is_empty() || term.len() > MAX_TOKEN_LENGTH {
        return Err(Error::malformed(format!("term length {} out of range", term.len())));
    }
    if term.bytes().any(|b| b == 0) {
        return Err(Error::malformed("term contains a NUL byte"));
    }
    Ok(())
}

/// Split a term's postings into segments: TARGET-sized chunks, with a tail
/// shorter than MIN folded into its predecessor (never exceeding MAX).
pub fn split_into_segments(postings: &[Posting]) -> Vec<&[Posting]> {
    use crate::core::types::{MIN_SEGMENT_SIZE, TARGET_SEGMENT_SIZE};
    let mut chunks = Vec::new();
    let mut rest = postings;
    while !rest.is_empty() {
        if rest.len() <= TARGET_SEGMENT_SIZE + MIN_SEGMENT_SIZE {
            chunks.push(rest);
            break;
        }
        let (head, tail) = rest.split_at(TARGET_SEGMENT_SIZE);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MAX_SEGMENT_SIZE, MIN_SEGMENT_SIZE, TARGET_SEGMENT_SIZE};

    #[test]
    fn header_round_trip() {
        let header = PostingListSegmentHeader {
            posting_count: 16384,
            byte_length: 40000,
            first_element: 7,
            last_element: 1 << 50,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), SEGMENT_HEADER_BYTES);
        assert_eq!(PostingListSegmentHeader::read(&buf).unwrap(), header);
    }

    #[test]
    fn descriptor_round_trip() {
        let descriptor = BlockDescriptor {
            first_term: "aardvark".to_string(),
            block_start: 0,
            block_end: 4 * 1024 * 1024,
        };
        let mut buf = Vec::new();
        descriptor.write(&mut buf);
        assert_eq!(buf.len(), DESCRIPTOR_BYTES);
        let restored = BlockDescriptor::read(&buf).unwrap();
        assert_eq!(restored.first_term, "aardvark");
        assert_eq!(restored.block_end, 4 * 1024 * 1024);
    }

    #[test]
    fn segment_split_respects_bounds() {
        for len in [
            1,
            MIN_SEGMENT_SIZE - 1,
            TARGET_SEGMENT_SIZE,
            TARGET_SEGMENT_SIZE + 1,
            TARGET_SEGMENT_SIZE + MIN_SEGMENT_SIZE - 1,
            TARGET_SEGMENT_SIZE + MIN_SEGMENT_SIZE + 1,
            10 * TARGET_SEGMENT_SIZE + 17,
        ] {
            let postings: Vec<u64> = (0..len as u64).collect();
            let chunks = split_into_segments(&postings);
            assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), len);
            for (i, chunk) in chunks.iter().enumerate() {
                assert!(chunk.len() <= MAX_SEGMENT_SIZE);
                if chunks.len() > 1 && i < chunks.len() - 1 {
                    assert_eq!(chunk.len(), TARGET_SEGMENT_SIZE);
                }
                if i == chunks.len() - 1 && chunks.len() > 1 {
                    assert!(chunk.len() >= MIN_SEGMENT_SIZE);
                }
            }
        }
    }

    #[test]
    fn term_validation() {
        assert!(validate_term("ordinary").is_ok());
        assert!(validate_term("<!>document").is_ok());
        assert!(validate_term("").is_err());
        assert!(validate_term("twentycharactersxxxx").is_err());
        assert!(validate_term("nul\0term").is_err());
    }
}
