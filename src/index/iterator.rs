//! One-pass sequential readers over a compact index, used by the merger.
//! An iterator yields one list segment at a time: the current term and
//! segment header can be inspected without consuming the segment.

use super::compact::{
    DESCRIPTOR_BYTES, IndexTrailer, PostingListSegmentHeader, SEGMENT_HEADER_BYTES, TRAILER_BYTES,
};
use crate::compression::decompress_any;
use crate::core::error::{Error, Result};
use crate::core::types::{MAX_TOKEN_LENGTH, Posting};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::os::unix::fs::FileExt;
use std::path::Path;

pub const MIN_BUFFER_SIZE: usize = 32768;
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Anything that produces a sorted `(term, segment)` stream: a compact
/// index, a grouped set of iterators, or an in-memory partition.
pub trait IndexSource: Send {
    fn term_count(&self) -> u64;
    fn list_count(&self) -> u64;

    /// Term of the next segment, `None` at end of input.
    fn current_term(&self) -> Option<&str>;

    /// Header of the next segment.
    fn current_header(&self) -> Option<&PostingListSegmentHeader>;

    /// Consume the next segment in compressed form.
    fn next_compressed(&mut self) -> Result<Option<(PostingListSegmentHeader, Vec<u8>)>>;

    /// Consume the next segment decoded.
    fn next_uncompressed(&mut self) -> Result<Option<(PostingListSegmentHeader, Vec<Posting>)>> {
        match self.next_compressed()? {
            None => Ok(None),
            Some((header, bytes)) => Ok(Some((header, decompress_any(&bytes)?))),
        }
    }

    /// Discard the next segment.
    fn skip(&mut self) -> Result<()> {
        self.next_compressed()?;
        Ok(())
    }
}

pub struct CompactIndexIterator {
    reader: BufReader<File>,
    /// Bytes of term records still ahead of the cursor.
    body_remaining: u64,
    absolute_position: u64,
    trailer: IndexTrailer,

    current_term: Option<String>,
    /// Headers of the current record not yet consumed, oldest first. The
    /// matching payloads are read lazily from the stream.
    pending_headers: VecDeque<PostingListSegmentHeader>,
    /// Payload already pulled off the stream for a singleton record.
    pending_singleton: Option<Vec<u8>>,
}

impl CompactIndexIterator {
    pub fn open(path: &Path, buffer_size: usize) -> Result<CompactIndexIterator> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < TRAILER_BYTES as u64 {
            return Err(Error::malformed("index file too small for a trailer"));
        }
        let mut trailer_bytes = [0u8; TRAILER_BYTES];
        file.read_exact_at(&mut trailer_bytes, file_size - TRAILER_BYTES as u64)?;
        let trailer = IndexTrailer::read(&trailer_bytes)?;
        let body_remaining = file_size
            - TRAILER_BYTES as u64
            - trailer.descriptor_count as u64 * DESCRIPTOR_BYTES as u64;

        let buffer_size = buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        let mut iterator = CompactIndexIterator {
            reader: BufReader::with_capacity(buffer_size, file),
            body_remaining,
            absolute_position: 0,
            trailer,
            current_term: None,
            pending_headers: VecDeque::new(),
            pending_singleton: None,
        };
        iterator.load_next_term()?;
        Ok(iterator)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if (len as u64) > self.body_remaining {
            return Err(Error::malformed("record extends past the block region"));
        }
        let mut buffer = vec![0u8; len];
        self.reader.read_exact(&mut buffer)?;
        self.body_remaining -= len as u64;
        self.absolute_position += len as u64;
        Ok(buffer)
    }

    #[cfg(feature = "word-aligned-index")]
    fn skip_alignment(&mut self) -> Result<()> {
        let pad = ((8 - self.absolute_position % 8) % 8) as usize;
        if pad > 0 {
            self.read_bytes(pad)?;
        }
        Ok(())
    }

    #[cfg(not(feature = "word-aligned-index"))]
    fn skip_alignment(&mut self) -> Result<()> {
        Ok(())
    }

    /// Load the term and segment descriptors of the next record.
    fn load_next_term(&mut self) -> Result<()> {
        if self.body_remaining == 0 {
            self.current_term = None;
            return Ok(());
        }
        let mut term_bytes = Vec::with_capacity(MAX_TOKEN_LENGTH + 1);
        loop {
            let byte = self.read_bytes(1)?[0];
            if byte == 0 {
                break;
            }
            if term_bytes.len() > MAX_TOKEN_LENGTH {
                return Err(Error::malformed("unterminated term in index"));
            }
            term_bytes.push(byte);
        }
        let term = String::from_utf8(term_bytes)
            .map_err(|_| Error::malformed("term is not UTF-8"))?;

        let seg_count = i32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap());
        self.skip_alignment()?;
        if seg_count < 0 {
            // singleton record: pull the payload now to learn its header
            let bytes = self.read_bytes((-seg_count) as usize)?;
            let postings = decompress_any(&bytes)?;
            self.pending_headers.push_back(PostingListSegmentHeader {
                posting_count: postings.len() as i32,
                byte_length: bytes.len() as i32,
                first_element: postings[0] as i64,
                last_element: postings[postings.len() - 1] as i64,
            });
            self.pending_singleton = Some(bytes);
        } else {
            for _ in 0..seg_count {
                let header = PostingListSegmentHeader::read(&self.read_bytes(SEGMENT_HEADER_BYTES)?)?;
                self.pending_headers.push_back(header);
            }
        }
        self.current_term = Some(term);
        Ok(())
    }
}

impl IndexSource for CompactIndexIterator {
    fn term_count(&self) -> u64 {
        self.trailer.term_count as u64
    }

    fn list_count(&self) -> u64 {
        self.trailer.list_count as u64
    }

    fn current_term(&self) -> Option<&str> {
        self.current_term.as_deref()
    }

    fn current_header(&self) -> Option<&PostingListSegmentHeader> {
        self.pending_headers.front()
    }

    fn next_compressed(&mut self) -> Result<Option<(PostingListSegmentHeader, Vec<u8>)>> {
        let Some(header) = self.pending_headers.pop_front() else {
            return Ok(None);
        };
        let bytes = match self.pending_singleton.take() {
            Some(bytes) => bytes,
            None => self.read_bytes(header.byte_length as usize)?,
        };
        if self.pending_headers.is_empty() {
            self.load_next_term()?;
        }
        Ok(Some((header, bytes)))
    }
}

/// Wraps an iterator and drops every list with fewer postings than a
/// threshold. Used when building pruned indices, where rare terms carry no
/// useful impact information.
pub struct ThresholdIterator {
    inner: Box<dyn IndexSource>,
    threshold: u64,
    /// Buffered segments of the current surviving term.
    buffered: VecDeque<(PostingListSegmentHeader, Vec<u8>)>,
    buffered_term: Option<String>,
}

impl ThresholdIterator {
    pub fn new(inner: Box<dyn IndexSource>, threshold: u64) -> Result<ThresholdIterator> {
        let mut iterator = ThresholdIterator {
            inner,
            threshold,
            buffered: VecDeque::new(),
            buffered_term: None,
        };
        iterator.advance_to_surviving_term()?;
        Ok(iterator)
    }

    fn advance_to_surviving_term(&mut self) -> Result<()> {
        loop {
            let Some(term) = self.inner.current_term().map(String::from) else {
                self.buffered_term = None;
                return Ok(());
            };
            let mut segments = VecDeque::new();
            let mut total = 0u64;
            while self.inner.current_term() == Some(term.as_str()) {
                let Some((header, bytes)) = self.inner.next_compressed()? else {
                    break;
                };
                total += header.posting_count as u64;
                segments.push_back((header, bytes));
            }
            if total >= self.threshold {
                self.buffered = segments;
                self.buffered_term = Some(term);
                return Ok(());
            }
        }
    }
}

impl IndexSource for ThresholdIterator {
    fn term_count(&self) -> u64 {
        self.inner.term_count()
    }

    fn list_count(&self) -> u64 {
        self.inner.list_count()
    }

    fn current_term(&self) -> Option<&str> {
        self.buffered_term.as_deref()
    }

    fn current_header(&self) -> Option<&PostingListSegmentHeader> {
        self.buffered.front().map(|(header, _)| header)
    }

    fn next_compressed(&mut self) -> Result<Option<(PostingListSegmentHeader, Vec<u8>)>> {
        let Some(front) = self.buffered.pop_front() else {
            return Ok(None);
        };
        if self.buffered.is_empty() {
            self.advance_to_surviving_term()?;
        }
        Ok(Some(front))
    }
}
