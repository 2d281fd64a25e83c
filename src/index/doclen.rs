//! Per-document length table, consumed by the ranking functions. Packed
//! little-endian records `{doc_start: i64, doc_len: f64}`, memory-mapped
//! read-only; one record per document, in document order. Also serves as the
//! document-boundary list used to translate result doc ids back into corpus
//! extents.

use crate::core::error::{Error, Result};
use crate::core::types::Posting;
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RECORD_BYTES: usize = 16;

pub struct DocLenTable {
    mmap: Mmap,
    document_count: usize,
    average_length: f32,
}

impl DocLenTable {
    /// Write a table from `(doc_start, doc_len)` records, in document order.
    pub fn write(path: &Path, documents: &[(i64, f64)]) -> Result<()> {
        let mut buffer = Vec::with_capacity(documents.len() * RECORD_BYTES);
        for &(doc_start, doc_len) in documents {
            buffer.extend_from_slice(&doc_start.to_le_bytes());
            buffer.extend_from_slice(&doc_len.to_le_bytes());
        }
        let mut file = File::create(path)?;
        file.write_all(&buffer)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn open(path: &Path) -> Result<DocLenTable> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() % RECORD_BYTES != 0 {
            return Err(Error::malformed("document-length table has a partial record"));
        }
        let document_count = mmap.len() / RECORD_BYTES;

        let mut total = 0.0f64;
        for doc in 0..document_count {
            total += read_record(&mmap, doc).1;
        }
        let average_length =
            if document_count > 0 { (total / document_count as f64) as f32 } else { 0.0 };

        Ok(DocLenTable { mmap, document_count, average_length })
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn average_length(&self) -> f32 {
        self.average_length
    }

    pub fn doc_length(&self, doc_id: u64) -> f32 {
        if (doc_id as usize) < self.document_count {
            read_record(&self.mmap, doc_id as usize).1 as f32
        } else {
            0.0
        }
    }

    pub fn doc_start(&self, doc_id: u64) -> Option<Posting> {
        if (doc_id as usize) < self.document_count {
            Some(read_record(&self.mmap, doc_id as usize).0 as Posting)
        } else {
            None
        }
    }

    /// Corpus extent of the nth document: its start position through the
    /// position just before the next document (or start + length for the
    /// last one).
    pub fn nth_extent(&self, doc_id: u64) -> Option<(Posting, Posting)> {
        let start = self.doc_start(doc_id)?;
        let end = match self.doc_start(doc_id + 1) {
            Some(next_start) => next_start.saturating_sub(1),
            None => start + read_record(&self.mmap, doc_id as usize).1 as u64,
        };
        Some((start, end))
    }
}

fn read_record(mmap: &Mmap, doc: usize) -> (i64, f64) {
    let at = doc * RECORD_BYTES;
    let doc_start = i64::from_le_bytes(mmap[at..at + 8].try_into().unwrap());
    let doc_len = f64::from_le_bytes(mmap[at + 8..at + 16].try_into().unwrap());
    (doc_start, doc_len)
}
