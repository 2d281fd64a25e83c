//! In-memory inversion dictionary. Accepts a `(term, position)` stream and
//! accumulates vByte-delta-coded postings per term until the partition's
//! memory budget is hit, then flushes a sorted sub-index through a
//! compact-index writer.
//!
//! Terms live in a fixed-size chained hash table. Posting bytes live either
//! in chained chunks carved out of a paged arena (default) or in one growing
//! buffer per term. Chunk references are typed `(page, offset)` indices, so
//! the dictionary owns the whole arena for its lifetime.

use super::compact_writer::CompactIndexWriter;
use super::extent::ExtentList;
use crate::core::config::{Config, LexiconAllocation};
use crate::core::error::Result;
use crate::core::sorting::hybrid_sort_terms;
use crate::core::types::{MAX_TOKEN_LENGTH, Posting, TARGET_SEGMENT_SIZE};
use rust_stemmers::{Algorithm, Stemmer};

pub const HASHTABLE_SIZE: usize = 1 << 20;
const INITIAL_SLOT_COUNT: usize = 1024;
const SLOT_GROWTH_RATE: f64 = 1.25;

/// Data bytes in a term's first chunk; enough for most long-tail terms.
const INITIAL_CHUNK_SIZE: usize = 6;
/// A new chunk holds ~25% of the bytes allocated to the term so far.
const CHUNK_GROWTH_RATE: f64 = 0.25;
const MAX_CHUNK_SIZE: usize = 60000;

const CHUNK_HEADER: usize = 6; // next: u32, capacity: u16
const NO_CHUNK: u32 = u32::MAX;

const PAGE_SHIFT: u32 = 20;
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// The dictionary's "very stupid" string hash.
pub fn simple_hash(term: &[u8]) -> u32 {
    let mut hash = 0u32;
    for &byte in term {
        hash = hash.wrapping_mul(127).wrapping_add(byte as u32);
    }
    hash
}

/// Paged byte arena. Chunk references encode `(page, offset)` in one u32.
struct Arena {
    pages: Vec<Vec<u8>>,
}

impl Arena {
    fn new() -> Arena {
        Arena { pages: Vec::new() }
    }

    fn alloc(&mut self, len: usize) -> u32 {
        debug_assert!(len <= PAGE_SIZE);
        if self.pages.last().is_none_or(|p| p.len() + len > PAGE_SIZE) {
            self.pages.push(Vec::with_capacity(PAGE_SIZE));
        }
        let page = self.pages.len() - 1;
        let offset = self.pages[page].len();
        self.pages[page].resize(offset + len, 0);
        ((page as u32) << PAGE_SHIFT) | offset as u32
    }

    fn slice(&self, chunk: u32, len: usize) -> &[u8] {
        let (page, offset) = ((chunk >> PAGE_SHIFT) as usize, (chunk & (PAGE_SIZE as u32 - 1)) as usize);
        &self.pages[page][offset..offset + len]
    }

    fn slice_mut(&mut self, chunk: u32, len: usize) -> &mut [u8] {
        let (page, offset) = ((chunk >> PAGE_SHIFT) as usize, (chunk & (PAGE_SIZE as u32 - 1)) as usize);
        &mut self.pages[page][offset..offset + len]
    }

    fn chunk_next(&self, chunk: u32) -> u32 {
        u32::from_le_bytes(self.slice(chunk, 4).try_into().unwrap())
    }

    fn set_chunk_next(&mut self, chunk: u32, next: u32) {
        self.slice_mut(chunk, 4).copy_from_slice(&next.to_le_bytes());
    }

    fn chunk_capacity(&self, chunk: u32) -> usize {
        u16::from_le_bytes(self.slice(chunk, 6)[4..6].try_into().unwrap()) as usize
    }

    fn alloc_chunk(&mut self, capacity: usize) -> u32 {
        let chunk = self.alloc(CHUNK_HEADER + capacity);
        let header = self.slice_mut(chunk, CHUNK_HEADER);
        header[..4].copy_from_slice(&NO_CHUNK.to_le_bytes());
        header[4..6].copy_from_slice(&(capacity as u16).to_le_bytes());
        chunk
    }

    fn occupied(&self) -> usize {
        self.pages.iter().map(|p| p.capacity()).sum()
    }
}

/// Per-term posting bytes.
enum PostingBuffer {
    /// 0 or 1 postings: nothing allocated yet.
    Empty,
    /// Chained arena chunks.
    Chained { head: u32, tail: u32, tail_used: u16, total_capacity: usize },
    /// One contiguous buffer, grown in place.
    Owned(Vec<u8>),
}

struct TermSlot {
    term: [u8; MAX_TOKEN_LENGTH + 1],
    term_len: u8,
    hash: u32,
    next_in_chain: i32,
    posting_count: u64,
    last_posting: Posting,
    first_posting: Posting,
    /// Slot of the stemmed form: own id if unstemmable, -1 if this slot is
    /// itself a stemmed form.
    stemmed_form: i32,
    buffer: PostingBuffer,
}

impl TermSlot {
    fn term_bytes(&self) -> &[u8] {
        &self.term[..self.term_len as usize]
    }
}

pub struct Lexicon {
    slots: Vec<TermSlot>,
    hashtable: Vec<i32>,
    arena: Arena,
    allocation: LexiconAllocation,
    stemming_level: u32,
    stemmer: Stemmer,
    /// Arena + slot + table bytes; drives the flush decision.
    owned_buffer_bytes: usize,
}

impl Lexicon {
    pub fn new(config: &Config) -> Lexicon {
        Lexicon {
            slots: Vec::with_capacity(INITIAL_SLOT_COUNT),
            hashtable: vec![-1; HASHTABLE_SIZE],
            arena: Arena::new(),
            allocation: config.lexicon_allocation,
            stemming_level: config.stemming_level,
            stemmer: Stemmer::create(Algorithm::English),
            owned_buffer_bytes: 0,
        }
    }

    pub fn term_count(&self) -> usize {
        self.slots.len()
    }

    pub fn memory_occupied(&self) -> usize {
        self.arena.occupied()
            + self.slots.capacity() * std::mem::size_of::<TermSlot>()
            + self.hashtable.len() * 4
            + self.owned_buffer_bytes
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.slots.shrink_to(INITIAL_SLOT_COUNT);
        self.hashtable.fill(-1);
        self.arena = Arena::new();
        self.owned_buffer_bytes = 0;
    }

    pub fn add_posting_str(&mut self, term: &str, posting: Posting) {
        let bytes = term.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_TOKEN_LENGTH {
            log::warn!("term of length {} dropped", bytes.len());
            return;
        }
        self.add_posting(bytes, posting, simple_hash(bytes));
    }

    /// Insert one posting. Returns the term's slot id. Also posts under the
    /// stemmed form when stemming is enabled; the recursion is one step deep
    /// because stemmed forms end in '$' and are never stemmed again.
    pub fn add_posting(&mut self, term: &[u8], posting: Posting, hash: u32) -> i32 {
        let slot_index = (hash as usize) % HASHTABLE_SIZE;
        let mut term_id = self.hashtable[slot_index];
        let mut previous = -1i32;
        while term_id >= 0 {
            let slot = &self.slots[term_id as usize];
            if slot.hash == hash && slot.term_bytes() == term {
                break;
            }
            previous = term_id;
            term_id = slot.next_in_chain;
        }

        if term_id < 0 {
            return self.insert_new_term(term, posting, hash, slot_index);
        }

        // move the hit to the front of its chain
        if previous >= 0 {
            let next = self.slots[term_id as usize].next_in_chain;
            self.slots[previous as usize].next_in_chain = next;
            self.slots[term_id as usize].next_in_chain = self.hashtable[slot_index];
            self.hashtable[slot_index] = term_id;
        }

        let stemmed_form = self.slots[term_id as usize].stemmed_form;
        let keep_surface_form =
            self.stemming_level < 3 || stemmed_form < 0 || stemmed_form == term_id;

        if keep_surface_form {
            let slot = &self.slots[term_id as usize];
            if posting <= slot.last_posting {
                log::warn!(
                    "postings not monotonically increasing for {:?}: {} after {}",
                    String::from_utf8_lossy(term),
                    posting,
                    slot.last_posting
                );
                return term_id;
            }
            self.append_posting(term_id as usize, posting);
        }

        if stemmed_form >= 0 && stemmed_form != term_id {
            let stem_term = self.slots[stemmed_form as usize].term_bytes().to_vec();
            let stem_hash = self.slots[stemmed_form as usize].hash;
            self.add_posting(&stem_term, posting, stem_hash);
        }
        term_id
    }

    fn insert_new_term(&mut self, term: &[u8], posting: Posting, hash: u32, slot_index: usize) -> i32 {
        if self.slots.len() == self.slots.capacity() {
            let grown = ((self.slots.capacity() as f64) * SLOT_GROWTH_RATE) as usize;
            let target = grown.max(self.slots.capacity() + INITIAL_SLOT_COUNT);
            self.slots.reserve_exact(target - self.slots.len());
        }
        let term_id = self.slots.len() as i32;
        let mut slot = TermSlot {
            term: [0u8; MAX_TOKEN_LENGTH + 1],
            term_len: term.len() as u8,
            hash,
            next_in_chain: self.hashtable[slot_index],
            posting_count: 1,
            last_posting: posting,
            first_posting: posting,
            stemmed_form: term_id,
            buffer: PostingBuffer::Empty,
        };
        slot.term[..term.len()].copy_from_slice(term);
        self.slots.push(slot);
        self.hashtable[slot_index] = term_id;

        if term.last() == Some(&b'$') {
            self.slots[term_id as usize].stemmed_form = -1;
        } else if self.stemming_level > 0 {
            let surface = String::from_utf8_lossy(term).to_string();
            let stem = self.stemmer.stem(&surface).to_string();
            if stem.is_empty() || (self.stemming_level < 2 && stem == surface) {
                // unstemmable, or unchanged and we keep such terms as-is
            } else {
                let mut stem_term = stem.into_bytes();
                stem_term.truncate(MAX_TOKEN_LENGTH - 1);
                stem_term.push(b'$');
                let stemmed = self.add_posting(&stem_term, posting, simple_hash(&stem_term));
                self.slots[term_id as usize].stemmed_form = stemmed;
            }
        }
        term_id
    }

    /// Append the delta to the previous posting as vByte into the term's
    /// buffer; the first posting is written absolute when the buffer is
    /// created on the second posting.
    fn append_posting(&mut self, term_id: usize, posting: Posting) {
        if self.slots[term_id].posting_count == 1 {
            let first = self.slots[term_id].last_posting;
            self.create_buffer(term_id);
            self.append_vbyte(term_id, first);
            self.append_vbyte(term_id, posting - first);
        } else {
            let previous = self.slots[term_id].last_posting;
            self.append_vbyte(term_id, posting - previous);
        }
        let slot = &mut self.slots[term_id];
        slot.last_posting = posting;
        slot.posting_count += 1;
    }

    fn create_buffer(&mut self, term_id: usize) {
        self.slots[term_id].buffer = match self.allocation {
            LexiconAllocation::Grouped => {
                let head = self.arena.alloc_chunk(INITIAL_CHUNK_SIZE);
                PostingBuffer::Chained {
                    head,
                    tail: head,
                    tail_used: 0,
                    total_capacity: INITIAL_CHUNK_SIZE,
                }
            }
            LexiconAllocation::Realloc => PostingBuffer::Owned(Vec::with_capacity(INITIAL_CHUNK_SIZE)),
        };
    }

    fn append_vbyte(&mut self, term_id: usize, mut value: u64) {
        loop {
            let byte = if value >= 128 { 128 + (value & 127) as u8 } else { value as u8 };
            self.append_byte(term_id, byte);
            if value < 128 {
                break;
            }
            value >>= 7;
        }
    }

    fn append_byte(&mut self, term_id: usize, byte: u8) {
        if let PostingBuffer::Owned(buffer) = &mut self.slots[term_id].buffer {
            if buffer.len() == buffer.capacity() {
                let grown = ((buffer.capacity() as f64) * (1.0 + CHUNK_GROWTH_RATE)) as usize;
                let target = grown.max(buffer.capacity() + INITIAL_CHUNK_SIZE);
                self.owned_buffer_bytes += target - buffer.capacity();
                buffer.reserve_exact(target - buffer.len());
            }
            buffer.push(byte);
            return;
        }

        let (mut tail, mut used, mut total_capacity) = match &self.slots[term_id].buffer {
            PostingBuffer::Chained { tail, tail_used, total_capacity, .. } => {
                (*tail, *tail_used as usize, *total_capacity)
            }
            _ => unreachable!("buffer created before the first append"),
        };
        if used >= self.arena.chunk_capacity(tail) {
            let grown = ((total_capacity as f64) * CHUNK_GROWTH_RATE) as usize;
            let new_capacity = grown.clamp(INITIAL_CHUNK_SIZE, MAX_CHUNK_SIZE);
            let new_chunk = self.arena.alloc_chunk(new_capacity);
            self.arena.set_chunk_next(tail, new_chunk);
            tail = new_chunk;
            used = 0;
            total_capacity += new_capacity;
        }
        self.arena.slice_mut(tail, CHUNK_HEADER + used + 1)[CHUNK_HEADER + used] = byte;
        if let PostingBuffer::Chained {
            tail: slot_tail,
            tail_used: slot_used,
            total_capacity: slot_capacity,
            ..
        } = &mut self.slots[term_id].buffer
        {
            *slot_tail = tail;
            *slot_used = (used + 1) as u16;
            *slot_capacity = total_capacity;
        }
    }

    /// Decode a term's buffer back into absolute postings.
    fn decode_postings(&self, term_id: usize) -> Vec<Posting> {
        let slot = &self.slots[term_id];
        if slot.posting_count == 0 {
            return Vec::new();
        }
        if slot.posting_count == 1 {
            return vec![slot.last_posting];
        }
        let raw: Vec<u8> = match &slot.buffer {
            PostingBuffer::Owned(buffer) => buffer.clone(),
            PostingBuffer::Chained { head, tail, tail_used, .. } => {
                let mut bytes = Vec::new();
                let mut chunk = *head;
                loop {
                    let capacity = self.arena.chunk_capacity(chunk);
                    let used = if chunk == *tail { *tail_used as usize } else { capacity };
                    bytes.extend_from_slice(&self.arena.slice(chunk, CHUNK_HEADER + used)[CHUNK_HEADER..]);
                    if chunk == *tail {
                        break;
                    }
                    chunk = self.arena.chunk_next(chunk);
                }
                bytes
            }
            PostingBuffer::Empty => Vec::new(),
        };

        let mut postings = Vec::with_capacity(slot.posting_count as usize);
        let mut current = 0u64;
        let mut value = 0u64;
        let mut shift = 0u32;
        for byte in raw {
            value |= ((byte & 127) as u64) << shift;
            if byte < 128 {
                // the first value is absolute, the rest are gaps
                current += value;
                postings.push(current);
                value = 0;
                shift = 0;
            } else {
                shift += 7;
            }
        }
        debug_assert_eq!(postings.len(), slot.posting_count as usize);
        postings
    }

    /// Query view over the in-memory postings of a term, without flushing.
    pub fn get_postings(&self, term: &str) -> Option<ExtentList> {
        let bytes = term.as_bytes();
        let hash = simple_hash(bytes);
        let mut term_id = self.hashtable[(hash as usize) % HASHTABLE_SIZE];
        while term_id >= 0 {
            let slot = &self.slots[term_id as usize];
            if slot.hash == hash && slot.term_bytes() == bytes {
                return Some(ExtentList::from_postings(self.decode_postings(term_id as usize)));
            }
            term_id = slot.next_in_chain;
        }
        None
    }

    /// Sort all terms and stream them into a compact-index writer. The
    /// lexicon is left untouched; callers `clear()` afterwards.
    pub fn flush_to(&mut self, writer: &mut CompactIndexWriter) -> Result<()> {
        let mut order: Vec<u32> = (0..self.slots.len() as u32).collect();
        let slots = &self.slots;
        hybrid_sort_terms(
            &mut order,
            |id| {
                let term = slots[id as usize].term_bytes();
                let b0 = *term.first().unwrap_or(&0) as usize;
                let b1 = *term.get(1).unwrap_or(&0) as usize;
                (b0 << 8) | b1
            },
            |a, b| slots[a as usize].term_bytes().cmp(slots[b as usize].term_bytes()),
        );

        for &term_id in &order {
            let slot = &self.slots[term_id as usize];
            // with aggressive stemming, surface forms fold into their stems
            if self.stemming_level >= 3
                && slot.stemmed_form >= 0
                && slot.stemmed_form != term_id as i32
            {
                continue;
            }
            let term = String::from_utf8_lossy(slot.term_bytes()).to_string();
            let postings = self.decode_postings(term_id as usize);

            // stream long lists in target-sized runs
            let mut offset = 0;
            while offset < postings.len() {
                let take = (postings.len() - offset).min(TARGET_SEGMENT_SIZE);
                // avoid a dwarf tail segment
                let take = if postings.len() - offset - take < 16 { postings.len() - offset } else { take };
                writer.add_postings(&term, &postings[offset..offset + take])?;
                offset += take;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::compact_reader::CompactIndex;
    use crate::core::stats::EngineStats;
    use std::sync::Arc;

    fn lexicon_with(allocation: LexiconAllocation, stemming_level: u32) -> Lexicon {
        let config = Config { lexicon_allocation: allocation, stemming_level, ..Config::default() };
        Lexicon::new(&config)
    }

    #[test]
    fn postings_round_trip_through_the_arena() {
        for allocation in [LexiconAllocation::Grouped, LexiconAllocation::Realloc] {
            let mut lexicon = lexicon_with(allocation, 0);
            let mut expected: Vec<u64> = Vec::new();
            let mut position = 0u64;
            for i in 0..50_000u64 {
                position += 1 + (i % 97);
                lexicon.add_posting_str("water", position);
                expected.push(position);
            }
            let mut list = lexicon.get_postings("water").unwrap();
            assert_eq!(list.to_vec(), expected);
        }
    }

    #[test]
    fn single_posting_terms_avoid_allocation() {
        let mut lexicon = lexicon_with(LexiconAllocation::Grouped, 0);
        for i in 0..1000u64 {
            lexicon.add_posting_str(&format!("term{}", i), i + 1);
        }
        assert_eq!(lexicon.term_count(), 1000);
        let mut list = lexicon.get_postings("term7").unwrap();
        assert_eq!(list.to_vec(), vec![8]);
    }

    #[test]
    fn non_monotonic_postings_are_dropped() {
        let mut lexicon = lexicon_with(LexiconAllocation::Grouped, 0);
        lexicon.add_posting_str("term", 100);
        lexicon.add_posting_str("term", 50); // dropped
        lexicon.add_posting_str("term", 150);
        let mut list = lexicon.get_postings("term").unwrap();
        assert_eq!(list.to_vec(), vec![100, 150]);
    }

    #[test]
    fn stemming_posts_under_the_stemmed_form() {
        let mut lexicon = lexicon_with(LexiconAllocation::Grouped, 1);
        lexicon.add_posting_str("running", 10);
        lexicon.add_posting_str("runs", 20);
        let mut stemmed = lexicon.get_postings("run$").unwrap();
        assert_eq!(stemmed.to_vec(), vec![10, 20]);
        // surface forms are kept at level 1
        assert!(lexicon.get_postings("running").is_some());
    }

    #[test]
    fn hash_collisions_keep_chains_intact() {
        let mut lexicon = lexicon_with(LexiconAllocation::Grouped, 0);
        // force many chains through distinct terms
        for i in 0..5000u64 {
            lexicon.add_posting_str(&format!("t{}", i), i + 1);
            lexicon.add_posting_str(&format!("t{}", i), i + 100_000);
        }
        for i in (0..5000u64).step_by(333) {
            let mut list = lexicon.get_postings(&format!("t{}", i)).unwrap();
            assert_eq!(list.to_vec(), vec![i + 1, i + 100_000]);
        }
    }

    #[test]
    fn memory_accounting_grows_with_postings() {
        let mut lexicon = lexicon_with(LexiconAllocation::Grouped, 0);
        let baseline = lexicon.memory_occupied();
        for position in 1..10_000u64 {
            lexicon.add_posting_str("dense", position);
        }
        assert!(lexicon.memory_occupied() > baseline);
        lexicon.clear();
        assert_eq!(lexicon.term_count(), 0);
    }

    #[test]
    fn flush_produces_a_sorted_readable_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        let stats = Arc::new(EngineStats::new());
        let mut lexicon = lexicon_with(LexiconAllocation::Grouped, 0);
        let long: Vec<u64> = (1..40_000u64).collect();
        for &p in &long {
            lexicon.add_posting_str("zebra", p);
        }
        lexicon.add_posting_str("apple", 5);
        lexicon.add_posting_str("mango", 2);
        lexicon.add_posting_str("mango", 9);

        let path = dir.path().join("index.000");
        let mut writer = CompactIndexWriter::create(&path, &config, Arc::clone(&stats)).unwrap();
        lexicon.flush_to(&mut writer).unwrap();
        writer.finish().unwrap();

        let index = CompactIndex::open(&path, &config, stats).unwrap();
        assert_eq!(index.term_count(), 3);
        assert_eq!(index.get_postings("apple").unwrap().to_vec(), vec![5]);
        assert_eq!(index.get_postings("mango").unwrap().to_vec(), vec![2, 9]);
        assert_eq!(index.get_postings("zebra").unwrap().to_vec(), long);
    }
}
