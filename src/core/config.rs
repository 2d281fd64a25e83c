use crate::compression::CompressionMethod;
use std::path::PathBuf;

/// How the in-memory dictionary allocates per-term posting buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexiconAllocation {
    /// Chained chunks carved out of a shared arena (default).
    Grouped,
    /// One contiguous buffer per term, grown in place.
    Realloc,
}

/// Immutable engine configuration. Read once at startup and passed by
/// reference into every subsystem.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,

    /// Memory budget for one in-memory index partition; reaching it
    /// triggers a flush to disk.
    pub memory_limit: usize,

    /// Per-query memory budget (accumulators, decoded lists).
    pub max_query_space: usize,

    /// Compression method for newly written list segments.
    pub compression_mode: CompressionMethod,

    pub lexicon_allocation: LexiconAllocation,

    /// 0 = no stemming, 1 = stem terms that change under stemming,
    /// 2 = stem everything, 3 = keep only stemmed forms.
    pub stemming_level: u32,

    /// Keep whole on-disk indices in RAM; a pure cache, semantics unchanged.
    pub all_indices_in_memory: bool,

    /// Bypass the OS page cache while building (O_DIRECT).
    pub use_direct_io: bool,

    /// Index document-level postings only (no word positions).
    pub positionless_indexing: bool,

    pub merge_buffer_per_index: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./index"),
            memory_limit: 256 * 1024 * 1024,      // 256MB partition budget
            max_query_space: 64 * 1024 * 1024,    // 64MB per query
            compression_mode: CompressionMethod::VByte,
            lexicon_allocation: LexiconAllocation::Grouped,
            stemming_level: 1,
            all_indices_in_memory: false,
            use_direct_io: false,
            positionless_indexing: false,
            merge_buffer_per_index: 1024 * 1024,  // 1MB read buffer per input
        }
    }
}
