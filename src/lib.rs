pub mod core;
pub mod compression;
pub mod index;
pub mod query;
pub mod concurrency;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                          QUARRY ENGINE ARCHITECTURE                          │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── CORE LAYER ───────────────────────────────────┐
│  struct Config          // immutable, read once at startup                   │
│  struct EngineStats     // atomic counters (bytes read/written, ...)         │
│  enum ErrorKind / struct Error / type Result<T>                              │
│  type Posting = u64     // word position, or (doc_id << 5) | tf_bucket       │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── COMPRESSION LAYER ───────────────────────────────┐
│  enum CompressionMethod   // one-byte tag at the front of every stream       │
│  compress_with / decompress_any / compress_best / merge_compressed_lists     │
│  vByte · γ · δ · Rice · Golomb · Simple-9 · Interpolative · Nibble · LLRun   │
│  HuffmanDirect · Huffman2 · GUBC · GUBCIP · PForDelta · GroupVarInt · None   │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── INDEX LAYER ──────────────────────────────────┐
│  struct Lexicon              // in-memory inversion dictionary (2^20 chains) │
│     • grouped arena chunks or realloc buffers, vByte-delta postings          │
│     • flush_to(CompactIndexWriter) via hybrid sort                           │
│  struct CompactIndexWriter   // blocks → descriptors → trailer, temp+rename  │
│  struct CompactIndex         // reader: descriptor binary search + scan      │
│  struct CompactIndexIterator // one-pass (term, header, segment) stream      │
│  struct MultipleIndexIterator / struct IndexMerger  // k-way merge (+GC)     │
│  struct SegmentedPostingList // L2: 64 compressed segs, L1: 4 decoded segs   │
│  enum ExtentList             // Empty | InMemory | Segmented | Or | And | Dyn│
│  struct DocLenTable          // mmap'd {doc_start: i64, doc_len: f64} records│
│  prune_index()               // impact-ordered pruned index variant          │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── QUERY LAYER ──────────────────────────────────┐
│  struct RankedQuery     // @rank[bm25][count=10] "t1", #2.0 "t2"             │
│     • DAAT (sentinel scorer heap, PREVIEW=64, MaxScore)                      │
│     • TAAT (bounded accumulators, adaptive tf pruning)                       │
│     • conjunctive (shortest-list pivot probing)                              │
│  struct ScoredHeap      // top-k min-heap with +inf sentinels                │
│  struct LanguageModel   // feedback: KLD term selection over top docs        │
│  struct QueryRegistry   // explicit command name → constructor + help        │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── CONCURRENCY LAYER ───────────────────────────────┐
│  struct SnapshotRegistry // register/release, publish + wait-for-drain       │
│  struct Snapshot         // stable segment set + deleted-docs treemap        │
└──────────────────────────────────────────────────────────────────────────────┘

  Lexicon ──flush──> CompactIndexWriter ──rename──> CompactIndex
  CompactIndex ──get_postings──> ExtentList ──scored by──> RankedQuery
  CompactIndexIterator ──k-way──> IndexMerger ──writes──> CompactIndexWriter
*/
