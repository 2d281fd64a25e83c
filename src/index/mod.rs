pub mod compact;
pub mod compact_reader;
pub mod compact_writer;
pub mod doclen;
pub mod extent;
pub mod iterator;
pub mod lexicon;
pub mod merger;
pub mod multi_iterator;
pub mod postings_file;
pub mod prune;
pub mod segmented;

use crate::concurrency::snapshots::SnapshotRegistry;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::stats::EngineStats;
use crate::core::types::Posting;
use self::compact_reader::CompactIndex;
use self::compact_writer::CompactIndexWriter;
use self::extent::ExtentList;
use self::lexicon::Lexicon;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// The index front: one in-memory partition plus the on-disk sub-indices it
/// has flushed, published to queries through snapshot registration.
pub struct Index {
    config: Arc<Config>,
    stats: Arc<EngineStats>,
    lexicon: Mutex<Lexicon>,
    sub_indices: Mutex<Vec<Arc<CompactIndex>>>,
    snapshots: SnapshotRegistry,
    next_partition: Mutex<u32>,
    corpus: Mutex<CorpusState>,
}

/// Document bookkeeping for the ingestion surface: the running corpus
/// position and the per-document length records.
#[derive(Default)]
struct CorpusState {
    next_position: u64,
    doc_records: Vec<(i64, f64)>,
}

impl Index {
    pub fn create(config: Arc<Config>) -> Result<Index> {
        std::fs::create_dir_all(&config.storage_path)?;
        let stats = Arc::new(EngineStats::new());
        Ok(Index {
            lexicon: Mutex::new(Lexicon::new(&config)),
            sub_indices: Mutex::new(Vec::new()),
            snapshots: SnapshotRegistry::new(),
            next_partition: Mutex::new(0),
            corpus: Mutex::new(CorpusState::default()),
            config,
            stats,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn snapshots(&self) -> &SnapshotRegistry {
        &self.snapshots
    }

    /// Feed one `(term, position)` pair from the tokenizer. Flushes the
    /// current partition first when the memory budget is exhausted.
    pub fn add_token(&self, term: &str, position: Posting) -> Result<()> {
        let mut lexicon = self.lexicon.lock();
        if lexicon.memory_occupied() >= self.config.memory_limit {
            drop(lexicon);
            self.flush_partition()?;
            lexicon = self.lexicon.lock();
        }
        lexicon.add_posting_str(term, position);
        Ok(())
    }

    /// Index one document: word positions for every token (unless the index
    /// is positionless), document delimiters, and one document-level posting
    /// per distinct term. Returns the document id.
    pub fn add_document(&self, tokens: &[&str]) -> Result<u64> {
        use crate::core::types::{
            DOC_END_TAG, DOC_LEVEL_PREFIX, DOC_START_TAG, MAX_TOKEN_LENGTH,
            make_doc_level_posting,
        };
        use std::collections::BTreeMap;

        let (doc_id, doc_start) = {
            let mut corpus = self.corpus.lock();
            let doc_id = corpus.doc_records.len() as u64;
            let doc_start = corpus.next_position;
            corpus.doc_records.push((doc_start as i64, tokens.len() as f64));
            corpus.next_position += tokens.len() as u64 + 2;
            (doc_id, doc_start)
        };

        let budget = MAX_TOKEN_LENGTH - DOC_LEVEL_PREFIX.len();
        let mut frequencies: BTreeMap<String, u32> = BTreeMap::new();
        let mut position = doc_start;
        self.add_token(DOC_START_TAG, position)?;
        for token in tokens {
            position += 1;
            let mut term = token.to_lowercase();
            term.truncate(budget);
            if term.is_empty() {
                continue;
            }
            if !self.config.positionless_indexing {
                self.add_token(&term, position)?;
            }
            *frequencies.entry(term).or_insert(0) += 1;
        }
        self.add_token(DOC_END_TAG, position + 1)?;

        for (term, tf) in frequencies {
            self.add_token(
                &format!("{}{}", DOC_LEVEL_PREFIX, term),
                make_doc_level_posting(doc_id, tf),
            )?;
        }
        Ok(doc_id)
    }

    pub fn document_count(&self) -> u64 {
        self.corpus.lock().doc_records.len() as u64
    }

    /// Write the per-document length table for the documents indexed so far.
    pub fn write_doclen_table(&self, path: &std::path::Path) -> Result<()> {
        let corpus = self.corpus.lock();
        doclen::DocLenTable::write(path, &corpus.doc_records)
    }

    fn partition_path(&self, id: u32) -> PathBuf {
        self.config.storage_path.join(format!("index.{:03}", id))
    }

    /// Flush the in-memory partition to a new on-disk sub-index and publish
    /// the enlarged index set as a new snapshot.
    pub fn flush_partition(&self) -> Result<()> {
        let mut lexicon = self.lexicon.lock();
        if lexicon.term_count() == 0 {
            return Ok(());
        }
        let id = {
            let mut next = self.next_partition.lock();
            let id = *next;
            *next += 1;
            id
        };
        let path = self.partition_path(id);
        let mut writer = CompactIndexWriter::create(&path, &self.config, Arc::clone(&self.stats))?;
        lexicon.flush_to(&mut writer)?;
        writer.finish()?;
        lexicon.clear();
        drop(lexicon);

        let reader = Arc::new(CompactIndex::open(&path, &self.config, Arc::clone(&self.stats))?);
        let mut subs = self.sub_indices.lock();
        subs.push(reader);
        let ids: Vec<u64> = (0..subs.len() as u64).collect();
        drop(subs);
        self.snapshots.publish(ids);
        self.stats
            .partitions_flushed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Merge every on-disk sub-index into one, wait for older readers to
    /// drain, and swap the merged index in.
    pub fn merge_all(&self) -> Result<()> {
        let subs = self.sub_indices.lock().clone();
        if subs.len() < 2 {
            return Ok(());
        }
        let merged_path = {
            let mut next = self.next_partition.lock();
            let id = *next;
            *next += 1;
            self.partition_path(id)
        };
        let mut iterators: Vec<Box<dyn iterator::IndexSource>> = Vec::new();
        for sub in &subs {
            iterators.push(Box::new(sub.iterate(self.config.merge_buffer_per_index)?));
        }
        merger::IndexMerger::merge(
            iterators,
            &merged_path,
            &self.config,
            Arc::clone(&self.stats),
            None,
        )?;
        let merged =
            Arc::new(CompactIndex::open(&merged_path, &self.config, Arc::clone(&self.stats))?);

        let old_snapshot = self.snapshots.publish(vec![0]);
        self.snapshots.wait_for_drain(old_snapshot);
        let mut subs = self.sub_indices.lock();
        let old: Vec<Arc<CompactIndex>> = std::mem::take(&mut *subs);
        subs.push(merged);
        drop(subs);
        for sub in old {
            let _ = std::fs::remove_file(sub.path());
        }
        Ok(())
    }

    /// Number of on-disk sub-indices currently mounted.
    pub fn sub_index_count(&self) -> usize {
        self.sub_indices.lock().len()
    }

    /// All postings for `term`, across the in-memory partition and every
    /// on-disk sub-index. Missing terms yield an empty list, not an error.
    pub fn get_postings(&self, term: &str) -> ExtentList {
        let mut lists = Vec::new();
        {
            let lexicon = self.lexicon.lock();
            if let Some(list) = lexicon.get_postings(term) {
                lists.push(list);
            }
        }
        for sub in self.sub_indices.lock().iter() {
            match sub.get_postings(term) {
                Ok(list) => {
                    if !matches!(list, ExtentList::Empty) {
                        lists.push(list);
                    }
                }
                Err(e) => {
                    log::warn!("reading postings for {:?} failed, treating as empty: {}", term, e);
                }
            }
        }
        match lists.len() {
            0 => ExtentList::Empty,
            1 => lists.pop().unwrap(),
            _ => ExtentList::or(lists),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::extent::ExtentSource;
    use crate::query::daat::{self, DaatOptions};
    use crate::query::ranked::compute_term_weights;

    fn engine(dir: &tempfile::TempDir) -> Index {
        let config = Arc::new(Config {
            storage_path: dir.path().to_path_buf(),
            stemming_level: 0,
            ..Config::default()
        });
        Index::create(config).unwrap()
    }

    #[test]
    fn queries_span_memory_and_disk_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let index = engine(&dir);
        index.add_document(&["alpha", "beta"]).unwrap();
        index.flush_partition().unwrap();
        index.add_document(&["alpha", "gamma"]).unwrap();

        // "alpha" lives both in the flushed partition and in memory
        let mut list = index.get_postings("<!>alpha");
        assert_eq!(list.length(), 2);
        let mut list = index.get_postings("<!>beta");
        assert_eq!(list.length(), 1);
        let mut list = index.get_postings("<!>missing");
        assert_eq!(list.length(), 0);
    }

    #[test]
    fn merged_shards_answer_like_a_single_build() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(19);
        let vocabulary: Vec<String> = (0..30).map(|i| format!("w{:02}", i)).collect();
        let documents: Vec<Vec<&str>> = (0..120)
            .map(|_| {
                (0..rng.gen_range(3..20))
                    .map(|_| vocabulary[rng.gen_range(0..vocabulary.len())].as_str())
                    .collect()
            })
            .collect();

        // sharded build: flush every 40 documents, then merge everything
        let sharded_dir = tempfile::tempdir().unwrap();
        let sharded = engine(&sharded_dir);
        for (i, doc) in documents.iter().enumerate() {
            sharded.add_document(doc).unwrap();
            if (i + 1) % 40 == 0 {
                sharded.flush_partition().unwrap();
            }
        }
        sharded.flush_partition().unwrap();
        assert_eq!(sharded.sub_index_count(), 3);
        sharded.merge_all().unwrap();
        assert_eq!(sharded.sub_index_count(), 1);

        // single-shot build stays in memory
        let single_dir = tempfile::tempdir().unwrap();
        let single = engine(&single_dir);
        for doc in &documents {
            single.add_document(doc).unwrap();
        }

        let doclen_path = single_dir.path().join("doclens");
        single.write_doclen_table(&doclen_path).unwrap();
        let doclens = doclen::DocLenTable::open(&doclen_path).unwrap();

        // per-term posting lists agree
        for word in &vocabulary {
            let term = format!("<!>{}", word);
            let mut a = sharded.get_postings(&term);
            let mut b = single.get_postings(&term);
            assert_eq!(a.to_vec(), b.to_vec(), "term {:?}", term);
        }

        // and so do ranked top-10 results over random two-term queries
        let n = documents.len() as f64;
        for _ in 0..20 {
            let t1 = &vocabulary[rng.gen_range(0..vocabulary.len())];
            let t2 = &vocabulary[rng.gen_range(0..vocabulary.len())];
            let mut run = |index: &Index| {
                let mut lists =
                    vec![index.get_postings(&format!("<!>{}", t1)), index.get_postings(&format!("<!>{}", t2))];
                let weights = compute_term_weights(&mut lists, &[1.0, 1.0], n);
                daat::execute(
                    &mut lists,
                    &weights,
                    &doclens,
                    1.2,
                    0.75,
                    10,
                    None,
                    &DaatOptions::default(),
                )
            };
            let from_shards = run(&sharded);
            let from_single = run(&single);
            assert_eq!(from_shards.len(), from_single.len());
            for (a, b) in from_shards.iter().zip(from_single.iter()) {
                assert_eq!(a.from, b.from, "query {:?} {:?}", t1, t2);
                assert!((a.score - b.score).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn wildcard_queries_reach_disk_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let index = engine(&dir);
        index.add_document(&["europa", "europe", "evening"]).unwrap();
        index.flush_partition().unwrap();

        let subs = index.sub_indices.lock();
        let mut list = subs[0].get_postings("euro*").unwrap();
        assert_eq!(list.length(), 2);
    }
}
