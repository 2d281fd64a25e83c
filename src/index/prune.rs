//! Impact-ordered index pruning. For each document-level list, postings are
//! scored by their BM25 contribution, the top `keep` (plus anything within
//! a factor epsilon of the keep-th impact) survive, and the survivors are
//! re-sorted by posting with the original document frequency appended as
//! the sentinel posting. Queries over the pruned index run unchanged and
//! return approximate results.

use super::compact_writer::CompactIndexWriter;
use super::doclen::DocLenTable;
use super::iterator::{IndexSource, ThresholdIterator};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::stats::EngineStats;
use crate::core::types::{
    DOC_LEVEL_MAX_TF, DOC_LEVEL_PREFIX, DOCUMENT_COUNT_OFFSET, Posting, decode_doc_level_tf,
    doc_id_from_posting,
};
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Terms in fewer documents than this carry no useful impact ordering.
pub const DOCUMENT_COUNT_THRESHOLD: u64 = 2;

#[derive(Debug, Clone)]
pub struct PruneParams {
    /// Postings kept per list.
    pub keep: usize,
    /// Fringe factor: postings within `epsilon * impact(keep-th)` survive too.
    pub epsilon: f32,
    pub k1: f32,
    pub b: f32,
}

impl Default for PruneParams {
    fn default() -> Self {
        PruneParams { keep: 1000, epsilon: 0.0, k1: 1.2, b: 0.75 }
    }
}

pub fn prune_index(
    input: Box<dyn IndexSource>,
    doclens: &DocLenTable,
    output: &Path,
    config: &Config,
    stats: Arc<EngineStats>,
    params: &PruneParams,
) -> Result<()> {
    let document_count = doclens.document_count() as f64;
    let avgdl = doclens.average_length().max(1.0);
    let mut writer = CompactIndexWriter::create(output, config, stats)?;
    let mut input = ThresholdIterator::new(input, DOCUMENT_COUNT_THRESHOLD)?;

    while let Some(term) = input.current_term().map(String::from) {
        let mut postings: Vec<Posting> = Vec::new();
        while input.current_term() == Some(term.as_str()) {
            let Some((_, segment)) = input.next_uncompressed()? else {
                break;
            };
            postings.extend_from_slice(&segment);
        }
        // only document-level lists have impacts to order by
        if !term.starts_with(DOC_LEVEL_PREFIX) {
            continue;
        }
        postings.retain(|&p| p < DOCUMENT_COUNT_OFFSET);
        if postings.is_empty() {
            continue;
        }

        let df = postings.len() as f64;
        let idf = (document_count / df).max(1.0).ln() as f32;
        let (k1, b) = (params.k1, params.b);
        let mut scored: Vec<(f32, Posting)> = postings
            .par_iter()
            .map(|&posting| {
                let dl = doclens.doc_length(doc_id_from_posting(posting));
                let tf = decode_doc_level_tf(posting & DOC_LEVEL_MAX_TF);
                let k = k1 * (1.0 - b + b * dl / avgdl);
                (idf * tf * (k1 + 1.0) / (tf + k), posting)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1))
        });

        let cut = if scored.len() > params.keep {
            let boundary = scored[params.keep - 1].0 * params.epsilon;
            let mut cut = params.keep;
            while cut < scored.len() && scored[cut].0 >= boundary && params.epsilon > 0.0 {
                cut += 1;
            }
            cut
        } else {
            scored.len()
        };
        scored.truncate(cut);

        let mut kept: Vec<Posting> = scored.into_iter().map(|(_, p)| p).collect();
        kept.sort_unstable();
        // the sentinel preserves the original df for query-time idf weights
        kept.push(DOCUMENT_COUNT_OFFSET + df as u64);
        writer.add_postings(&term, &kept)?;
    }
    writer.finish()?;
    Ok(())
}
