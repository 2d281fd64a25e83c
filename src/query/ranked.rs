//! Ranked (relevance) queries: `@rank[bm25][count=10] "w1", #2.0 "w2"`.
//! Parses the scorer list, fetches the document-level posting lists, turns
//! document frequencies into idf weights, dispatches to the selected
//! execution strategy, optionally runs one feedback pass, and translates
//! result document ids back into corpus extents.

use super::conjunctive;
use super::daat::{self, DaatOptions};
use super::feedback::{
    DocumentTermSource, LanguageModel, build_relevance_model, select_feedback_terms,
};
use super::modifiers::{
    FeedbackMode, ParsedCommand, RankedModifiers, Scorer, parse_scorers,
};
use super::results::{ScoredExtent, format_result_line, format_trec_line};
use super::taat;
use crate::core::error::Result;
use crate::core::types::{DOC_LEVEL_PREFIX, DOCUMENT_COUNT_OFFSET, decode_doc_level_tf,
    DOC_LEVEL_MAX_TF};
use crate::index::Index;
use crate::index::doclen::DocLenTable;
use crate::index::extent::{ExtentList, ExtentSource};
use roaring::RoaringTreemap;

pub const DEFAULT_K1: f32 = 1.2;
pub const DEFAULT_B: f32 = 0.75;
pub const MAX_SCORER_COUNT: usize = 512;

/// idf weights per scorer. A pruned list encodes its original document
/// frequency as the sentinel posting at its end; terms with df outside
/// `[1, N-1]` contribute nothing.
pub fn compute_term_weights(
    lists: &mut [ExtentList],
    external_weights: &[f64],
    document_count: f64,
) -> Vec<f64> {
    let mut weights = Vec::with_capacity(lists.len());
    for (i, list) in lists.iter_mut().enumerate() {
        let mut df = list.length() as f64;
        if let Some((sentinel, _)) = list.first_start_bigger_eq(DOCUMENT_COUNT_OFFSET) {
            df = (sentinel - DOCUMENT_COUNT_OFFSET) as f64;
        }
        if df < 1.0 || df > document_count - 1.0 {
            weights.push(0.0);
        } else {
            weights.push(external_weights[i] * (document_count / df).ln());
        }
    }
    weights
}

pub struct RankedQuery<'a> {
    index: &'a Index,
    doclens: &'a DocLenTable,
    pub modifiers: RankedModifiers,
    scorers: Vec<Scorer>,
}

impl<'a> RankedQuery<'a> {
    pub fn parse(
        index: &'a Index,
        doclens: &'a DocLenTable,
        command: &ParsedCommand,
    ) -> Result<RankedQuery<'a>> {
        let mut modifiers = RankedModifiers::from_modifiers(&command.modifiers)?;
        let scorers = parse_scorers(&command.body)?;
        if scorers.len() > MAX_SCORER_COUNT {
            return Err(crate::core::error::Error::new(
                crate::core::error::ErrorKind::CapacityExceeded,
                format!("{} scorers exceed the per-query maximum", scorers.len()),
            ));
        }
        // the per-query memory budget bounds the accumulator table
        let accumulator_bytes = std::mem::size_of::<(u64, f32, f32)>().max(16);
        modifiers.accumulator_limit = modifiers
            .accumulator_limit
            .min(index.config().max_query_space / accumulator_bytes)
            .max(1);
        Ok(RankedQuery { index, doclens, modifiers, scorers })
    }

    fn fetch_lists(&self, scorers: &[Scorer]) -> Vec<ExtentList> {
        scorers
            .iter()
            .map(|s| self.index.get_postings(&format!("{}{}", DOC_LEVEL_PREFIX, s.term)))
            .collect()
    }

    fn run_core(
        &self,
        scorers: &[Scorer],
        deleted: Option<&RoaringTreemap>,
    ) -> Vec<ScoredExtent> {
        let m = &self.modifiers;
        let mut lists = self.fetch_lists(scorers);
        let external: Vec<f64> = scorers.iter().map(|s| s.weight).collect();
        let weights = compute_term_weights(
            &mut lists,
            &external,
            self.doclens.document_count() as f64,
        );

        if m.conjunctive {
            conjunctive::execute(
                &mut lists, &weights, self.doclens, m.k1, m.b, m.count, deleted,
            )
        } else if m.term_at_a_time {
            taat::execute(
                &mut lists,
                &weights,
                self.doclens,
                m.k1,
                m.b,
                m.count,
                m.accumulator_limit,
                m.use_max_score,
                deleted,
            )
        } else {
            let options = DaatOptions { use_max_score: m.use_max_score, ntoulas: m.ntoulas };
            daat::execute(
                &mut lists, &weights, self.doclens, m.k1, m.b, m.count, deleted, &options,
            )
        }
    }

    /// Collection statistics of one term, for the feedback models.
    fn collection_stats(&self, term: &str) -> (f64, f64) {
        let mut list = self.index.get_postings(&format!("{}{}", DOC_LEVEL_PREFIX, term));
        let df = list.length() as f64;
        let mut cf = 0.0f64;
        let mut cursor = 0u64;
        while let Some((s, _)) = list.first_start_bigger_eq(cursor) {
            if s >= DOCUMENT_COUNT_OFFSET {
                break;
            }
            cf += decode_doc_level_tf(s & DOC_LEVEL_MAX_TF) as f64;
            cursor = s + 1;
        }
        (cf.max(df), df)
    }

    /// Full query plan: retrieval, optional feedback pass, second retrieval,
    /// docid-to-extent translation.
    pub fn execute(
        &mut self,
        feedback_source: Option<&dyn DocumentTermSource>,
    ) -> Result<Vec<ScoredExtent>> {
        let guard = self.index.snapshots().register()?;
        self.index.stats().add_queries_executed();
        let deleted = std::sync::Arc::clone(&guard.snapshot().deleted_docs);
        let mut results = self.run_core(&self.scorers, Some(&*deleted));

        if self.modifiers.feedback != FeedbackMode::Off {
            if let Some(source) = feedback_source {
                let top = &results[..results.len().min(self.modifiers.feedback_docs)];
                let relevance =
                    build_relevance_model(source, top, self.modifiers.feedback_stemming);

                let mut collection = LanguageModel::new();
                collection.document_count = self.doclens.document_count() as f64;
                for (term, _, _) in relevance.terms() {
                    let (cf, df) = self.collection_stats(term);
                    collection.add_term(term, cf, df);
                }
                // the collection model must know the true token mass, not
                // just the candidates' share of it
                collection.corpus_size =
                    (self.doclens.document_count() as f64) * self.doclens.average_length() as f64;

                let original: Vec<String> =
                    self.scorers.iter().map(|s| s.term.clone()).collect();
                let expansion = select_feedback_terms(
                    self.modifiers.feedback,
                    &relevance,
                    &collection,
                    &original,
                    self.modifiers.feedback_terms,
                );
                if !expansion.is_empty() {
                    let mut scorers = self.scorers.clone();
                    if self.modifiers.feedback_reweight {
                        for s in scorers.iter_mut() {
                            s.weight *= 1.0 - self.modifiers.feedback_weight;
                        }
                    }
                    for term in expansion {
                        scorers.push(Scorer { term, weight: self.modifiers.feedback_weight });
                    }
                    scorers.truncate(MAX_SCORER_COUNT);
                    results = self.run_core(&scorers, Some(&*deleted));
                }
            } else {
                log::warn!("feedback requested but no document-term source is attached");
            }
        }
        drop(guard);

        // result extents carry document numbers; translate to corpus offsets
        for result in results.iter_mut() {
            let doc_id = result.from;
            if let Some((start, end)) = self.doclens.nth_extent(doc_id) {
                result.from = start;
                result.to = end;
                result.container_from = start;
                result.container_to = end;
            }
        }

        // [start]/[end] slicing of the result window
        let start = self.modifiers.start.min(results.len());
        let end = self.modifiers.end.unwrap_or(usize::MAX).clamp(start, results.len());
        Ok(results[start..end].to_vec())
    }

    /// Render results the way the command surface prints them.
    pub fn result_lines(&self, results: &[ScoredExtent]) -> Vec<String> {
        results
            .iter()
            .enumerate()
            .map(|(rank, result)| {
                if self.modifiers.trec_format {
                    format_trec_line(
                        &self.modifiers.query_id,
                        &format!("doc{}", result.container_from),
                        rank + 1,
                        result,
                        &self.modifiers.run_id,
                    )
                } else {
                    format_result_line(&self.modifiers.query_id, result)
                }
            })
            .collect()
    }
}
