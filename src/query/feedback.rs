//! Pseudo-relevance feedback hook points. After a first retrieval pass, a
//! language model is built from the top documents (through a document-term
//! source the text layer provides), candidate expansion terms are scored
//! against the collection model, and the best ones rejoin the query with a
//! reduced weight.

use super::modifiers::FeedbackMode;
use super::results::ScoredExtent;
use std::collections::HashMap;

/// Term statistics of some document set: collection frequency and document
/// frequency per term, plus the total token count.
#[derive(Debug, Default)]
pub struct LanguageModel {
    pub corpus_size: f64,
    pub document_count: f64,
    terms: HashMap<String, (f64, f64)>,
}

impl LanguageModel {
    pub fn new() -> LanguageModel {
        LanguageModel::default()
    }

    pub fn add_term(&mut self, term: &str, collection_frequency: f64, document_frequency: f64) {
        let entry = self.terms.entry(term.to_string()).or_insert((0.0, 0.0));
        entry.0 += collection_frequency;
        entry.1 += document_frequency;
        self.corpus_size += collection_frequency;
    }

    pub fn frequency(&self, term: &str) -> (f64, f64) {
        self.terms.get(term).copied().unwrap_or((0.0, 0.0))
    }

    /// Maximum-likelihood term probability, with a half-count floor so
    /// unseen terms never divide by zero downstream.
    pub fn probability(&self, term: &str) -> f64 {
        let (cf, _) = self.frequency(term);
        cf.max(0.5) / self.corpus_size.max(1.0)
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, f64, f64)> {
        self.terms.iter().map(|(term, &(cf, df))| (term.as_str(), cf, df))
    }
}

/// The text layer's side of the feedback interface: term frequencies of one
/// document. Tokenization lives outside the engine.
pub trait DocumentTermSource {
    fn terms_in_document(&self, doc_id: u64) -> Vec<(String, u32)>;
}

/// Build the relevance model from the top retrieved documents.
pub fn build_relevance_model(
    source: &dyn DocumentTermSource,
    top_documents: &[ScoredExtent],
    stemming: bool,
) -> LanguageModel {
    let mut model = LanguageModel::new();
    model.document_count = top_documents.len() as f64;
    for result in top_documents {
        let mut seen: HashMap<String, f64> = HashMap::new();
        for (term, tf) in source.terms_in_document(result.container_from) {
            let term = if stemming {
                let stemmer = rust_stemmers::Stemmer::create(rust_stemmers::Algorithm::English);
                stemmer.stem(&term).to_string()
            } else {
                term
            };
            *seen.entry(term).or_insert(0.0) += tf as f64;
        }
        for (term, cf) in seen {
            model.add_term(&term, cf, 1.0);
        }
    }
    model
}

/// Score one candidate expansion term. KLD feedback uses the divergence
/// contribution of the term between the relevance and collection models;
/// Okapi feedback uses the Robertson selection value.
fn expansion_score(
    mode: FeedbackMode,
    relevance: &LanguageModel,
    collection: &LanguageModel,
    term: &str,
) -> f64 {
    match mode {
        FeedbackMode::Off => 0.0,
        FeedbackMode::Kld => {
            let p_rel = relevance.probability(term);
            let p_col = collection.probability(term);
            p_rel * (p_rel / p_col).ln()
        }
        FeedbackMode::Okapi => {
            let (_, df_rel) = relevance.frequency(term);
            let (_, df_col) = collection.frequency(term);
            let n = collection.document_count.max(1.0);
            df_rel * (n / df_col.max(0.5)).ln()
        }
    }
}

/// Pick the `how_many` best expansion terms not already in the query.
pub fn select_feedback_terms(
    mode: FeedbackMode,
    relevance: &LanguageModel,
    collection: &LanguageModel,
    original_terms: &[String],
    how_many: usize,
) -> Vec<String> {
    let mut candidates: Vec<(f64, &str)> = relevance
        .terms()
        .filter(|(term, _, _)| !original_terms.iter().any(|t| t == term))
        .map(|(term, _, _)| (expansion_score(mode, relevance, collection, term), term))
        .filter(|(score, _)| *score > 0.0)
        .collect();
    candidates
        .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(b.1)));
    candidates.into_iter().take(how_many).map(|(_, term)| term.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCorpus;

    impl DocumentTermSource for FixedCorpus {
        fn terms_in_document(&self, doc_id: u64) -> Vec<(String, u32)> {
            match doc_id {
                0 => vec![("cat".into(), 3), ("feline".into(), 2), ("the".into(), 5)],
                1 => vec![("cat".into(), 1), ("feline".into(), 3), ("the".into(), 6)],
                _ => vec![("dog".into(), 2), ("the".into(), 4)],
            }
        }
    }

    fn collection_model() -> LanguageModel {
        let mut m = LanguageModel::new();
        m.document_count = 1000.0;
        m.add_term("the", 50_000.0, 1000.0);
        m.add_term("cat", 40.0, 30.0);
        m.add_term("feline", 10.0, 8.0);
        m.add_term("dog", 60.0, 45.0);
        m
    }

    #[test]
    fn kld_prefers_terms_rare_in_the_collection() {
        let top = vec![ScoredExtent::new(0, 0, 2.0), ScoredExtent::new(1, 1, 1.5)];
        let relevance = build_relevance_model(&FixedCorpus, &top, false);
        let picked = select_feedback_terms(
            FeedbackMode::Kld,
            &relevance,
            &collection_model(),
            &["cat".to_string()],
            1,
        );
        // "feline" is frequent in the top documents but rare overall;
        // "the" is frequent everywhere and scores near zero
        assert_eq!(picked, vec!["feline".to_string()]);
    }

    #[test]
    fn original_terms_are_never_reselected() {
        let top = vec![ScoredExtent::new(0, 0, 2.0)];
        let relevance = build_relevance_model(&FixedCorpus, &top, false);
        let picked = select_feedback_terms(
            FeedbackMode::Okapi,
            &relevance,
            &collection_model(),
            &["cat".to_string(), "feline".to_string()],
            5,
        );
        assert!(!picked.contains(&"cat".to_string()));
        assert!(!picked.contains(&"feline".to_string()));
    }

    #[test]
    fn relevance_model_counts_documents_and_tokens() {
        let top = vec![ScoredExtent::new(0, 0, 2.0), ScoredExtent::new(1, 1, 1.5)];
        let model = build_relevance_model(&FixedCorpus, &top, false);
        assert_eq!(model.document_count, 2.0);
        let (cf, df) = model.frequency("cat");
        assert_eq!(cf, 4.0);
        assert_eq!(df, 2.0);
    }
}
