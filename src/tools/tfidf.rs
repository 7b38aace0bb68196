// TF-IDF vectorizer over tool descriptions
//
// Unigrams plus bigrams, stopwords removed, optional Snowball stemming.
// Weights use smooth idf and every vector is L2-normalized, so cosine
// similarity is a sparse dot product.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rust_stemmers::{Algorithm, Stemmer};
use tracing::{debug, warn};

use crate::extraction::text::fold_accents;

pub const MAX_FEATURES: usize = 1000;
const MIN_TOKEN_LEN: usize = 2;

const STOPWORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "its",
    "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with", "all", "can",
    "get", "any", "into", "not", "no", "if", "then", "than",
    // Spanish
    "el", "la", "los", "las", "un", "una", "unos", "unas", "de", "del", "al", "en", "y", "o", "u",
    "que", "con", "por", "para", "se", "su", "sus", "lo", "le", "les", "es", "son", "como", "mas",
    "pero", "sin", "sobre", "este", "esta", "estos", "estas", "ese", "esa", "me", "mi", "mis",
    "tu", "te", "nos", "ya", "muy", "hay", "entre", "cuando", "donde", "quiero", "favor",
];

/// Map a configured language name onto a Snowball algorithm
///
/// Returns `None` for "none" or an unknown name (no stemming).
pub fn stemming_algorithm(language: &str) -> Option<Algorithm> {
    match language.to_lowercase().as_str() {
        "spanish" | "es" => Some(Algorithm::Spanish),
        "english" | "en" => Some(Algorithm::English),
        "portuguese" | "pt" => Some(Algorithm::Portuguese),
        "french" | "fr" => Some(Algorithm::French),
        "italian" | "it" => Some(Algorithm::Italian),
        "german" | "de" => Some(Algorithm::German),
        "none" | "" => None,
        other => {
            warn!(language = other, "Unknown stemming language, stemming disabled");
            None
        }
    }
}

pub struct TfIdfIndex {
    language: String,
    stemmer: Option<Stemmer>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    documents: Vec<HashMap<usize, f32>>,
}

impl fmt::Debug for TfIdfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TfIdfIndex")
            .field("language", &self.language)
            .field("vocabulary", &self.vocabulary.len())
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl Default for TfIdfIndex {
    fn default() -> Self {
        Self::new("spanish")
    }
}

impl TfIdfIndex {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            stemmer: stemming_algorithm(language).map(Stemmer::create),
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Lowercased, accent-folded, stopword-free, stemmed tokens
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let folded = fold_accents(&text.to_lowercase());
        let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();

        folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
            .filter(|t| !stopwords.contains(t))
            .map(|t| match &self.stemmer {
                Some(stemmer) => stemmer.stem(t).into_owned(),
                None => t.to_string(),
            })
            .collect()
    }

    /// Unigrams followed by adjacent bigrams
    fn terms(&self, text: &str) -> Vec<String> {
        let tokens = self.tokenize(text);
        let mut terms = tokens.clone();
        terms.extend(tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
        terms
    }

    fn counts(&self, text: &str) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for term in self.terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }
        counts
    }

    /// Rebuild vocabulary, idf and document vectors from scratch
    pub fn fit(&mut self, documents: &[String]) {
        let doc_counts: Vec<HashMap<String, usize>> = documents.iter().map(|d| self.counts(d)).collect();

        let mut corpus_freq: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for counts in &doc_counts {
            for (term, count) in counts {
                *corpus_freq.entry(term.as_str()).or_insert(0) += count;
                *doc_freq.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(&str, usize)> = corpus_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(MAX_FEATURES);
        ranked.sort_by(|a, b| a.0.cmp(b.0));

        let n = documents.len() as f32;
        self.vocabulary = ranked
            .iter()
            .enumerate()
            .map(|(i, (term, _))| (term.to_string(), i))
            .collect();
        self.idf = ranked
            .iter()
            .map(|(term, _)| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        self.documents = doc_counts.iter().map(|counts| self.weigh(counts)).collect();

        debug!(
            documents = self.documents.len(),
            vocabulary = self.vocabulary.len(),
            "TF-IDF index rebuilt"
        );
    }

    fn weigh(&self, counts: &HashMap<String, usize>) -> HashMap<usize, f32> {
        let mut vector: HashMap<usize, f32> = counts
            .iter()
            .filter_map(|(term, count)| {
                self.vocabulary
                    .get(term)
                    .map(|&idx| (idx, *count as f32 * self.idf[idx]))
            })
            .collect();

        let norm = vector.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for weight in vector.values_mut() {
                *weight /= norm;
            }
        }
        vector
    }

    /// Normalized sparse vector for `text` against the fitted vocabulary
    pub fn transform(&self, text: &str) -> HashMap<usize, f32> {
        self.weigh(&self.counts(text))
    }

    /// Cosine similarity of `query` with every fitted document, in fit order
    pub fn similarities(&self, query: &str) -> Vec<f32> {
        let q = self.transform(query);
        self.documents
            .iter()
            .map(|doc| q.iter().map(|(idx, w)| w * doc.get(idx).copied().unwrap_or(0.0)).sum::<f32>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "reservas_crear Crear una reserva de vuelo para un usuario".to_string(),
            "pagos_listar Listar pagos registrados".to_string(),
            "avion_crear Registrar un avion nuevo con modelo y capacidad".to_string(),
        ]
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_short_tokens() {
        let index = TfIdfIndex::new("none");
        let tokens = index.tokenize("Crear la reserva de un vuelo a Bogotá");
        assert_eq!(tokens, vec!["crear", "reserva", "vuelo", "bogota"]);
    }

    #[test]
    fn test_tokenize_stems_spanish() {
        let index = TfIdfIndex::new("spanish");
        let a = index.tokenize("reservas");
        let b = index.tokenize("reserva");
        assert_eq!(a, b);
    }

    #[test]
    fn test_similarity_ranks_matching_document_first() {
        let mut index = TfIdfIndex::new("spanish");
        index.fit(&corpus());
        let sims = index.similarities("quiero crear una reserva");
        assert_eq!(sims.len(), 3);
        assert!(sims[0] > sims[1]);
        assert!(sims[0] > sims[2]);
        assert!(sims[0] <= 1.0 + 1e-5);
    }

    #[test]
    fn test_unrelated_query_scores_zero() {
        let mut index = TfIdfIndex::new("spanish");
        index.fit(&corpus());
        let sims = index.similarities("xyzzy");
        assert!(sims.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_document_vectors_are_normalized() {
        let mut index = TfIdfIndex::new("none");
        index.fit(&corpus());
        let v = index.transform(&corpus()[1]);
        let norm: f32 = v.values().map(|w| w * w).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vocabulary_is_capped() {
        let docs: Vec<String> = (0..700).map(|i| format!("termino{} otro{}", i, i)).collect();
        let mut index = TfIdfIndex::new("none");
        index.fit(&docs);
        assert_eq!(index.vocabulary_size(), MAX_FEATURES);
    }

    #[test]
    fn test_stemming_algorithm_names() {
        assert!(stemming_algorithm("spanish").is_some());
        assert!(stemming_algorithm("none").is_none());
        assert!(stemming_algorithm("klingon").is_none());
    }
}
