//! Keyword retrieval over a char n-gram TF-IDF model.
//!
//! Chinese fault descriptions don't word-segment cleanly, so the vectorizer
//! works on character 2..=4-grams, which recalls well without a tokenizer
//! dictionary. The fitted model is persisted next to the data file and
//! rebuilt whenever the knowledge base is newer than the cache.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fault_match_core::FaultCase;

use crate::RetrievalError;

const NGRAM_MIN: usize = 2;
const NGRAM_MAX: usize = 4;
const MAX_FEATURES: usize = 200_000;

/// Fitted TF-IDF model: vocabulary, idf vector, and an inverted index of
/// L2-normalized document weights.
#[derive(Debug, Serialize, Deserialize)]
struct TfidfModel {
    ngram_min: usize,
    ngram_max: usize,
    vocab: HashMap<String, u32>,
    idf: Vec<f32>,
    /// term index -> (doc index, weight) postings
    postings: Vec<Vec<(u32, f32)>>,
    /// doc index -> case id
    ids: Vec<String>,
}

/// TF-IDF keyword retriever with a persisted model cache.
pub struct KeywordRetriever {
    model: TfidfModel,
}

impl KeywordRetriever {
    /// Load the cached model if it is fresh, otherwise fit and persist.
    ///
    /// The cache is considered stale when it is missing, unreadable, older
    /// than the data file, or fitted over a different number of cases.
    pub fn open(
        cases: &[FaultCase],
        data_path: &Path,
        cache_path: &Path,
    ) -> Result<Self, RetrievalError> {
        if let Some(model) = Self::try_load_cache(cases, data_path, cache_path) {
            info!(
                docs = model.ids.len(),
                terms = model.vocab.len(),
                "TF-IDF model loaded from cache"
            );
            return Ok(Self { model });
        }

        let model = Self::fit(cases)?;
        info!(
            docs = model.ids.len(),
            terms = model.vocab.len(),
            "TF-IDF model fitted"
        );
        if let Err(e) = Self::persist(&model, cache_path) {
            warn!(path = %cache_path.display(), error = %e, "failed to persist TF-IDF cache");
        }
        Ok(Self { model })
    }

    fn try_load_cache(
        cases: &[FaultCase],
        data_path: &Path,
        cache_path: &Path,
    ) -> Option<TfidfModel> {
        let cache_mtime = mtime(cache_path)?;
        if let Some(data_mtime) = mtime(data_path) {
            if data_mtime > cache_mtime {
                info!(path = %cache_path.display(), "TF-IDF cache older than data file, refitting");
                return None;
            }
        }
        let bytes = fs::read(cache_path).ok()?;
        let model: TfidfModel = match bincode::deserialize(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %cache_path.display(), error = %e, "corrupt TF-IDF cache, refitting");
                return None;
            }
        };
        if model.ids.len() != cases.len() {
            info!(
                cached = model.ids.len(),
                current = cases.len(),
                "TF-IDF cache does not match knowledge base, refitting"
            );
            return None;
        }
        Some(model)
    }

    fn persist(model: &TfidfModel, cache_path: &Path) -> Result<(), RetrievalError> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes =
            bincode::serialize(model).map_err(|e| RetrievalError::Cache(e.to_string()))?;
        fs::write(cache_path, bytes)?;
        Ok(())
    }

    /// Fit the TF-IDF model over the case texts.
    fn fit(cases: &[FaultCase]) -> Result<TfidfModel, RetrievalError> {
        if cases.is_empty() {
            return Err(RetrievalError::Index("no cases to index".to_string()));
        }

        // Term frequency per document plus corpus-wide counts
        let mut doc_tfs: Vec<HashMap<String, u32>> = Vec::with_capacity(cases.len());
        let mut corpus_count: HashMap<String, u64> = HashMap::new();
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for case in cases {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for gram in char_ngrams(&case.text) {
                *tf.entry(gram).or_insert(0) += 1;
            }
            for (gram, count) in &tf {
                *corpus_count.entry(gram.clone()).or_insert(0) += u64::from(*count);
                *doc_freq.entry(gram.clone()).or_insert(0) += 1;
            }
            doc_tfs.push(tf);
        }

        // Cap the vocabulary at the most frequent terms; ties broken by the
        // term itself so fits are reproducible.
        let mut terms: Vec<(String, u64)> = corpus_count.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(MAX_FEATURES);

        let n_docs = cases.len() as f32;
        let mut vocab: HashMap<String, u32> = HashMap::with_capacity(terms.len());
        let mut idf: Vec<f32> = Vec::with_capacity(terms.len());
        for (term_idx, (term, _)) in terms.into_iter().enumerate() {
            let df = doc_freq[&term] as f32;
            idf.push(((1.0 + n_docs) / (1.0 + df)).ln() + 1.0);
            vocab.insert(term, term_idx as u32);
        }

        let mut postings: Vec<Vec<(u32, f32)>> = vec![Vec::new(); vocab.len()];
        for (doc_idx, tf) in doc_tfs.iter().enumerate() {
            let mut weights: Vec<(u32, f32)> = tf
                .iter()
                .filter_map(|(gram, count)| {
                    vocab
                        .get(gram)
                        .map(|&t| (t, *count as f32 * idf[t as usize]))
                })
                .collect();

            let norm: f32 = weights.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
            if norm > 0.0 {
                for (_, w) in &mut weights {
                    *w /= norm;
                }
            }
            for (t, w) in weights {
                postings[t as usize].push((doc_idx as u32, w));
            }
        }

        Ok(TfidfModel {
            ngram_min: NGRAM_MIN,
            ngram_max: NGRAM_MAX,
            vocab,
            idf,
            postings,
            ids: cases.iter().map(|c| c.id.clone()).collect(),
        })
    }

    /// Return at most `k` case ids ordered by descending raw score.
    /// Zero-score documents are not reported.
    pub fn query(&self, q: &str, k: usize) -> Vec<(String, f64)> {
        if k == 0 || q.is_empty() {
            return Vec::new();
        }

        let mut tf: HashMap<u32, f32> = HashMap::new();
        for gram in char_ngrams(q) {
            if let Some(&t) = self.model.vocab.get(&gram) {
                *tf.entry(t).or_insert(0.0) += 1.0;
            }
        }
        if tf.is_empty() {
            return Vec::new();
        }

        let mut q_norm = 0.0f32;
        for (t, w) in tf.iter_mut() {
            *w *= self.model.idf[*t as usize];
            q_norm += *w * *w;
        }
        let q_norm = q_norm.sqrt().max(f32::EPSILON);

        let mut scores: HashMap<u32, f32> = HashMap::new();
        for (t, qw) in &tf {
            for (doc, dw) in &self.model.postings[*t as usize] {
                *scores.entry(*doc).or_insert(0.0) += (qw / q_norm) * dw;
            }
        }

        let mut hits: Vec<(String, f64)> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .map(|(doc, s)| (self.model.ids[doc as usize].clone(), f64::from(s)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        hits
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.model.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.model.ids.is_empty()
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn char_ngrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut grams = Vec::new();
    for n in NGRAM_MIN..=NGRAM_MAX {
        if chars.len() < n {
            break;
        }
        for i in 0..=chars.len() - n {
            grams.push(chars[i..i + n].iter().collect());
        }
    }
    grams
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn case(id: &str, text: &str) -> FaultCase {
        FaultCase {
            id: id.to_string(),
            text: text.to_string(),
            ..FaultCase::default()
        }
    }

    fn corpus() -> Vec<FaultCase> {
        vec![
            case("P001", "制动踏板变软，制动距离变长"),
            case("P002", "发动机怠速异响"),
            case("P003", "低速刹车时有金属摩擦异响"),
            case("P004", "空调不制冷"),
        ]
    }

    #[test]
    fn retrieves_overlapping_document_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = KeywordRetriever::open(
            &corpus(),
            &dir.path().join("data.jsonl"),
            &dir.path().join("tfidf.bin"),
        )
        .expect("open");

        let hits = retriever.query("制动踏板", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "P001");
        // descending scores
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn unrelated_query_returns_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = KeywordRetriever::open(
            &corpus(),
            &dir.path().join("data.jsonl"),
            &dir.path().join("tfidf.bin"),
        )
        .expect("open");

        assert!(retriever.query("做饭洗衣服", 10).is_empty());
    }

    #[test]
    fn respects_k() {
        let dir = tempfile::tempdir().expect("tempdir");
        let retriever = KeywordRetriever::open(
            &corpus(),
            &dir.path().join("data.jsonl"),
            &dir.path().join("tfidf.bin"),
        )
        .expect("open");

        let hits = retriever.query("异响", 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn cache_roundtrip_preserves_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_path = dir.path().join("data.jsonl");
        let cache_path = dir.path().join("tfidf.bin");
        fs::write(&data_path, b"placeholder").expect("write data");

        let first = KeywordRetriever::open(&corpus(), &data_path, &cache_path).expect("fit");
        let before = first.query("金属摩擦", 5);
        assert!(cache_path.exists());

        let second = KeywordRetriever::open(&corpus(), &data_path, &cache_path).expect("cached");
        assert_eq!(second.query("金属摩擦", 5), before);
    }

    #[test]
    fn stale_cache_is_refitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_path = dir.path().join("data.jsonl");
        let cache_path = dir.path().join("tfidf.bin");
        fs::write(&data_path, b"v1").expect("write data");

        let cases = corpus();
        KeywordRetriever::open(&cases, &data_path, &cache_path).expect("fit");

        // Grow the knowledge base; a fresh open must reflect the new case
        // even though a cache exists, because the count no longer matches.
        let mut grown = cases;
        grown.push(case("P005", "变速箱换挡顿挫"));
        let retriever = KeywordRetriever::open(&grown, &data_path, &cache_path).expect("refit");
        assert_eq!(retriever.len(), 5);
        assert_eq!(retriever.query("换挡顿挫", 3)[0].0, "P005");
    }

    #[test]
    fn corrupt_cache_is_refitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_path = dir.path().join("data.jsonl");
        let cache_path = dir.path().join("tfidf.bin");
        fs::write(&data_path, b"v1").expect("write data");
        let mut f = fs::File::create(&cache_path).expect("create");
        f.write_all(b"garbage").expect("write");
        drop(f);

        let retriever =
            KeywordRetriever::open(&corpus(), &data_path, &cache_path).expect("refit");
        assert_eq!(retriever.len(), 4);
    }
}
