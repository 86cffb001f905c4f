//! Hash-based text embeddings.
//!
//! [`HashingEmbedder`] turns short texts (keywords, file stems) into
//! fixed-dimensional vectors without a model. It is the default backend of the
//! zero-shot classifier when no vision model is configured.

use std::path::Path;

use ndarray::{Array1, Array2};
use sha2::{Digest, Sha256};

use super::classifier::{ClassifierError, EmbeddingBackend};

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 256;

/// Deterministic word and trigram hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingEmbedder {
    /// Creates an embedder producing vectors of `dimension` values.
    ///
    /// ```
    /// use mm_forge::diversity::HashingEmbedder;
    ///
    /// let embedder = HashingEmbedder::new(64);
    /// assert_eq!(embedder.embed_text("red apple").len(), 64);
    /// ```
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(4),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds a text as a unit vector.
    ///
    /// The first half of the vector holds word features, the second half
    /// character trigram features. Text is lower-cased and split on anything
    /// that is not alphanumeric, so `golden_retriever-03` and
    /// `golden retriever 03` embed identically. An empty text yields the zero
    /// vector.
    pub fn embed_text(&self, text: &str) -> Array1<f64> {
        let mut embedding = Array1::zeros(self.dimension);

        let text_lower = text.to_lowercase();
        let words: Vec<&str> = text_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return embedding;
        }

        let word_dim = self.dimension / 2;
        for word in &words {
            let pos = hash_to_index(word, word_dim);
            embedding[pos] += 1.0 / words.len() as f64;
        }

        let trigram_dim = self.dimension - word_dim;
        let joined = words.join(" ");
        let chars: Vec<char> = joined.chars().collect();
        if chars.len() < 3 {
            let pos = word_dim + hash_to_index(&joined, trigram_dim);
            embedding[pos] += 1.0;
        }
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let pos = word_dim + hash_to_index(&trigram, trigram_dim);
            embedding[pos] += 1.0;
        }

        normalize(&mut embedding);
        embedding
    }

    /// Embeds an item reference through its file stem.
    pub fn embed_item(&self, item: &Path) -> Array1<f64> {
        let stem = item
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.embed_text(&stem)
    }

    fn stack(&self, rows: impl ExactSizeIterator<Item = Array1<f64>>) -> Array2<f64> {
        let mut result = Array2::zeros((rows.len(), self.dimension));
        for (i, row) in rows.enumerate() {
            result.row_mut(i).assign(&row);
        }
        result
    }
}

impl EmbeddingBackend for HashingEmbedder {
    fn embed_labels(&self, labels: &[String]) -> Result<Array2<f64>, ClassifierError> {
        Ok(self.stack(labels.iter().map(|l| self.embed_text(l))))
    }

    fn embed_items(&self, items: &[std::path::PathBuf]) -> Result<Array2<f64>, ClassifierError> {
        Ok(self.stack(items.iter().map(|p| self.embed_item(p))))
    }
}

/// Hashes a string to an index in `[0, max_index)`.
fn hash_to_index(input: &str, max_index: usize) -> usize {
    if max_index == 0 {
        return 0;
    }
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash_bytes = hasher.finalize();
    let hash_val = ((hash_bytes[0] as u32) << 24
        | (hash_bytes[1] as u32) << 16
        | (hash_bytes[2] as u32) << 8
        | hash_bytes[3] as u32) as usize;
    hash_val % max_index
}

/// Normalizes a vector to unit length (L2 norm). Zero vectors are left alone.
pub fn normalize(v: &mut Array1<f64>) {
    let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 1e-10 {
        v.mapv_inplace(|x| x / norm);
    }
}

/// Computes cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm.
///
/// # Panics
///
/// Panics if the vectors have different lengths.
#[cfg(test)]
fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    assert_eq!(
        a.len(),
        b.len(),
        "Vectors must have the same length for cosine similarity"
    );

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
