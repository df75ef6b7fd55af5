//! Pluggable embedding providers for relevance scoring.
//!
//! The local hashed term-frequency embedder is always available and needs no
//! model download, which keeps curation deterministic in tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trait for embedding providers.
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Generate embeddings for a batch of texts.
    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name. Only "local" ships with the core.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Embedding dimensions for the local embedder.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_provider() -> String {
    "local".into()
}

fn default_dimensions() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            dimensions: default_dimensions(),
        }
    }
}

/// Hashed term-frequency embedder.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

/// djb2 string hash.
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        // L2 normalize
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Build the embedder named by `config`, falling back to the local one.
pub fn create_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    match config.provider.as_str() {
        "local" => Box::new(LocalEmbedder::new(config.dimensions)),
        other => {
            tracing::warn!(
                provider = other,
                "Unknown embedding provider, using local embedder"
            );
            Box::new(LocalEmbedder::new(config.dimensions))
        }
    }
}

/// Cosine similarity between two vectors; 0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_embedder_dimensions() {
        let embedder = LocalEmbedder::new(64);
        assert_eq!(embedder.embed("hello world").len(), 64);
        assert_eq!(embedder.dimensions(), 64);
    }

    #[test]
    fn test_local_embedder_normalized() {
        let embedder = LocalEmbedder::new(128);
        let v = embedder.embed("rust ownership and borrowing rules");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_local_embedder_empty_text() {
        let embedder = LocalEmbedder::new(32);
        assert!(embedder.embed("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_local_embedder_deterministic() {
        let embedder = LocalEmbedder::new(256);
        assert_eq!(embedder.embed("tokio runtime"), embedder.embed("tokio runtime"));
    }

    #[test]
    fn test_zero_dimensions_clamped() {
        let embedder = LocalEmbedder::new(0);
        assert_eq!(embedder.dimensions(), 1);
    }

    #[test]
    fn test_embed_batch_default() {
        let embedder = LocalEmbedder::new(16);
        let batch = embedder.embed_batch(&["a b", "c d", "e"]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], embedder.embed("a b"));
    }

    #[test]
    fn test_create_embedder_unknown_falls_back() {
        let config = EmbeddingConfig {
            provider: "mystery".into(),
            dimensions: 48,
        };
        let embedder = create_embedder(&config);
        assert_eq!(embedder.provider_name(), "local");
        assert_eq!(embedder.dimensions(), 48);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let embedder = LocalEmbedder::new(256);
        let a = embedder.embed("solar panel efficiency");
        let b = embedder.embed("solar panel efficiency");
        let c = embedder.embed("medieval poetry");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&a, &c) < 0.5);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
