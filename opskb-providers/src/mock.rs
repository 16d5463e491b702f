//! Mock providers for testing
//!
//! Deterministic stand-ins for the HTTP providers: a hashed bag-of-words
//! embedder whose cosine similarity tracks word overlap, an embedder that
//! always fails, and a cross-encoder that replays scripted behaviour.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::{CrossEncoder, EmbeddingProvider, ProviderError};

/// Deterministic bag-of-words embedder
///
/// Each lowercase alphanumeric word is hashed into one of `dimension`
/// buckets; the vector is L2-normalized. Texts sharing words point in
/// similar directions, which is enough for retrieval tests.
pub struct HashEmbedder {
    dimension: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl HashEmbedder {
    /// Create an embedder producing `dimension`-sized vectors
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long on every batch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `embed_batch` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Vector for a single text
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Embedder that fails every call
pub struct FailingEmbedder {
    error: ProviderError,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    /// Fail with a transient error
    pub fn unavailable() -> Self {
        Self::with_error(ProviderError::Unavailable("mock provider is down".to_string()))
    }

    /// Fail with a permanent error
    pub fn rejecting() -> Self {
        Self::with_error(ProviderError::Rejected("mock provider refuses input".to_string()))
    }

    /// Fail with `error`
    pub fn with_error(error: ProviderError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_batch` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// What a [`ScriptedCrossEncoder`] does when asked to score
#[derive(Debug, Clone)]
pub enum Script {
    /// Score passage `i` as `i`, reversing the input order
    Reverse,
    /// Score by how many query words each passage contains
    WordOverlap,
    /// Return an error
    Fail(ProviderError),
    /// Panic inside `score`
    Panic,
    /// Return this many scores regardless of input
    WrongCount(usize),
}

/// Cross-encoder with scripted behaviour
pub struct ScriptedCrossEncoder {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedCrossEncoder {
    /// Create an encoder following `script`
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    /// Encoder that reverses the fused order
    pub fn reversing() -> Self {
        Self::new(Script::Reverse)
    }

    /// Number of `score` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrossEncoder for ScriptedCrossEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Reverse => Ok((0..passages.len()).map(|i| i as f32).collect()),
            Script::WordOverlap => {
                let words: Vec<String> = query
                    .split_whitespace()
                    .map(|w| w.to_lowercase())
                    .collect();
                Ok(passages
                    .iter()
                    .map(|p| {
                        let p = p.to_lowercase();
                        words.iter().filter(|w| p.contains(w.as_str())).count() as f32
                    })
                    .collect())
            }
            Script::Fail(err) => Err(err.clone()),
            Script::Panic => panic!("scripted cross-encoder panic"),
            Script::WrongCount(n) => Ok(vec![0.5; *n]),
        }
    }
}
