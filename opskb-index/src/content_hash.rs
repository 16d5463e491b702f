use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of everything that determines a source's stored chunks
///
/// Two index runs with equal fingerprints produce identical chunk texts and
/// embeddings from the same model, so the second run can be skipped.
pub fn fingerprint(
    content: &str,
    tokenizer: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    model: &str,
    dimension: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(format!("{tokenizer}:{max_tokens}:{overlap_tokens}:{model}:{dimension}").as_bytes());
    hex::encode(hasher.finalize())
}
