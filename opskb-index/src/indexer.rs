//! Indexer: read → chunk → embed → atomic replace
//!
//! Every `index()` call fully supersedes the previous chunk set of the same
//! path. Calls on one path are serialized; different paths run in parallel.

use crate::chunker::Chunker;
use crate::content_hash::fingerprint;
use crate::embedder::EmbeddingClient;
use crate::store::IndexStore;
use dashmap::DashMap;
use opskb_core::error::{Error, Result};
use opskb_core::knowledge::{KnowledgeSource, NewChunk, SourceType};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// File extensions picked up by directory crawls
pub const INDEXABLE_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Turns documents into stored, searchable chunks
pub struct Indexer {
    store: Arc<dyn IndexStore>,
    chunker: Chunker,
    embedder: Arc<EmbeddingClient>,
    path_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Indexer {
    pub fn new(store: Arc<dyn IndexStore>, chunker: Chunker, embedder: Arc<EmbeddingClient>) -> Self {
        Self {
            store,
            chunker,
            embedder,
            path_locks: DashMap::new(),
        }
    }

    /// Index the document at `path`, returning its chunk count
    ///
    /// Fails with [`Error::Read`] when the file cannot be read, with the
    /// embedding errors of [`EmbeddingClient`], or with [`Error::Store`].
    /// On failure the previously stored chunks for `path` stay untouched.
    pub async fn index(&self, path: impl AsRef<Path>, source_type: SourceType, platform: Option<String>) -> Result<usize> {
        let path = path.as_ref();
        let key = path_key(path);
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.index_locked(path, KnowledgeSource::new(key.clone(), source_type, platform))
                .await
        };
        drop(lock);
        self.release_lock(&key);
        result
    }

    async fn index_locked(&self, path: &Path, source: KnowledgeSource) -> Result<usize> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::read(path, e))?;

        let fp = fingerprint(
            &content,
            self.chunker.tokenizer(),
            self.chunker.max_tokens(),
            self.chunker.overlap_tokens(),
            self.embedder.model(),
            self.embedder.dimension(),
        );

        let store = Arc::clone(&self.store);
        let lookup_path = source.path.clone();
        let existing = blocking(move || store.source_by_path(&lookup_path)).await?;
        if let Some(record) = existing {
            if record.fingerprint.as_deref() == Some(fp.as_str()) && record.source == source {
                let store = Arc::clone(&self.store);
                let count = blocking(move || store.chunk_count(record.id)).await?;
                debug!(path = %source.path, chunks = count, "Content unchanged, skipping re-index");
                return Ok(count);
            }
        }

        let chunks = self.chunker.chunk(&content);
        debug!(path = %source.path, chunks = chunks.len(), "Chunked document");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let new_chunks: Vec<NewChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| NewChunk {
                position: chunk.seq,
                text: chunk.text,
                token_count: chunk.token_count,
                embedding,
            })
            .collect();
        let count = new_chunks.len();

        let store = Arc::clone(&self.store);
        let stored_source = source.clone();
        blocking(move || store.index_source(&stored_source, &fp, &new_chunks)).await?;

        info!(
            path = %source.path,
            source_type = %source.source_type,
            platform = source.platform.as_deref().unwrap_or("-"),
            chunks = count,
            "Indexed knowledge source"
        );
        Ok(count)
    }

    /// Remove a source and its chunks; `false` if it was never indexed
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool> {
        let key = path_key(path.as_ref());
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            let store = Arc::clone(&self.store);
            let target = key.clone();
            blocking(move || store.remove_source(&target)).await
        };
        drop(lock);
        self.release_lock(&key);
        result
    }

    /// Index every `.md` and `.txt` file under `root`, returning total chunks
    pub async fn index_directory(&self, root: impl AsRef<Path>, source_type: SourceType, platform: Option<String>) -> Result<usize> {
        let root = root.as_ref();
        let files = crawl(root)?;
        info!(root = ?root, files = files.len(), source_type = %source_type, "Indexing directory");

        let mut total = 0;
        for file in files {
            total += self.index(&file, source_type, platform.clone()).await?;
        }
        Ok(total)
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.path_locks.entry(key.to_string()).or_default().value())
    }

    fn release_lock(&self, key: &str) {
        // Only the map still holds it: nobody is waiting on this path
        self.path_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Sorted list of indexable files under `root`
pub fn crawl(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for ext in INDEXABLE_EXTENSIONS {
        let pattern = root.join("**").join(format!("*.{ext}"));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::config(format!("Invalid glob pattern {}: {}", pattern, e)))?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable path during crawl"),
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Whether `path` names a file the indexer would pick up
pub fn is_indexable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| INDEXABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Store key for `path`: one key per file, however the path was spelled
pub fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().into_owned()
}

/// Absolute, `.`/`..`-free form of `path` with symlinks in the parent resolved
///
/// Only the parent directory is canonicalized so a file that was just
/// deleted still maps to the key it was indexed under.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other.as_os_str()),
        }
    }

    match (lexical.parent(), lexical.file_name()) {
        (Some(parent), Some(name)) => match std::fs::canonicalize(parent) {
            Ok(parent) => parent.join(name),
            Err(_) => lexical,
        },
        _ => lexical,
    }
}

/// Run synchronous store work off the async workers
async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::store(format!("store task failed: {e}")))?
}
