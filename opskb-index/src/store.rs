//! Index store: sources, chunks, FTS5 keyword index and vectors
//!
//! [`IndexStore`] is the storage-agnostic contract the indexer and the
//! retriever are written against. [`SqliteIndexStore`] implements it on a
//! single SQLite file in WAL mode: one writer connection, a small pool of
//! read-only connections, an FTS5 table kept in sync by triggers, and
//! embeddings stored next to each chunk.

use crate::error_ext::SqlResultExt;
use chrono::Utc;
use opskb_core::error::{Error, Result};
use opskb_core::knowledge::{
    KnowledgeChunk, KnowledgeSource, NewChunk, SearchFilter, SourceRecord, SourceType,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// A chunk with the score of the stage that produced it
pub type ScoredChunk = (KnowledgeChunk, f64);

/// Storage contract for the knowledge index
///
/// Both search modes return best-first lists with ties broken by insertion
/// order, and apply `filter` before ranking.
pub trait IndexStore: Send + Sync {
    /// Insert or update a source by path, returning its id
    fn upsert_source(&self, source: &KnowledgeSource) -> Result<i64>;

    /// Delete every chunk of `source_id` and insert `chunks`, atomically
    fn replace_chunks(&self, source_id: i64, chunks: &[NewChunk]) -> Result<()>;

    /// Upsert + replace in one atomic unit, recording `fingerprint`
    fn index_source(&self, source: &KnowledgeSource, fingerprint: &str, chunks: &[NewChunk]) -> Result<i64>;

    /// BM25 keyword search
    fn keyword_search(&self, query: &str, limit: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>>;

    /// Cosine nearest-neighbour search
    fn vector_search(&self, query_vector: &[f32], limit: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>>;

    fn source_by_path(&self, path: &str) -> Result<Option<SourceRecord>>;

    /// Chunks of a source ordered by position
    fn chunks_for_source(&self, source_id: i64) -> Result<Vec<KnowledgeChunk>>;

    fn chunk_count(&self, source_id: i64) -> Result<usize> {
        Ok(self.chunks_for_source(source_id)?.len())
    }

    /// Delete a source and its chunks; `false` if it did not exist
    fn remove_source(&self, path: &str) -> Result<bool>;

    fn stats(&self) -> Result<StoreStats>;
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_sources: usize,
    pub total_chunks: usize,
    pub embedding_dimension: usize,
    pub database_size_bytes: u64,
}

const DEFAULT_READ_POOL_SIZE: usize = 4;
const MAX_READ_POOL_SIZE: usize = 8;

const CHUNK_COLUMNS: &str = "c.id, c.source_id, s.path, c.position, c.text, c.token_count,
                             c.source_type, c.platform, c.generation";

/// SQLite-backed index store
pub struct SqliteIndexStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    db_path: PathBuf,
    dimension: usize,
}

impl SqliteIndexStore {
    /// Create or open a store, pinning the embedding dimension
    ///
    /// Opening an existing index built with a different dimension fails with
    /// [`Error::DimensionMismatch`].
    pub fn open(db_path: impl Into<PathBuf>, dimension: usize, read_pool_size: usize) -> Result<Self> {
        let db_path = db_path.into();
        info!("Opening knowledge index at: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&db_path).store_err()?;
        apply_pragmas(&writer)?;
        init_schema(&writer)?;
        check_dimension(&writer, dimension)?;

        let size = if read_pool_size == 0 {
            DEFAULT_READ_POOL_SIZE
        } else {
            read_pool_size.min(MAX_READ_POOL_SIZE)
        };
        let mut readers = Vec::with_capacity(size);
        for _ in 0..size {
            readers.push(Mutex::new(open_reader(&db_path)?));
        }

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            db_path,
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` on a free read connection, preferring round-robin order
    fn with_reader<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        for offset in 0..self.readers.len() {
            let idx = (start + offset) % self.readers.len();
            if let Some(mut conn) = self.readers[idx].try_lock() {
                return f(&mut conn);
            }
        }
        let mut conn = self.readers[start].lock();
        f(&mut conn)
    }

    fn check_chunks(&self, chunks: &[NewChunk]) -> Result<()> {
        for chunk in chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                });
            }
        }
        Ok(())
    }
}

impl IndexStore for SqliteIndexStore {
    fn upsert_source(&self, source: &KnowledgeSource) -> Result<i64> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction().store_err()?;
        let id = upsert_source_tx(&tx, source)?;
        tx.commit().store_err()?;
        Ok(id)
    }

    fn replace_chunks(&self, source_id: i64, chunks: &[NewChunk]) -> Result<()> {
        self.check_chunks(chunks)?;
        let mut conn = self.writer.lock();
        let tx = conn.transaction().store_err()?;
        replace_chunks_tx(&tx, source_id, chunks)?;
        tx.commit().store_err()?;
        Ok(())
    }

    fn index_source(&self, source: &KnowledgeSource, fingerprint: &str, chunks: &[NewChunk]) -> Result<i64> {
        self.check_chunks(chunks)?;
        let mut conn = self.writer.lock();
        let tx = conn.transaction().store_err()?;

        // 1. Source row, 2. chunk swap, 3. fingerprint: all or nothing
        let source_id = upsert_source_tx(&tx, source)?;
        replace_chunks_tx(&tx, source_id, chunks)?;
        tx.execute(
            "UPDATE sources SET fingerprint = ? WHERE id = ?",
            params![fingerprint, source_id],
        )
        .store_err()?;

        tx.commit().store_err()?;
        debug!(path = %source.path, source_id, chunks = chunks.len(), "Source indexed");
        Ok(source_id)
    }

    fn keyword_search(&self, query: &str, limit: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_reader(|conn| {
            let sql = format!(
                "SELECT {CHUNK_COLUMNS}, bm25(chunks_fts) AS score
                 FROM chunks_fts
                 JOIN chunks c ON c.id = chunks_fts.rowid
                 JOIN sources s ON s.id = c.source_id
                 WHERE chunks_fts MATCH ?1
                   AND (?2 IS NULL OR c.source_type = ?2)
                   AND (?3 IS NULL OR c.platform = ?3)
                 ORDER BY score ASC, c.id ASC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare_cached(&sql).store_err()?;
            let results = stmt
                .query_map(
                    params![
                        fts_query,
                        filter.source_type.map(|t| t.as_str()),
                        filter.platform,
                        limit as i64
                    ],
                    |row| {
                        // bm25() is lower-is-better; flip so every stage is higher-is-better
                        let score: f64 = row.get(9)?;
                        Ok((chunk_from_row(row)?, -score))
                    },
                )
                .store_err()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .store_err()?;
            Ok(results)
        })
    }

    fn vector_search(&self, query_vector: &[f32], limit: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        if query_vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_reader(|conn| {
            // One read transaction so both passes see the same snapshot
            let tx = conn.transaction().store_err()?;

            // 1. Score every candidate that passes the filter
            let candidates: Vec<(i64, Vec<u8>)> = {
                let mut stmt = tx
                    .prepare_cached(
                        "SELECT c.id, c.embedding FROM chunks c
                         WHERE (?1 IS NULL OR c.source_type = ?1)
                           AND (?2 IS NULL OR c.platform = ?2)",
                    )
                    .store_err()?;
                let rows = stmt
                    .query_map(
                        params![filter.source_type.map(|t| t.as_str()), filter.platform],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .store_err()?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .store_err()?;
                rows
            };

            let mut scored = candidates
                .par_iter()
                .map(|(id, blob)| Ok((*id, cosine_similarity(query_vector, &decode_embedding(blob)?))))
                .collect::<Result<Vec<(i64, f64)>>>()?;
            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            scored.truncate(limit);

            if scored.is_empty() {
                return Ok(Vec::new());
            }

            // 2. Load the winners' rows
            let placeholders = vec!["?"; scored.len()].join(", ");
            let sql = format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c
                 JOIN sources s ON s.id = c.source_id
                 WHERE c.id IN ({placeholders})"
            );
            let mut by_id = {
                let mut stmt = tx.prepare(&sql).store_err()?;
                let rows = stmt
                    .query_map(params_from_iter(scored.iter().map(|(id, _)| *id)), chunk_from_row)
                    .store_err()?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .store_err()?;
                rows.into_iter()
                    .map(|chunk| (chunk.id, chunk))
                    .collect::<std::collections::HashMap<_, _>>()
            };
            tx.commit().store_err()?;

            Ok(scored
                .into_iter()
                .filter_map(|(id, score)| by_id.remove(&id).map(|chunk| (chunk, score)))
                .collect())
        })
    }

    fn source_by_path(&self, path: &str) -> Result<Option<SourceRecord>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT id, path, source_type, platform, indexed_at, fingerprint, generation
                 FROM sources WHERE path = ?",
                params![path],
                |row| {
                    Ok(SourceRecord {
                        id: row.get(0)?,
                        source: KnowledgeSource {
                            path: row.get(1)?,
                            source_type: parse_source_type(row, 2)?,
                            platform: row.get(3)?,
                        },
                        indexed_at: row.get(4)?,
                        fingerprint: row.get(5)?,
                        generation: row.get(6)?,
                    })
                },
            )
            .optional()
            .store_err()
        })
    }

    fn chunks_for_source(&self, source_id: i64) -> Result<Vec<KnowledgeChunk>> {
        self.with_reader(|conn| {
            let sql = format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c
                 JOIN sources s ON s.id = c.source_id
                 WHERE c.source_id = ?
                 ORDER BY c.position ASC"
            );
            let mut stmt = conn.prepare_cached(&sql).store_err()?;
            let chunks = stmt
                .query_map(params![source_id], chunk_from_row)
                .store_err()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .store_err()?;
            Ok(chunks)
        })
    }

    fn chunk_count(&self, source_id: i64) -> Result<usize> {
        self.with_reader(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM chunks WHERE source_id = ?",
                    params![source_id],
                    |row| row.get(0),
                )
                .store_err()?;
            Ok(count as usize)
        })
    }

    fn remove_source(&self, path: &str) -> Result<bool> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction().store_err()?;
        tx.execute(
            "DELETE FROM chunks WHERE source_id IN (SELECT id FROM sources WHERE path = ?)",
            params![path],
        )
        .store_err()?;
        let removed = tx
            .execute("DELETE FROM sources WHERE path = ?", params![path])
            .store_err()?;
        tx.commit().store_err()?;

        if removed > 0 {
            info!(path, "Removed knowledge source");
        }
        Ok(removed > 0)
    }

    fn stats(&self) -> Result<StoreStats> {
        let (total_sources, total_chunks) = self.with_reader(|conn| {
            let sources: i64 = conn
                .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))
                .store_err()?;
            let chunks: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                .store_err()?;
            Ok((sources as usize, chunks as usize))
        })?;

        Ok(StoreStats {
            total_sources,
            total_chunks,
            embedding_dimension: self.dimension,
            database_size_bytes: std::fs::metadata(&self.db_path)?.len(),
        })
    }
}

/// WAL for concurrent readers, cascading deletes, and a busy timeout so a
/// reader never fails while the writer checkpoints
fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .store_err()
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .store_err()?;
    conn.execute_batch("PRAGMA busy_timeout = 5000;").store_err()?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    debug!("Initializing knowledge index schema");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            source_type TEXT NOT NULL,
            platform TEXT,
            fingerprint TEXT,
            generation INTEGER NOT NULL DEFAULT 0,
            indexed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            source_type TEXT NOT NULL,
            platform TEXT,
            generation INTEGER NOT NULL,
            UNIQUE(source_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_filter ON chunks(source_type, platform);

        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            text,
            tokenize='porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks
        BEGIN
            INSERT INTO chunks_fts(rowid, text) VALUES (new.id, new.text);
        END;

        CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks
        BEGIN
            DELETE FROM chunks_fts WHERE rowid = old.id;
        END;",
    )
    .store_err()?;

    info!("Knowledge index schema initialized");
    Ok(())
}

/// Record the dimension on first open, reject a different one afterwards
fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'embedding_dimension'",
            [],
            |row| row.get(0),
        )
        .optional()
        .store_err()?;

    match stored {
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('embedding_dimension', ?)",
                params![dimension.to_string()],
            )
            .store_err()?;
            Ok(())
        }
        Some(value) => {
            let existing: usize = value
                .parse()
                .map_err(|_| Error::Store(format!("corrupt embedding_dimension: {value}")))?;
            if existing != dimension {
                return Err(Error::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
            Ok(())
        }
    }
}

fn upsert_source_tx(conn: &Connection, source: &KnowledgeSource) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sources (path, source_type, platform, indexed_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(path) DO UPDATE SET
            source_type = excluded.source_type,
            platform = excluded.platform",
        params![source.path, source.source_type.as_str(), source.platform, now],
    )
    .store_err()?;

    let id: i64 = conn
        .query_row(
            "SELECT id FROM sources WHERE path = ?",
            params![source.path],
            |row| row.get(0),
        )
        .store_err()?;

    // Keep the denormalized filter columns in step with the source
    conn.execute(
        "UPDATE chunks SET source_type = ?1, platform = ?2 WHERE source_id = ?3",
        params![source.source_type.as_str(), source.platform, id],
    )
    .store_err()?;

    Ok(id)
}

fn replace_chunks_tx(conn: &Connection, source_id: i64, chunks: &[NewChunk]) -> Result<()> {
    let (source_type, platform, generation): (String, Option<String>, i64) = conn
        .query_row(
            "SELECT source_type, platform, generation FROM sources WHERE id = ?",
            params![source_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .store_err()?
        .ok_or_else(|| Error::Store(format!("unknown source id: {source_id}")))?;
    let generation = generation + 1;

    let removed = conn
        .execute("DELETE FROM chunks WHERE source_id = ?", params![source_id])
        .store_err()?;

    {
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO chunks
                    (source_id, position, text, token_count, embedding, source_type, platform, generation)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .store_err()?;
        for chunk in chunks {
            stmt.execute(params![
                source_id,
                chunk.position as i64,
                chunk.text,
                chunk.token_count as i64,
                encode_embedding(&chunk.embedding)?,
                source_type,
                platform,
                generation
            ])
            .store_err()?;
        }
    }

    conn.execute(
        "UPDATE sources SET generation = ?, indexed_at = ? WHERE id = ?",
        params![generation, Utc::now().to_rfc3339(), source_id],
    )
    .store_err()?;

    debug!(source_id, removed, inserted = chunks.len(), generation, "Chunks replaced");
    Ok(())
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeChunk> {
    Ok(KnowledgeChunk {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_path: row.get(2)?,
        position: row.get::<_, i64>(3)? as usize,
        text: row.get(4)?,
        token_count: row.get::<_, i64>(5)? as usize,
        source_type: parse_source_type(row, 6)?,
        platform: row.get(7)?,
        generation: row.get(8)?,
    })
}

fn parse_source_type(row: &Row<'_>, idx: usize) -> rusqlite::Result<SourceType> {
    let label: String = row.get(idx)?;
    label
        .parse()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_embedding(embedding: &[f32]) -> Result<Vec<u8>> {
    bincode::serialize(embedding).map_err(|e| Error::Store(format!("Serialization failed: {}", e)))
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    bincode::deserialize(blob).map_err(|e| Error::Store(format!("Deserialization failed: {}", e)))
}

/// Cosine similarity in [-1, 1]; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Turn free text into an FTS5 query of quoted terms joined by OR
///
/// Returns `None` when the text has no searchable terms.
pub fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text.split(|c: char| !c.is_alphanumeric()) {
        if term.is_empty() {
            continue;
        }
        let term = term.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}
