//! Text chunking for vector embeddings
//!
//! Splits documents into token-bounded chunks on paragraph and sentence
//! boundaries, falling back to word and then character cuts for pieces that
//! exceed the budget. Each chunk after the first starts with up to
//! `overlap_tokens` of the previous chunk's tail.
//!
//! Chunks are always contiguous slices of the input, so boundaries are
//! reproducible and every byte of content lands in some chunk.

use opskb_core::config::{ChunkingConfig, TokenizerKind};
use opskb_core::error::{Error, Result};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Counts tokens the way the embedding model will see them
pub trait TokenCounter: Send + Sync {
    /// Stable name, recorded in source fingerprints
    fn name(&self) -> &str;

    fn count(&self, text: &str) -> usize;
}

/// One token per whitespace-separated word
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// cl100k_base byte-pair encoding
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::config(format!("Failed to load cl100k_base tokenizer: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for BpeTokenCounter {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Build the counter selected in configuration
pub fn token_counter(kind: TokenizerKind) -> Result<Arc<dyn TokenCounter>> {
    Ok(match kind {
        TokenizerKind::Bpe => Arc::new(BpeTokenCounter::new()?),
        TokenizerKind::Whitespace => Arc::new(WhitespaceTokenCounter),
    })
}

/// A chunk of text with its position in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Sequence number (0-indexed)
    pub seq: usize,
    /// Chunk text, including the overlap prefix
    pub text: String,
    /// Start of the chunk (overlap included), in bytes
    pub start_byte: usize,
    /// Start of the content not shared with the previous chunk
    pub content_start: usize,
    /// End of the chunk (exclusive), in bytes
    pub end_byte: usize,
    pub token_count: usize,
}

/// Smallest unit the packer works with
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    tokens: usize,
}

/// Text chunker for creating overlapping text segments
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    /// Create a chunker; `overlap_tokens` must be smaller than `max_tokens`
    pub fn new(max_tokens: usize, overlap_tokens: usize, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        if max_tokens == 0 || overlap_tokens >= max_tokens {
            return Err(Error::config(format!(
                "Chunk size ({}) must be greater than overlap ({})",
                max_tokens, overlap_tokens
            )));
        }
        Ok(Self {
            max_tokens,
            overlap_tokens,
            counter,
        })
    }

    /// Create a chunker from configuration
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(
            config.max_tokens,
            config.overlap_tokens,
            token_counter(config.tokenizer)?,
        )
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Name of the token counter in use
    pub fn tokenizer(&self) -> &str {
        self.counter.name()
    }

    /// Chunk a document into overlapping segments
    ///
    /// Empty or whitespace-only input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let pieces = self.pieces(text);
        let mut chunks = Vec::new();
        let mut overlap_from: Option<usize> = None;
        let mut i = 0;

        while i < pieces.len() {
            // Pack whole pieces until the budget is spent; a piece is never
            // larger than the budget except for a single indivisible char
            let content_start = pieces[i].start;
            let mut tokens = 0;
            let mut j = i;
            while j < pieces.len() && (j == i || tokens + pieces[j].tokens <= self.max_tokens) {
                tokens += pieces[j].tokens;
                j += 1;
            }
            let end_byte = pieces[j - 1].end;
            let start_byte = overlap_from.unwrap_or(content_start);
            let chunk_text = &text[start_byte..end_byte];

            chunks.push(Chunk {
                seq: chunks.len(),
                text: chunk_text.to_string(),
                start_byte,
                content_start,
                end_byte,
                token_count: self.counter.count(chunk_text),
            });

            overlap_from = self.overlap_start(text, content_start, end_byte);
            i = j;
        }

        chunks
    }

    /// Paragraphs, split into sentences and hard cuts when over budget
    fn pieces(&self, text: &str) -> Vec<Piece> {
        let mut pieces = Vec::new();
        for (ps, pe) in paragraph_spans(text) {
            let tokens = self.counter.count(&text[ps..pe]);
            if tokens <= self.max_tokens {
                pieces.push(Piece { start: ps, end: pe, tokens });
                continue;
            }
            for (ss, se) in sentence_spans(text, ps, pe) {
                let tokens = self.counter.count(&text[ss..se]);
                if tokens <= self.max_tokens {
                    pieces.push(Piece { start: ss, end: se, tokens });
                } else {
                    self.split_words(text, ss, se, &mut pieces);
                }
            }
        }
        pieces
    }

    /// Greedy word packing for a sentence that exceeds the budget
    fn split_words(&self, text: &str, start: usize, end: usize, out: &mut Vec<Piece>) {
        let mut current: Option<Piece> = None;
        for (ws, we) in word_spans(text, start, end) {
            let tokens = self.counter.count(&text[ws..we]);
            if tokens > self.max_tokens {
                if let Some(piece) = current.take() {
                    out.push(piece);
                }
                self.split_chars(text, ws, we, out);
                continue;
            }
            current = match current {
                Some(piece) if piece.tokens + tokens <= self.max_tokens => Some(Piece {
                    start: piece.start,
                    end: we,
                    tokens: piece.tokens + tokens,
                }),
                Some(piece) => {
                    out.push(piece);
                    Some(Piece { start: ws, end: we, tokens })
                }
                None => Some(Piece { start: ws, end: we, tokens }),
            };
        }
        if let Some(piece) = current {
            out.push(piece);
        }
    }

    /// Last resort for a single word longer than the budget
    fn split_chars(&self, text: &str, start: usize, end: usize, out: &mut Vec<Piece>) {
        let mut piece_start = start;
        let mut last_fit = start;
        for (offset, c) in text[start..end].char_indices() {
            let boundary = start + offset + c.len_utf8();
            if self.counter.count(&text[piece_start..boundary]) > self.max_tokens && last_fit > piece_start {
                out.push(Piece {
                    start: piece_start,
                    end: last_fit,
                    tokens: self.counter.count(&text[piece_start..last_fit]),
                });
                piece_start = last_fit;
            }
            last_fit = boundary;
        }
        if piece_start < end {
            out.push(Piece {
                start: piece_start,
                end,
                tokens: self.counter.count(&text[piece_start..end]),
            });
        }
    }

    /// Byte offset where the next chunk's overlap begins, on a word boundary
    fn overlap_start(&self, text: &str, from: usize, to: usize) -> Option<usize> {
        if self.overlap_tokens == 0 {
            return None;
        }
        let mut best = None;
        for (ws, _) in word_spans(text, from, to).into_iter().rev() {
            if self.counter.count(&text[ws..to]) > self.overlap_tokens {
                break;
            }
            best = Some(ws);
        }
        best
    }
}

/// Maximal runs of non-blank lines, trimmed
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                spans.push((s, end));
            }
            continue;
        }
        if start.is_none() {
            start = Some(line_start + (line.len() - line.trim_start().len()));
        }
        end = line_start + line.trim_end().len();
    }
    if let Some(s) = start {
        spans.push((s, end));
    }
    spans
}

/// Sentences end at `.`, `!` or `?` followed by whitespace
fn sentence_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut spans = Vec::new();
    let mut sentence_start = 0;
    let mut chars = slice.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        match chars.peek() {
            Some(&(_, next)) if next.is_whitespace() => {}
            _ => continue,
        }
        spans.push((start + sentence_start, start + i + c.len_utf8()));
        sentence_start = slice.len();
        while let Some(&(j, next)) = chars.peek() {
            if next.is_whitespace() {
                chars.next();
            } else {
                sentence_start = j;
                break;
            }
        }
    }
    if sentence_start < slice.len() {
        spans.push((start + sentence_start, end));
    }
    spans
}

/// Runs of non-whitespace characters
fn word_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;
    for (i, c) in text[start..end].char_indices() {
        match (c.is_whitespace(), word_start) {
            (true, Some(ws)) => {
                spans.push((start + ws, start + i));
                word_start = None;
            }
            (false, None) => word_start = Some(i),
            _ => {}
        }
    }
    if let Some(ws) = word_start {
        spans.push((start + ws, end));
    }
    spans
}
