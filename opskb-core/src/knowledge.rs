//! Knowledge data model: sources, chunks and search results

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of knowledge a source holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Operational report written by the automation layer
    Report,
    /// Documented solution to a past problem
    Solution,
    /// Alias table (device/interface naming)
    Alias,
    /// Skill procedure
    SkillDoc,
}

impl SourceType {
    /// All source types, in a stable order
    pub const ALL: [SourceType; 4] = [
        SourceType::Report,
        SourceType::Solution,
        SourceType::Alias,
        SourceType::SkillDoc,
    ];

    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Solution => "solution",
            Self::Alias => "alias",
            Self::SkillDoc => "skill_doc",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report" => Ok(Self::Report),
            "solution" => Ok(Self::Solution),
            "alias" => Ok(Self::Alias),
            "skill_doc" => Ok(Self::SkillDoc),
            other => Err(Error::config(format!("unknown source type: {other}"))),
        }
    }
}

/// A unit of origin for knowledge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    /// Path the document was read from (identity of the source)
    pub path: String,
    pub source_type: SourceType,
    pub platform: Option<String>,
}

impl KnowledgeSource {
    pub fn new(path: impl Into<String>, source_type: SourceType, platform: Option<String>) -> Self {
        Self {
            path: path.into(),
            source_type,
            platform,
        }
    }
}

/// Persisted source row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub source: KnowledgeSource,
    /// RFC 3339 timestamp of the last replace
    pub indexed_at: String,
    /// Hash of content and chunking parameters of the last replace
    pub fingerprint: Option<String>,
    /// Bumped on every replace
    pub generation: i64,
}

/// Chunk payload handed to the store for insertion
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub position: usize,
    pub text: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
}

/// One retrievable text unit, as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Unique, increasing in insertion order
    pub id: i64,
    pub source_id: i64,
    pub source_path: String,
    pub position: usize,
    pub text: String,
    pub token_count: usize,
    pub source_type: SourceType,
    pub platform: Option<String>,
    /// Generation of the owning source when this chunk was written
    pub generation: i64,
}

/// Optional predicate over denormalized chunk columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub source_type: Option<SourceType>,
    pub platform: Option<String>,
}

impl SearchFilter {
    pub fn source_type(source_type: SourceType) -> Self {
        Self {
            source_type: Some(source_type),
            platform: None,
        }
    }

    pub fn platform(platform: impl Into<String>) -> Self {
        Self {
            source_type: None,
            platform: Some(platform.into()),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.source_type.is_none() && self.platform.is_none()
    }

    /// In-memory evaluation, mirrors what the store pushes down
    pub fn matches(&self, chunk: &KnowledgeChunk) -> bool {
        self.source_type.map_or(true, |t| t == chunk.source_type)
            && self
                .platform
                .as_deref()
                .map_or(true, |p| chunk.platform.as_deref() == Some(p))
    }
}

/// A chunk paired with a stage-local score and 1-based rank
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: KnowledgeChunk,
    /// BM25, cosine, fused RRF or reranker relevance depending on stage
    pub score: f64,
    pub rank: usize,
}

/// What `search()` hands back to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub source_path: String,
    pub source_type: SourceType,
    pub platform: Option<String>,
    pub score: f64,
}

impl From<SearchResult> for SearchHit {
    fn from(result: SearchResult) -> Self {
        Self {
            text: result.chunk.text,
            source_path: result.chunk.source_path,
            source_type: result.chunk.source_type,
            platform: result.chunk.platform,
            score: result.score,
        }
    }
}

/// Raised by report-write, solution-save and alias-update paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerEvent {
    /// Correlates the event across log lines
    pub id: uuid::Uuid,
    pub path: PathBuf,
    pub source_type: SourceType,
    pub platform: Option<String>,
}

impl ProducerEvent {
    pub fn new(path: impl Into<PathBuf>, source_type: SourceType, platform: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            path: path.into(),
            source_type,
            platform,
        }
    }
}
