//! Knowledge producers
//!
//! [`KnowledgeWriter`] is the write side of the knowledge root: reports,
//! solutions, alias tables and skill docs land in their own subdirectory and
//! are then handed to the [`LearningTrigger`]. A write's result reflects the
//! write alone; indexing happens later and its failures stay in the logs.
//!
//! ```text
//! <root>/
//!   reports/    SourceType::Report
//!   solutions/  SourceType::Solution
//!   aliases/    SourceType::Alias
//!   skills/     SourceType::SkillDoc
//! ```
//!
//! Platform-tagged documents go one level deeper, e.g.
//! `solutions/junos/bgp-flap.md`, so the directory watcher can recover the
//! tag from the path alone.

use crate::trigger::LearningTrigger;
use opskb_core::error::{Error, Result};
use opskb_core::knowledge::{ProducerEvent, SourceType};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Subdirectory of the knowledge root holding `source_type` documents
pub fn subdir(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Report => "reports",
        SourceType::Solution => "solutions",
        SourceType::Alias => "aliases",
        SourceType::SkillDoc => "skills",
    }
}

/// Inverse of [`subdir`]
pub fn source_type_for_subdir(dir: &str) -> Option<SourceType> {
    SourceType::ALL.into_iter().find(|t| subdir(*t) == dir)
}

/// Writes knowledge documents and notifies the learning trigger
#[derive(Clone)]
pub struct KnowledgeWriter {
    root: PathBuf,
    trigger: Arc<LearningTrigger>,
}

impl KnowledgeWriter {
    pub fn new(root: impl Into<PathBuf>, trigger: Arc<LearningTrigger>) -> Self {
        Self {
            root: root.into(),
            trigger,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an operational report
    pub async fn write_report(&self, name: &str, body: &str, platform: Option<String>) -> Result<PathBuf> {
        self.persist(SourceType::Report, name, body, platform).await
    }

    /// Persist a solution to a resolved problem
    pub async fn save_solution(&self, name: &str, body: &str, platform: Option<String>) -> Result<PathBuf> {
        self.persist(SourceType::Solution, name, body, platform).await
    }

    /// Replace an alias table
    pub async fn update_aliases(&self, name: &str, body: &str, platform: Option<String>) -> Result<PathBuf> {
        self.persist(SourceType::Alias, name, body, platform).await
    }

    pub async fn save_skill_doc(&self, name: &str, body: &str) -> Result<PathBuf> {
        self.persist(SourceType::SkillDoc, name, body, None).await
    }

    async fn persist(&self, source_type: SourceType, name: &str, body: &str, platform: Option<String>) -> Result<PathBuf> {
        let platform = platform.map(|p| segment(&p)).transpose()?;
        let mut dir = self.root.join(subdir(source_type));
        if let Some(platform) = &platform {
            dir.push(platform);
        }
        let path = dir.join(file_name(name)?);

        tokio::fs::create_dir_all(&dir).await?;
        write_atomic(&path, body).await?;
        info!(path = ?path, source_type = %source_type, bytes = body.len(), "Knowledge written");

        // The write is durable; from here on nothing can fail the caller
        self.trigger
            .notify(ProducerEvent::new(path.clone(), source_type, platform));
        Ok(path)
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("doc"),
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = write_synced(&tmp, body).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    debug!(path = ?path, "Atomic write complete");
    Ok(())
}

/// Write `body` and flush it to disk before the file is renamed into place
async fn write_synced(path: &Path, body: &str) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body.as_bytes()).await?;
    file.sync_all().await
}

/// Safe file name for `name`, defaulting to a `.md` extension
fn file_name(name: &str) -> Result<String> {
    let slug = segment(name)?;
    if crate::indexer::is_indexable(Path::new(&slug)) {
        Ok(slug)
    } else {
        Ok(format!("{slug}.md"))
    }
}

/// Single path segment safe to join under the knowledge root
fn segment(name: &str) -> Result<String> {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .trim_start_matches(|c| c == '.' || c == '-')
        .trim_end_matches('-');

    if slug.is_empty() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid knowledge document name: {name:?}"),
        )));
    }
    Ok(slug.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdir_mapping_roundtrip() {
        for t in SourceType::ALL {
            assert_eq!(source_type_for_subdir(subdir(t)), Some(t));
        }
        assert_eq!(source_type_for_subdir("misc"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("bgp flap on core1").unwrap(), "bgp-flap-on-core1.md");
        assert_eq!(file_name("aliases.txt").unwrap(), "aliases.txt");
        assert_eq!(file_name("../../etc/passwd").unwrap(), "etc-passwd.md");
        assert!(file_name("  ").is_err());
        assert!(file_name("..").is_err());
        assert_eq!(segment("ios xr").unwrap(), "ios-xr");
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.md");
        write_atomic(&path, "one").await.unwrap();
        write_atomic(&path, "two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");

        // no temp files left behind
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_synced_flushes_full_body() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("big.md");
        let body = "interface down\n".repeat(10_000);
        write_synced(&path, &body).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), body.len() as u64);
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("occupied.md");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("inner"), "x").unwrap();

        assert!(write_atomic(&target, "body").await.is_err());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("occupied.md")]);
    }
}
