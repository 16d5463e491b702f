use crate::indexer::{crawl, is_indexable, Indexer};
use crate::producer::source_type_for_subdir;
use crate::trigger::LearningTrigger;
use anyhow::Context;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use opskb_core::error::Result;
use opskb_core::knowledge::{ProducerEvent, SourceType};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Watches the knowledge root and feeds changes to the learning trigger
///
/// Only files under a known type directory (`reports/`, `solutions/`, ...)
/// are picked up; a nested directory below it is read as the platform tag.
pub struct KnowledgeWatcher {
    root: PathBuf,
    trigger: Arc<LearningTrigger>,
    indexer: Arc<Indexer>,
    watcher: Option<notify::RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl KnowledgeWatcher {
    pub fn new(root: impl Into<PathBuf>, trigger: Arc<LearningTrigger>, indexer: Arc<Indexer>) -> Self {
        Self {
            root: root.into(),
            trigger,
            indexer,
            watcher: None,
            task: None,
        }
    }

    /// Submit every existing document, then start watching
    ///
    /// Returns how many documents the initial crawl submitted.
    pub async fn start(&mut self) -> Result<usize> {
        // Event paths arrive absolute and symlink-resolved; match them
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        }
        self.root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("Failed to resolve knowledge root {:?}", self.root))?;

        let submitted = self.initial_crawl()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = notify::RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create watcher")?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to start watch on {:?}", self.root))?;
        self.watcher = Some(watcher);

        let root = self.root.clone();
        let trigger = Arc::clone(&self.trigger);
        let indexer = Arc::clone(&self.indexer);
        self.task = Some(tokio::spawn(async move {
            info!("Watcher started for {:?}", root);
            while let Some(event) = rx.recv().await {
                handle_event(&root, &trigger, &indexer, event).await;
            }
            debug!("Watcher event loop finished for {:?}", root);
        }));

        Ok(submitted)
    }

    /// Knowledge root; absolute once started
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching; queued indexing work is left to the trigger
    pub fn stop(&mut self) {
        // Dropping the watcher closes the event channel and ends the loop
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn initial_crawl(&self) -> Result<usize> {
        info!("Crawling knowledge root for initial indexing: {:?}", self.root);

        let mut submitted = 0;
        for path in crawl(&self.root)? {
            if let Some((source_type, platform)) = classify(&self.root, &path) {
                self.trigger
                    .notify(ProducerEvent::new(path, source_type, platform));
                submitted += 1;
            }
        }
        info!(submitted, "Initial crawl complete");
        Ok(submitted)
    }
}

impl Drop for KnowledgeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_event(root: &Path, trigger: &LearningTrigger, indexer: &Indexer, event: Event) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in event.paths {
                if !path.is_file() {
                    continue;
                }
                if let Some((source_type, platform)) = classify(root, &path) {
                    debug!("Detected change in {:?}, re-indexing", path);
                    trigger.notify(ProducerEvent::new(path, source_type, platform));
                }
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                if classify(root, &path).is_none() {
                    continue;
                }
                match indexer.remove(&path).await {
                    Ok(true) => info!("Removed deleted document {:?} from index", path),
                    Ok(false) => {}
                    Err(e) => warn!(path = ?path, kind = e.kind(), error = %e, "Failed to drop deleted document"),
                }
            }
        }
        _ => {}
    }
}

/// Source type and platform for a document path under `root`
///
/// `None` for non-indexable files and files outside a type directory.
pub fn classify(root: &Path, path: &Path) -> Option<(SourceType, Option<String>)> {
    if !is_indexable(path) {
        return None;
    }
    let relative = path.strip_prefix(root).ok()?;
    let dirs: Vec<&str> = relative
        .parent()?
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();

    let source_type = source_type_for_subdir(dirs.first()?)?;
    let platform = dirs.get(1).map(|p| p.to_string());
    Some((source_type, platform))
}
