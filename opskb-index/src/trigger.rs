//! Learning trigger: best-effort background indexing for producers
//!
//! Producers call [`LearningTrigger::notify`] right after they persist new
//! knowledge. The event goes onto an unbounded queue drained by a small pool
//! of tokio workers; the producer never waits for indexing and never sees
//! its failures. Failures travel over a separate channel to a reporter task
//! that logs them.

use crate::indexer::Indexer;
use futures::FutureExt;
use opskb_core::error::Error;
use opskb_core::knowledge::ProducerEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Operator-facing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStats {
    /// Events accepted onto the queue (or run inline)
    pub submitted: u64,
    pub indexed: u64,
    pub failed: u64,
    /// Events refused after shutdown
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TriggerStats {
        TriggerStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            indexed: self.indexed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// A background index that did not make it into the store
#[derive(Debug, Clone)]
pub struct IndexFailure {
    pub event: ProducerEvent,
    /// Stable error label, see [`Error::kind`]
    pub kind: &'static str,
    pub message: String,
}

impl IndexFailure {
    fn new(event: ProducerEvent, err: &Error) -> Self {
        Self {
            event,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn panicked(event: ProducerEvent) -> Self {
        Self {
            event,
            kind: "panic",
            message: "indexing task panicked".to_string(),
        }
    }

    fn log(&self) {
        error!(
            event_id = %self.event.id,
            path = ?self.event.path,
            source_type = %self.event.source_type,
            kind = self.kind,
            error = %self.message,
            "Background indexing failed; knowledge not yet searchable"
        );
    }
}

/// Fire-and-forget indexing hook
pub struct LearningTrigger {
    indexer: Arc<Indexer>,
    sender: Mutex<Option<mpsc::UnboundedSender<ProducerEvent>>>,
    failures: Mutex<Option<mpsc::UnboundedSender<IndexFailure>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl LearningTrigger {
    /// Start `workers` indexing tasks on the current tokio runtime
    pub fn spawn(indexer: Arc<Indexer>, workers: usize) -> Arc<Self> {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<ProducerEvent>();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel::<IndexFailure>();
        let receiver = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&receiver),
                Arc::clone(&indexer),
                Arc::clone(&counters),
                failure_tx.clone(),
            )));
        }
        handles.push(tokio::spawn(report_failures(failure_rx)));

        info!(workers, "Learning trigger started");
        Arc::new(Self {
            indexer,
            sender: Mutex::new(Some(tx)),
            failures: Mutex::new(Some(failure_tx)),
            handles: Mutex::new(handles),
            counters,
        })
    }

    /// Queue `event` for indexing; returns immediately
    pub fn notify(&self, event: ProducerEvent) {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            warn!(event_id = %event.id, path = ?event.path, "Learning trigger is shut down, dropping event");
            return;
        };

        debug!(event_id = %event.id, path = ?event.path, source_type = %event.source_type, "Queued knowledge for indexing");
        match sender.send(event) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::SendError(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(event_id = %event.id, path = ?event.path, "Indexing queue closed, dropping event");
            }
        }
    }

    /// Index `event` inline, still swallowing failures
    ///
    /// Returns whether the knowledge was indexed.
    pub async fn index_now(&self, event: ProducerEvent) -> bool {
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        let failures = self.failures.lock().clone();
        process(&self.indexer, &self.counters, failures.as_ref(), event).await
    }

    pub fn stats(&self) -> TriggerStats {
        self.counters.snapshot()
    }

    /// Close the queue and wait for queued work to drain
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        self.failures.lock().take();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Learning trigger task ended abnormally");
            }
        }
        info!(stats = ?self.stats(), "Learning trigger stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ProducerEvent>>>,
    indexer: Arc<Indexer>,
    counters: Arc<Counters>,
    failures: mpsc::UnboundedSender<IndexFailure>,
) {
    loop {
        let event = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(event) = event else {
            break;
        };
        debug!(worker_id, event_id = %event.id, "Indexing queued knowledge");
        process(&indexer, &counters, Some(&failures), event).await;
    }
    debug!(worker_id, "Learning trigger worker exiting");
}

/// One best-effort index; every outcome ends here
async fn process(
    indexer: &Indexer,
    counters: &Counters,
    failures: Option<&mpsc::UnboundedSender<IndexFailure>>,
    event: ProducerEvent,
) -> bool {
    let outcome = AssertUnwindSafe(indexer.index(&event.path, event.source_type, event.platform.clone()))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(chunks)) => {
            counters.indexed.fetch_add(1, Ordering::SeqCst);
            debug!(event_id = %event.id, path = ?event.path, chunks, "Background index complete");
            return true;
        }
        Ok(Err(e)) => IndexFailure::new(event, &e),
        Err(_) => IndexFailure::panicked(event),
    };

    counters.failed.fetch_add(1, Ordering::SeqCst);
    match failures {
        Some(channel) => {
            if let Err(mpsc::error::SendError(failure)) = channel.send(failure) {
                failure.log();
            }
        }
        None => failure.log(),
    }
    false
}

async fn report_failures(mut failures: mpsc::UnboundedReceiver<IndexFailure>) {
    while let Some(failure) = failures.recv().await {
        failure.log();
    }
}
