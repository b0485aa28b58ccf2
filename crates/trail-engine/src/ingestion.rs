//! Buffered ingestion of events and actions into storage.
//!
//! Producers call [`IngestionQueue::enqueue`], which never blocks or fails. A
//! background loop drains up to `batch_size` tasks per tick and persists them
//! concurrently. Delivery is at-most-once: a failed task is logged and dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trail_core::IngestionTask;
use trail_store::Storage;

#[derive(Clone, Debug)]
pub struct IngestionConfig {
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(500),
            batch_size: 10,
        }
    }
}

/// Result of one `process_queue` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    pub taken: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Another flush was already running; nothing was taken.
    pub skipped: bool,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    buffer: Mutex<VecDeque<IngestionTask>>,
    processing: AtomicBool,
    storage: Arc<dyn Storage>,
    batch_size: usize,
    flush_interval: Duration,
    worker: Mutex<Option<Worker>>,
}

/// Resets the single-flight flag even if the flush is cancelled mid-await.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct IngestionQueue {
    inner: Arc<Inner>,
}

impl IngestionQueue {
    pub fn new(storage: Arc<dyn Storage>, config: IngestionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::new()),
                processing: AtomicBool::new(false),
                storage,
                batch_size: config.batch_size.max(1),
                flush_interval: config.flush_interval.max(Duration::from_millis(1)),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn enqueue(&self, task: IngestionTask) {
        self.inner.buffer.lock().push_back(task);
    }

    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buffer.lock().is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Drain and persist one batch. Returns immediately with `skipped` set if a
    /// flush is already in progress.
    pub async fn process_queue(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Start the periodic flush loop. No-op when already running.
    pub fn start(&self) {
        let mut slot = self.inner.worker.lock();
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.flush().await;
                    }
                }
            }
        });
        *slot = Some(Worker { cancel, handle });
        info!(
            interval_ms = self.inner.flush_interval.as_millis() as u64,
            batch_size = self.inner.batch_size,
            "ingestion queue started"
        );
    }

    /// Stop the loop and wait for an in-flight flush to finish. Buffered tasks
    /// stay queued for a later `start`. Idempotent.
    pub async fn stop(&self) {
        let worker = self.inner.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "ingestion loop ended abnormally");
        }
        info!(pending = self.len(), "ingestion queue stopped");
    }
}

impl Drop for IngestionQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.cancel.cancel();
        }
    }
}

impl Inner {
    async fn flush(&self) -> FlushOutcome {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return FlushOutcome {
                skipped: true,
                ..FlushOutcome::default()
            };
        }
        let _guard = ProcessingGuard(&self.processing);

        let batch: Vec<IngestionTask> = {
            let mut buffer = self.buffer.lock();
            let n = buffer.len().min(self.batch_size);
            buffer.drain(..n).collect()
        };
        if batch.is_empty() {
            return FlushOutcome::default();
        }

        let taken = batch.len();
        let results = join_all(batch.into_iter().map(|task| self.persist(task))).await;
        let failed = results.iter().filter(|ok| !**ok).count();
        debug!(taken, failed, "ingestion batch flushed");
        FlushOutcome {
            taken,
            succeeded: taken - failed,
            failed,
            skipped: false,
        }
    }

    async fn persist(&self, task: IngestionTask) -> bool {
        let kind = task.kind();
        let label = task.label();
        let result = match task {
            IngestionTask::Event(event) => self.storage.log_event(&event).await,
            IngestionTask::Action(action) => self.storage.add_action(action).await.map(|_| ()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(task = kind, subject = %label, error = %e, "ingestion task dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStorage;
    use trail_core::{EventRecord, EventType, NewAction, SessionId};

    fn edit(path: &str) -> IngestionTask {
        IngestionTask::Event(EventRecord::new(EventType::FileEdit, path, serde_json::Value::Null))
    }

    fn queue(storage: Arc<MemoryStorage>, batch_size: usize) -> IngestionQueue {
        IngestionQueue::new(
            storage,
            IngestionConfig {
                flush_interval: Duration::from_millis(500),
                batch_size,
            },
        )
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_siblings() {
        let storage = Arc::new(MemoryStorage {
            fail_event_path: Some("src/bad.rs".into()),
            ..MemoryStorage::new()
        });
        let q = queue(storage.clone(), 10);
        for i in 0..9 {
            q.enqueue(edit(&format!("src/ok{i}.rs")));
        }
        q.enqueue(edit("src/bad.rs"));

        let outcome = q.process_queue().await;
        assert_eq!(
            outcome,
            FlushOutcome { taken: 10, succeeded: 9, failed: 1, skipped: false }
        );
        assert_eq!(storage.events.lock().len(), 9);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn drains_at_most_batch_size_from_head() {
        let storage = Arc::new(MemoryStorage::new());
        let q = queue(storage.clone(), 10);
        for i in 0..25 {
            q.enqueue(edit(&format!("f{i}.rs")));
        }
        assert_eq!(q.process_queue().await.taken, 10);
        assert_eq!(q.len(), 15);
        assert_eq!(storage.event_paths()[0], "f0.rs");
    }

    #[tokio::test]
    async fn zero_batch_size_is_clamped() {
        let q = queue(Arc::new(MemoryStorage::new()), 0);
        assert_eq!(q.batch_size(), 1);
        q.enqueue(edit("a.rs"));
        q.enqueue(edit("b.rs"));
        assert_eq!(q.process_queue().await.taken, 1);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn actions_are_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let q = queue(storage.clone(), 10);
        q.enqueue(IngestionTask::Action(NewAction::new(
            SessionId::from_raw("sess_1"),
            "Committed: tidy",
            vec![],
        )));
        assert_eq!(q.process_queue().await.succeeded, 1);
        assert_eq!(storage.actions.lock()[0].description, "Committed: tidy");
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_flush_is_skipped() {
        let storage = Arc::new(MemoryStorage {
            event_delay: Some(Duration::from_millis(200)),
            ..MemoryStorage::new()
        });
        let q = queue(storage.clone(), 10);
        q.enqueue(edit("a.rs"));
        q.enqueue(edit("b.rs"));

        let (first, second) = tokio::join!(q.process_queue(), q.process_queue());
        assert_eq!(first.taken, 2);
        assert!(second.skipped);
        assert_eq!(second.taken, 0);

        // Guard released once the first flush finished.
        q.enqueue(edit("c.rs"));
        assert!(!q.process_queue().await.skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_flushes_until_stopped() {
        let storage = Arc::new(MemoryStorage::new());
        let q = queue(storage.clone(), 10);
        q.start();
        q.start();
        assert!(q.is_running());

        for i in 0..3 {
            q.enqueue(edit(&format!("f{i}.rs")));
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(storage.events.lock().len(), 3);

        q.stop().await;
        q.stop().await;
        assert!(!q.is_running());

        q.enqueue(edit("late.rs"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(storage.events.lock().len(), 3);
        assert_eq!(q.len(), 1);

        q.start();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(storage.events.lock().len(), 4);
        q.stop().await;
    }
}
