//! Per-file trailing-edge debounce of edit notifications.
//!
//! Each path owns at most one pending timer. A new edit aborts the previous
//! timer for that path and starts a fresh one; paths never share timers. When a
//! timer fires it enqueues one `file_edit` event. When the edit can be
//! attributed to a function it also enqueues a `function_edit` event and, with
//! a session open, a "Modified function" action.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use trail_core::{EventRecord, EventType, IngestionTask, NewAction, SessionId};

use crate::ingestion::IngestionQueue;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Maps an edited zero-based line to the enclosing function, if known.
#[async_trait]
pub trait SymbolResolver: Send + Sync {
    async fn function_at(&self, path: &str, line: u32) -> Option<String>;
}

/// Resolver that never attributes edits.
pub struct NoSymbols;

#[async_trait]
impl SymbolResolver for NoSymbols {
    async fn function_at(&self, _path: &str, _line: u32) -> Option<String> {
        None
    }
}

/// Wall-clock anchored to the tokio clock, so event timestamps advance with
/// `tokio::time` (including paused time in tests).
struct EventClock {
    wall: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl EventClock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.wall + elapsed
    }
}

struct PendingEdit {
    generation: u64,
    handle: JoinHandle<()>,
}

struct DebounceInner {
    delay: Duration,
    queue: Arc<IngestionQueue>,
    resolver: Arc<dyn SymbolResolver>,
    session: watch::Receiver<Option<SessionId>>,
    pending: DashMap<String, PendingEdit>,
    next_generation: AtomicU64,
    clock: EventClock,
}

pub struct EditDebouncer {
    inner: Arc<DebounceInner>,
}

impl EditDebouncer {
    pub fn new(
        delay: Duration,
        queue: Arc<IngestionQueue>,
        resolver: Arc<dyn SymbolResolver>,
        session: watch::Receiver<Option<SessionId>>,
    ) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                delay,
                queue,
                resolver,
                session,
                pending: DashMap::new(),
                next_generation: AtomicU64::new(1),
                clock: EventClock::new(),
            }),
        }
    }

    /// Record an edit to `path`. `line` is the first changed line, when known.
    pub fn notify_edit(&self, path: &str, line: Option<u32>) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        // The entry guard is held across spawn so a zero-delay timer cannot
        // look itself up before it is registered.
        let entry = self.inner.pending.entry(path.to_string());
        let inner = Arc::clone(&self.inner);
        let owned = path.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            inner.fire(owned, generation, line).await;
        });
        let pending = PendingEdit { generation, handle };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(pending);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Cancel every pending timer. Nothing is enqueued for cancelled edits.
    pub fn dispose(&self) {
        let cancelled = self.inner.pending.len();
        self.inner.pending.retain(|_, pending| {
            pending.handle.abort();
            false
        });
        if cancelled > 0 {
            debug!(cancelled, "edit debouncer disposed");
        }
    }
}

impl Drop for EditDebouncer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl DebounceInner {
    async fn fire(&self, path: String, generation: u64, line: Option<u32>) {
        // A superseded timer finds a newer generation and backs off. Removing
        // our own entry first means a later edit starts a fresh timer rather
        // than aborting this one mid-flight.
        if self
            .pending
            .remove_if(&path, |_, pending| pending.generation == generation)
            .is_none()
        {
            return;
        }

        let fired_at = self.clock.now();
        self.queue.enqueue(IngestionTask::Event(EventRecord::at(
            fired_at,
            EventType::FileEdit,
            path.clone(),
            json!({ "line": line }),
        )));

        let Some(line) = line else {
            return;
        };
        let Some(function) = self.resolver.function_at(&path, line).await else {
            return;
        };
        self.queue.enqueue(IngestionTask::Event(EventRecord::at(
            fired_at,
            EventType::FunctionEdit,
            path.clone(),
            json!({ "line": line, "function": function }),
        )));

        let session = self.session.borrow().clone();
        match session {
            Some(session_id) => {
                let mut action = NewAction::new(session_id, format!("Modified function: {function}"), vec![path]);
                action.timestamp = fired_at;
                self.queue.enqueue(IngestionTask::Action(action));
            }
            None => debug!(path = %path, function = %function, "no active session, function edit not attributed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::IngestionConfig;
    use crate::test_support::MemoryStorage;

    struct FixedSymbol(&'static str);

    #[async_trait]
    impl SymbolResolver for FixedSymbol {
        async fn function_at(&self, _path: &str, _line: u32) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        queue: Arc<IngestionQueue>,
        debouncer: EditDebouncer,
        _session_tx: watch::Sender<Option<SessionId>>,
    }

    fn harness(resolver: Arc<dyn SymbolResolver>, session: Option<SessionId>) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(IngestionQueue::new(storage.clone(), IngestionConfig::default()));
        let (tx, rx) = watch::channel(session);
        let debouncer = EditDebouncer::new(DEFAULT_DEBOUNCE, queue.clone(), resolver, rx);
        Harness {
            storage,
            queue,
            debouncer,
            _session_tx: tx,
        }
    }

    async fn drain(h: &Harness) {
        while !h.queue.is_empty() {
            h.queue.process_queue().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_collapses_to_one_event() {
        let before = Utc::now();
        let h = harness(Arc::new(NoSymbols), None);
        for _ in 0..5 {
            h.debouncer.notify_edit("src/auth.rs", Some(3));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(h.queue.len(), 0);
        assert_eq!(h.debouncer.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        drain(&h).await;

        let events = h.storage.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::FileEdit);
        assert_eq!(events[0].file_path, "src/auth.rs");
        // Five edits 200ms apart, then the full delay after the last one.
        assert!(events[0].timestamp >= before + TimeDelta::milliseconds(2800));
        assert!(events[0].timestamp < before + TimeDelta::milliseconds(2800) + TimeDelta::seconds(60));
        assert_eq!(h.debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn files_debounce_independently() {
        let h = harness(Arc::new(NoSymbols), None);
        h.debouncer.notify_edit("a.rs", None);
        h.debouncer.notify_edit("b.rs", None);
        h.debouncer.notify_edit("a.rs", None);
        tokio::time::sleep(Duration::from_secs(3)).await;
        drain(&h).await;

        let mut paths = h.storage.event_paths();
        paths.sort();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[tokio::test(start_paused = true)]
    async fn attributed_edit_adds_one_action() {
        let session = SessionId::from_raw("sess_active");
        let h = harness(Arc::new(FixedSymbol("login")), Some(session.clone()));
        h.debouncer.notify_edit("src/auth.rs", Some(12));
        h.debouncer.notify_edit("src/auth.rs", Some(14));
        tokio::time::sleep(Duration::from_secs(3)).await;
        drain(&h).await;

        let events = h.storage.events.lock().clone();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::FileEdit, EventType::FunctionEdit]);
        assert_eq!(events[1].metadata["function"], "login");
        assert_eq!(events[1].metadata["line"], 14);
        let actions = h.storage.actions.lock().clone();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].description, "Modified function: login");
        assert_eq!(actions[0].session_id, session);
        assert_eq!(actions[0].files, vec!["src/auth.rs"]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_action_without_session() {
        let h = harness(Arc::new(FixedSymbol("login")), None);
        h.debouncer.notify_edit("src/auth.rs", Some(12));
        tokio::time::sleep(Duration::from_secs(3)).await;
        drain(&h).await;
        assert_eq!(h.storage.events.lock().len(), 2);
        assert!(h.storage.actions.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_pending_timers() {
        let h = harness(Arc::new(NoSymbols), None);
        h.debouncer.notify_edit("a.rs", None);
        h.debouncer.notify_edit("b.rs", None);
        h.debouncer.dispose();
        assert_eq!(h.debouncer.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.queue.is_empty());
    }
}
