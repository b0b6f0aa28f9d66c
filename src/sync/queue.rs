//! The mutation queue.
//!
//! Single authoritative FIFO of pending operations. Every change is written
//! through to the [`QueueStore`] before the call returns; changes the store
//! could not take are retried on the next successful write. The lock is only
//! held for the duration of one call, never across a backend request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::operation::{NewOperation, QueuedOperation};
use super::store::QueueStore;
use crate::error::SyncqError;
use crate::schema::SchemaRegistry;

struct Entry {
    op: QueuedOperation,
    /// Store row holding this operation, `None` until it was appended.
    row: Option<u64>,
    /// Attempt bookkeeping changed since it was last written.
    dirty: bool,
}

struct Inner {
    entries: VecDeque<Entry>,
    store: Box<dyn QueueStore>,
    /// Whether the persisted list has been read. Nothing is written before.
    loaded: bool,
    /// Rows whose delete did not reach the store yet.
    removed: Vec<u64>,
    next_id: u64,
}

impl Inner {
    fn new(store: Box<dyn QueueStore>) -> Self {
        Self {
            entries: VecDeque::new(),
            store,
            loaded: false,
            removed: Vec::new(),
            next_id: 1,
        }
    }

    /// Read the store if that never succeeded. Persisted operations are
    /// older than anything queued meanwhile, so they go ahead of it.
    fn load(&mut self) -> Result<(), SyncqError> {
        if self.loaded {
            return Ok(());
        }
        let stored = self.store.load_all()?;
        self.loaded = true;

        let queued_meanwhile = std::mem::take(&mut self.entries);
        for op in stored {
            let row = op.id;
            let id = self.assign_id(Some(row), &queued_meanwhile);
            self.entries.push_back(Entry {
                op: QueuedOperation { id, ..op },
                row: Some(row),
                dirty: false,
            });
        }
        self.entries.extend(queued_meanwhile);

        if !self.entries.is_empty() {
            tracing::info!(pending = self.entries.len(), "restored queued operations");
        }
        Ok(())
    }

    /// Write every change the store has not seen yet.
    fn sync(&mut self) -> Result<(), SyncqError> {
        self.load()?;

        while let Some(&row) = self.removed.last() {
            self.store.remove(row)?;
            self.removed.pop();
        }

        let Self { entries, store, .. } = self;
        for entry in entries.iter_mut() {
            match entry.row {
                None => {
                    entry.row = Some(store.append(&entry.op)?);
                    entry.dirty = false;
                }
                Some(row) if entry.dirty => {
                    store.update(row, &entry.op)?;
                    entry.dirty = false;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Pick the in-memory id for an operation: the store row if no queued
    /// operation already uses it, otherwise the next free id. Ids handed out
    /// never change, so a caller holding one always refers to the same entry.
    fn assign_id(&mut self, row: Option<u64>, others: &VecDeque<Entry>) -> u64 {
        let taken = |id: u64| {
            self.entries.iter().chain(others.iter()).any(|e| e.op.id == id)
        };
        let id = match row {
            Some(row) if !taken(row) => row,
            _ => {
                let mut id = self.next_id;
                while taken(id) {
                    id += 1;
                }
                id
            }
        };
        self.next_id = self.next_id.max(id + 1);
        id
    }

    fn take_entry(&mut self, index: usize) -> Option<QueuedOperation> {
        let entry = self.entries.remove(index)?;
        if let Some(row) = entry.row {
            self.removed.push(row);
        }
        Some(entry.op)
    }
}

/// In-memory ordered queue synchronized with a durable store.
pub struct MutationQueue {
    inner: Mutex<Inner>,
    schemas: SchemaRegistry,
    degraded: AtomicBool,
}

impl MutationQueue {
    /// Open the queue, loading whatever the store has persisted.
    ///
    /// If the store is unavailable the queue starts empty and degraded. It
    /// keeps working for the session and never writes to the store before
    /// the persisted list has been read, which is retried on every change.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if a persisted record is malformed.
    pub fn open(store: Box<dyn QueueStore>, schemas: SchemaRegistry) -> Result<Self, SyncqError> {
        let mut inner = Inner::new(store);
        let degraded = match inner.load() {
            Ok(()) => false,
            Err(SyncqError::StorageUnavailable(reason)) => {
                tracing::warn!(%reason, "queue storage unavailable, continuing in memory");
                true
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            inner: Mutex::new(inner),
            schemas,
            degraded: AtomicBool::new(degraded),
        })
    }

    /// Append an operation to the tail and persist it.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` if the payload violates its collection schema; the
    ///   operation is not queued.
    /// - `StorageUnavailable` if persisting failed; the operation **is**
    ///   queued in memory and will still be dispatched this session.
    pub fn enqueue(&self, operation: NewOperation) -> Result<QueuedOperation, SyncqError> {
        self.schemas
            .validate(operation.kind, &operation.target.collection, &operation.payload)?;

        let mut inner = self.inner.lock();
        let mut queued = QueuedOperation::from_new(0, operation);
        let stored = inner.sync().and_then(|()| inner.store.append(&queued));
        let row = stored.as_ref().ok().copied();
        queued.id = inner.assign_id(row, &VecDeque::new());
        inner.entries.push_back(Entry {
            op: queued.clone(),
            row,
            dirty: false,
        });

        tracing::debug!(id = queued.id, op = %queued.label(), pending = inner.entries.len(), "enqueued");
        self.outcome(stored.map(|_| ()))?;
        Ok(queued)
    }

    /// Oldest pending operation, without removing it.
    #[must_use]
    pub fn peek_front(&self) -> Option<QueuedOperation> {
        self.inner.lock().entries.front().map(|e| e.op.clone())
    }

    /// Remove the oldest operation and persist the removal.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if persisting failed. The operation is
    /// gone from memory; its row is deleted on the next successful write, or
    /// replayed if the process exits first.
    pub fn remove_front(&self) -> Result<Option<QueuedOperation>, SyncqError> {
        let mut inner = self.inner.lock();
        let Some(removed) = inner.take_entry(0) else {
            return Ok(None);
        };
        let result = inner.sync();
        self.outcome(result)?;
        Ok(Some(removed))
    }

    /// Remove operation `id` if it is still queued.
    ///
    /// Returns `None` when it is gone (e.g. the queue was cleared while the
    /// operation was in flight).
    pub(crate) fn remove_if_queued(&self, id: u64) -> Result<Option<QueuedOperation>, SyncqError> {
        let mut inner = self.inner.lock();
        let Some(index) = inner.entries.iter().position(|e| e.op.id == id) else {
            return Ok(None);
        };
        let removed = inner.take_entry(index);
        let result = inner.sync();
        self.outcome(result)?;
        Ok(removed)
    }

    /// Record a failed delivery attempt on the front operation.
    ///
    /// Returns the updated attempt count.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is not at the front, or
    /// `StorageUnavailable` if persisting failed.
    pub fn record_attempt(&self, id: u64, error: &str) -> Result<u32, SyncqError> {
        let mut inner = self.inner.lock();
        let front = inner
            .entries
            .front_mut()
            .filter(|e| e.op.id == id)
            .ok_or_else(|| SyncqError::NotFound(format!("operation {id} at queue front")))?;
        front.op.attempts += 1;
        front.op.last_error = Some(error.to_string());
        front.dirty = true;
        let attempts = front.op.attempts;
        let result = inner.sync();
        self.outcome(result)?;
        Ok(attempts)
    }

    /// Drop every pending operation.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store could not be reached. When
    /// the persisted list was never read nothing is cleared.
    pub fn clear(&self) -> Result<usize, SyncqError> {
        let mut inner = self.inner.lock();
        let loaded = inner.load();
        self.outcome(loaded)?;

        let count = inner.entries.len();
        while inner.take_entry(0).is_some() {}
        let result = inner.sync();
        self.outcome(result)?;
        Ok(count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Copy of the pending operations in FIFO order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.inner.lock().entries.iter().map(|e| e.op.clone()).collect()
    }

    /// Whether the store is behind the in-memory queue.
    #[must_use]
    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    fn outcome(&self, result: Result<(), SyncqError>) -> Result<(), SyncqError> {
        match result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("queue storage recovered");
                }
                Ok(())
            }
            Err(e) => {
                self.degraded.store(true, Ordering::SeqCst);
                tracing::error!(error = %e, "failed to persist queue");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryQueueStore;
    use serde_json::{json, Map, Value};

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn task(title: &str) -> NewOperation {
        NewOperation::create("tasks", payload(json!({"title": title, "projectId": "p1"}))).unwrap()
    }

    fn open(store: &MemoryQueueStore) -> MutationQueue {
        MutationQueue::open(Box::new(store.clone()), SchemaRegistry::with_defaults()).unwrap()
    }

    #[test]
    fn test_enqueue_appends_and_persists() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);

        let a = queue.enqueue(task("A")).unwrap();
        let b = queue.enqueue(task("B")).unwrap();

        assert!(b.id > a.id);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_front().unwrap().id, a.id);
        assert_eq!(store.persisted(), queue.snapshot());
    }

    #[test]
    fn test_remove_front_is_fifo() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);
        queue.enqueue(task("A")).unwrap();
        queue.enqueue(task("B")).unwrap();

        let first = queue.remove_front().unwrap().unwrap();
        assert_eq!(first.payload["title"], "A");
        assert_eq!(store.persisted().len(), 1);
        assert_eq!(store.persisted()[0].payload["title"], "B");

        queue.remove_front().unwrap();
        assert!(queue.remove_front().unwrap().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reopen_restores_order_and_ids() {
        let store = MemoryQueueStore::new();
        {
            let queue = open(&store);
            queue.enqueue(task("A")).unwrap();
            queue.enqueue(task("B")).unwrap();
        }

        let queue = open(&store);
        let titles: Vec<_> = queue
            .snapshot()
            .iter()
            .map(|op| op.payload["title"].clone())
            .collect();
        assert_eq!(titles, vec![json!("A"), json!("B")]);

        let c = queue.enqueue(task("C")).unwrap();
        assert_eq!(c.id, 3);
    }

    #[test]
    fn test_schema_violation_is_not_queued() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);

        let bad = NewOperation::create("tasks", payload(json!({"projectId": "p1"}))).unwrap();
        assert!(matches!(
            queue.enqueue(bad).unwrap_err(),
            SyncqError::SchemaMismatch { .. }
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_storage_failure_keeps_operation_in_memory() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);
        queue.enqueue(task("A")).unwrap();

        store.fail_writes(true);
        let err = queue.enqueue(task("B")).unwrap_err();
        assert!(matches!(err, SyncqError::StorageUnavailable(_)));
        assert_eq!(queue.len(), 2);
        assert!(queue.degraded());
        assert_eq!(store.persisted().len(), 1);

        store.fail_writes(false);
        queue.enqueue(task("C")).unwrap();
        assert!(!queue.degraded());
        assert_eq!(store.persisted().len(), 3);
    }

    #[test]
    fn test_open_with_unavailable_storage_is_degraded() {
        let store = MemoryQueueStore::new();
        store.fail_writes(true);

        let queue = open(&store);
        assert!(queue.degraded());
        assert!(queue.is_empty());
    }

    fn titles(ops: &[QueuedOperation]) -> Vec<Value> {
        ops.iter().map(|op| op.payload["title"].clone()).collect()
    }

    #[test]
    fn test_unread_store_is_never_overwritten() {
        let store = MemoryQueueStore::new();
        {
            let queue = open(&store);
            queue.enqueue(task("A")).unwrap();
            queue.enqueue(task("B")).unwrap();
        }

        store.fail_writes(true);
        let queue = open(&store);
        assert!(queue.degraded());
        assert!(matches!(
            queue.enqueue(task("C")).unwrap_err(),
            SyncqError::StorageUnavailable(_)
        ));

        store.fail_writes(false);
        queue.enqueue(task("D")).unwrap();

        assert!(!queue.degraded());
        assert_eq!(titles(&queue.snapshot()), vec![json!("A"), json!("B"), json!("C"), json!("D")]);
        assert_eq!(titles(&store.persisted()), vec![json!("A"), json!("B"), json!("C"), json!("D")]);

        let ids: Vec<_> = queue.snapshot().iter().map(|op| op.id).collect();
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_failed_remove_is_retried() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);
        queue.enqueue(task("A")).unwrap();
        queue.enqueue(task("B")).unwrap();

        store.fail_writes(true);
        assert!(queue.remove_front().is_err());
        assert_eq!(store.persisted().len(), 2);

        store.fail_writes(false);
        queue.enqueue(task("C")).unwrap();
        assert_eq!(titles(&store.persisted()), vec![json!("B"), json!("C")]);
    }

    #[test]
    fn test_queues_sharing_a_database_keep_each_others_writes() {
        use crate::sync::store::SqliteQueueStore;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("syncq.db");
        let open_db = || {
            MutationQueue::open(
                Box::new(SqliteQueueStore::open_at(&path).unwrap()),
                SchemaRegistry::with_defaults(),
            )
            .unwrap()
        };

        {
            let seed = open_db();
            seed.enqueue(task("A")).unwrap();
            seed.enqueue(task("B")).unwrap();
        }

        let runner = open_db();
        let adder = open_db();
        let c = adder.enqueue(task("C")).unwrap();
        assert_eq!(c.id, 3);

        runner.remove_front().unwrap();

        assert_eq!(titles(&open_db().snapshot()), vec![json!("B"), json!("C")]);
    }

    #[test]
    fn test_remove_if_queued_ignores_missing_ids() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);
        let a = queue.enqueue(task("A")).unwrap();
        let b = queue.enqueue(task("B")).unwrap();

        assert_eq!(queue.remove_if_queued(b.id).unwrap().unwrap().id, b.id);
        assert!(queue.remove_if_queued(b.id).unwrap().is_none());
        assert_eq!(queue.peek_front().unwrap().id, a.id);
        assert_eq!(store.persisted().len(), 1);
    }

    #[test]
    fn test_record_attempt_only_touches_front() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);
        let a = queue.enqueue(task("A")).unwrap();
        let b = queue.enqueue(task("B")).unwrap();

        assert_eq!(queue.record_attempt(a.id, "timeout").unwrap(), 1);
        assert_eq!(queue.record_attempt(a.id, "reset").unwrap(), 2);
        assert!(matches!(
            queue.record_attempt(b.id, "nope").unwrap_err(),
            SyncqError::NotFound(_)
        ));

        let persisted = store.persisted();
        assert_eq!(persisted[0].attempts, 2);
        assert_eq!(persisted[0].last_error.as_deref(), Some("reset"));
        assert_eq!(persisted[1].attempts, 0);
    }

    #[test]
    fn test_clear() {
        let store = MemoryQueueStore::new();
        let queue = open(&store);
        queue.enqueue(task("A")).unwrap();
        queue.enqueue(task("B")).unwrap();

        assert_eq!(queue.clear().unwrap(), 2);
        assert!(queue.is_empty());
        assert!(store.persisted().is_empty());
    }
}
