//! Replays queued operations against the backend.
//!
//! The dispatcher drains the queue strictly front to back, one operation at
//! a time, and only while the connectivity monitor reports online:
//!
//! - success removes the operation and moves on
//! - a transient failure leaves it at the front and stops the drain
//! - a permanent failure removes it, records a [`FailureReport`] and moves on
//!
//! An operation that keeps failing transiently is treated as permanently
//! failed once it has used up `max_attempts`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::monitor::ConnectivityMonitor;
use super::operation::{OperationKind, QueuedOperation};
use super::queue::MutationQueue;
use super::report::{FailureLog, FailureReport};
use crate::backend::{Backend, BackendError};
use crate::config::QueueConfig;
use crate::error::SyncqError;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Transient failures tolerated per operation before it is reported lost
    pub max_attempts: u32,
    /// Stop the drain at the first permanent failure
    pub stop_on_permanent: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stop_on_permanent: false,
        }
    }
}

impl From<&QueueConfig> for DispatcherConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            stop_on_permanent: config.stop_on_permanent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherState {
    Idle,
    Draining,
}

/// Progress notifications emitted while draining.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// The backend applied the operation.
    Delivered {
        operation: QueuedOperation,
        /// Backend-assigned id, for creates
        document_id: Option<String>,
    },
    /// A transient failure; the operation stays at the front.
    Deferred {
        operation: QueuedOperation,
        error: String,
    },
    /// The operation was dropped and reported.
    Failed(FailureReport),
    /// A drain finished.
    Idle { remaining: usize },
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainSummary {
    /// Whether a drain actually ran (false when offline or already draining)
    pub ran: bool,
    pub delivered: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Operations still queued when the drain stopped
    pub remaining: usize,
    /// Reports for the operations dropped during this drain
    pub failures: Vec<FailureReport>,
}

type EventHandler = Box<dyn Fn(&DispatchEvent) + Send + Sync>;

/// Clears the draining flag when a drain ends, even if it was cancelled.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the mutation queue into the backend.
pub struct Dispatcher {
    queue: Arc<MutationQueue>,
    backend: Arc<dyn Backend>,
    monitor: Arc<ConnectivityMonitor>,
    failures: Arc<FailureLog>,
    config: DispatcherConfig,
    draining: AtomicBool,
    wake: Notify,
    handlers: RwLock<Vec<EventHandler>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        queue: Arc<MutationQueue>,
        backend: Arc<dyn Backend>,
        monitor: Arc<ConnectivityMonitor>,
        failures: Arc<FailureLog>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            backend,
            monitor,
            failures,
            config,
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            handlers: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        if self.draining.load(Ordering::Acquire) {
            DispatcherState::Draining
        } else {
            DispatcherState::Idle
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register a handler for dispatch events.
    ///
    /// Handlers are called synchronously from the draining task, in
    /// registration order.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    /// Ask the run loop to drain. Wakeups are not lost if it is busy.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Drain on every wakeup until `shutdown` is cancelled.
    ///
    /// Wakes on [`notify`](Self::notify) and on every connectivity edge.
    /// Shutdown is only observed between operations, so a request already
    /// sent is always allowed to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut connectivity = self.monitor.subscribe();
        tracing::debug!("dispatcher started");

        loop {
            if self.monitor.is_online() && !self.queue.is_empty() {
                self.drain_until(Some(&shutdown)).await;
            }
            if shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = connectivity.borrow_and_update().is_online();
                    let pending = self.queue.len();
                    if online && pending > 0 {
                        tracing::info!(pending, "syncing {pending} queued operations");
                    }
                }
            }
        }

        tracing::debug!("dispatcher stopped");
    }

    /// Drain the queue once.
    ///
    /// Returns immediately with `ran == false` if offline or if another
    /// drain is in progress.
    pub async fn drain(&self) -> DrainSummary {
        self.drain_until(None).await
    }

    async fn drain_until(&self, shutdown: Option<&CancellationToken>) -> DrainSummary {
        let mut summary = DrainSummary::default();

        if !self.monitor.is_online() {
            summary.remaining = self.queue.len();
            return summary;
        }
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("drain already in progress");
            summary.remaining = self.queue.len();
            return summary;
        };

        summary.ran = true;
        tracing::debug!(pending = self.queue.len(), "drain started");

        while self.monitor.is_online() && !shutdown.is_some_and(CancellationToken::is_cancelled) {
            let Some(op) = self.queue.peek_front() else {
                break;
            };

            let keep_going = match self.apply(&op).await {
                Ok(document_id) => {
                    self.delivered(op, document_id, &mut summary);
                    true
                }
                Err(SyncqError::TransientDispatchFailure(error)) => {
                    self.deferred(op, error, &mut summary)
                }
                Err(SyncqError::PermanentDispatchFailure { reason, .. }) => {
                    self.fail(op, reason, &mut summary);
                    !self.config.stop_on_permanent
                }
                Err(e) => {
                    tracing::error!(error = %e, "unexpected dispatch error");
                    false
                }
            };
            if !keep_going {
                break;
            }
        }

        summary.remaining = self.queue.len();
        tracing::info!(
            delivered = summary.delivered,
            failed = summary.failed,
            remaining = summary.remaining,
            "drain finished"
        );
        self.emit(&DispatchEvent::Idle {
            remaining: summary.remaining,
        });
        summary
    }

    /// Send one operation to the backend.
    ///
    /// Returns the backend-assigned id for creates.
    ///
    /// # Errors
    ///
    /// `TransientDispatchFailure` if the call may succeed later,
    /// `PermanentDispatchFailure` if it never will.
    pub async fn apply(&self, op: &QueuedOperation) -> Result<Option<String>, SyncqError> {
        let collection = op.target.collection.as_str();
        let result = match (op.kind, op.target.document_id.as_deref()) {
            (OperationKind::Create, _) => self
                .backend
                .create(collection, &op.payload)
                .await,
            (OperationKind::Update, Some(id)) => self
                .backend
                .update(collection, id, &op.payload)
                .await
                .map(|()| None),
            (OperationKind::Delete, Some(id)) => {
                self.backend.delete(collection, id).await.map(|()| None)
            }
            (kind, None) => Err(BackendError::Permanent(format!(
                "{kind} without a document id"
            ))),
        };

        result.map_err(|e| match e {
            BackendError::Transient(msg) => SyncqError::TransientDispatchFailure(msg),
            BackendError::Permanent(reason) => SyncqError::PermanentDispatchFailure {
                operation_id: op.id,
                reason,
            },
        })
    }

    fn delivered(&self, op: QueuedOperation, document_id: Option<String>, summary: &mut DrainSummary) {
        if let Err(e) = self.queue.remove_if_queued(op.id) {
            // Still removed from memory; a restart may replay it.
            tracing::warn!(error = %e, op = %op.label(), "delivered but not removed from storage");
        }
        tracing::debug!(id = op.id, op = %op.label(), "delivered");

        summary.delivered += 1;
        self.emit(&DispatchEvent::Delivered {
            operation: op,
            document_id,
        });
    }

    /// Returns whether the drain should continue.
    fn deferred(&self, mut op: QueuedOperation, error: String, summary: &mut DrainSummary) -> bool {
        let attempts = match self.queue.record_attempt(op.id, &error) {
            Ok(attempts) => attempts,
            // Front moved on while the call was in flight.
            Err(SyncqError::NotFound(_)) => return true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist attempt count");
                op.attempts + 1
            }
        };
        op.attempts = attempts;
        op.last_error = Some(error.clone());

        if attempts >= self.config.max_attempts {
            let reason = format!("retry limit exceeded after {attempts} attempts: {error}");
            self.fail(op, reason, summary);
            return !self.config.stop_on_permanent;
        }

        tracing::warn!(
            id = op.id,
            op = %op.label(),
            attempts,
            %error,
            "delivery deferred"
        );
        summary.deferred += 1;
        self.emit(&DispatchEvent::Deferred {
            operation: op,
            error,
        });
        false
    }

    fn fail(&self, op: QueuedOperation, reason: String, summary: &mut DrainSummary) {
        if let Err(e) = self.queue.remove_if_queued(op.id) {
            tracing::warn!(error = %e, op = %op.label(), "dropped but not removed from storage");
        }

        let report = FailureReport::new(op, reason);
        tracing::warn!(
            id = report.operation.id,
            op = %report.operation.label(),
            reason = %report.reason,
            "operation rejected, dropped from queue"
        );
        if let Err(e) = self.failures.record(&report) {
            // Last resort: the payload goes to the log so it is not lost silently.
            let payload = serde_json::Value::Object(report.operation.payload.clone());
            tracing::error!(
                error = %e,
                op = %report.operation.label(),
                %payload,
                "failed to record failure report"
            );
        }

        summary.failed += 1;
        summary.failures.push(report.clone());
        self.emit(&DispatchEvent::Failed(report));
    }

    fn emit(&self, event: &DispatchEvent) {
        for handler in self.handlers.read().iter() {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, InMemoryBackend, MockBackend};
    use crate::schema::SchemaRegistry;
    use crate::sync::monitor::Connectivity;
    use crate::sync::operation::NewOperation;
    use crate::sync::store::MemoryQueueStore;
    use parking_lot::Mutex;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn task(title: &str) -> NewOperation {
        NewOperation::create("tasks", payload(json!({"title": title, "projectId": "p1"}))).unwrap()
    }

    struct Harness {
        store: MemoryQueueStore,
        queue: Arc<MutationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        failures: Arc<FailureLog>,
        backend: Arc<InMemoryBackend>,
        dispatcher: Arc<Dispatcher>,
    }

    fn harness_with(backend: InMemoryBackend, config: DispatcherConfig) -> Harness {
        let store = MemoryQueueStore::new();
        let queue = Arc::new(
            MutationQueue::open(Box::new(store.clone()), SchemaRegistry::with_defaults()).unwrap(),
        );
        let monitor = Arc::new(ConnectivityMonitor::new(Connectivity::Online));
        let failures = Arc::new(FailureLog::in_memory().unwrap());
        let backend = Arc::new(backend);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&monitor),
            Arc::clone(&failures),
            config,
        ));
        Harness {
            store,
            queue,
            monitor,
            failures,
            backend,
            dispatcher,
        }
    }

    fn harness() -> Harness {
        harness_with(InMemoryBackend::new(), DispatcherConfig::default())
    }

    fn persisted_titles(store: &MemoryQueueStore) -> Vec<Value> {
        store
            .persisted()
            .into_iter()
            .map(|op| op.payload["title"].clone())
            .collect()
    }

    fn created_titles(backend: &InMemoryBackend) -> Vec<Value> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Create { payload, .. } => payload.get("title").cloned(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_offline_drain_does_nothing() {
        let h = harness();
        h.monitor.set_offline();
        h.queue.enqueue(task("A")).unwrap();

        let summary = h.dispatcher.drain().await;
        assert!(!summary.ran);
        assert_eq!(summary.remaining, 1);
        assert_eq!(h.backend.attempts(), 0);
    }

    #[tokio::test]
    async fn test_drains_in_fifo_order_after_reconnect() {
        let h = harness();
        h.monitor.set_offline();
        for title in ["A", "B", "C"] {
            h.queue.enqueue(task(title)).unwrap();
        }

        h.monitor.set_online();
        let summary = h.dispatcher.drain().await;

        assert!(summary.ran);
        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.remaining, 0);
        assert_eq!(created_titles(&h.backend), vec![json!("A"), json!("B"), json!("C")]);
        assert!(h.queue.is_empty());
        assert_eq!(h.dispatcher.state(), DispatcherState::Idle);
    }

    #[tokio::test]
    async fn test_connectivity_lost_mid_drain() {
        let h = harness();
        for title in ["A", "B", "C", "D", "E"] {
            h.queue.enqueue(task(title)).unwrap();
        }

        let monitor = Arc::clone(&h.monitor);
        let delivered = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&delivered);
        h.dispatcher.on_event(move |event| {
            if matches!(event, DispatchEvent::Delivered { .. }) {
                let mut count = counter.lock();
                *count += 1;
                if *count == 2 {
                    monitor.set_offline();
                }
            }
        });

        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.remaining, 3);
        assert_eq!(h.backend.calls().len(), 2);
        assert_eq!(h.queue.peek_front().unwrap().payload["title"], "C");
        assert_eq!(persisted_titles(&h.store), vec![json!("C"), json!("D"), json!("E")]);
    }

    #[tokio::test]
    async fn test_transient_failure_stops_drain_and_keeps_operation() {
        let h = harness();
        h.queue.enqueue(task("A")).unwrap();
        h.queue.enqueue(task("B")).unwrap();
        h.backend.go_offline();

        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.remaining, 2);
        assert_eq!(h.backend.attempts(), 1);

        let front = h.queue.peek_front().unwrap();
        assert_eq!(front.payload["title"], "A");
        assert_eq!(front.attempts, 1);
        assert_eq!(front.last_error.as_deref(), Some("backend unreachable"));

        h.backend.go_online();
        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.delivered, 2);
        assert_eq!(created_titles(&h.backend), vec![json!("A"), json!("B")]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_reported_and_drain_continues() {
        let h = harness();
        h.backend.reject_collection("expenses", "permission denied");

        h.queue.enqueue(task("A")).unwrap();
        h.queue
            .enqueue(
                NewOperation::create(
                    "expenses",
                    payload(json!({"category": "travel", "amount": 42.5, "date": "2026-03-01"})),
                )
                .unwrap(),
            )
            .unwrap();
        h.queue.enqueue(task("C")).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        h.dispatcher.on_event(move |event| sink.lock().push(event.clone()));

        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.remaining, 0);
        assert_eq!(created_titles(&h.backend), vec![json!("A"), json!("C")]);
        assert!(h.store.persisted().is_empty());

        let reports = h.failures.list(10).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].reason, "permission denied");
        assert_eq!(reports[0].operation.target.collection, "expenses");
        assert_eq!(reports[0].operation.payload["amount"], 42.5);

        let events = events.lock();
        assert!(matches!(events[1], DispatchEvent::Failed(_)));
        assert_eq!(events.last(), Some(&DispatchEvent::Idle { remaining: 0 }));
    }

    #[tokio::test]
    async fn test_stop_on_permanent() {
        let config = DispatcherConfig {
            stop_on_permanent: true,
            ..DispatcherConfig::default()
        };
        let h = harness_with(InMemoryBackend::new(), config);
        h.queue
            .enqueue(NewOperation::delete("tasks", "ghost").unwrap())
            .unwrap();
        h.queue.enqueue(task("B")).unwrap();

        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.remaining, 1);
        assert_eq!(persisted_titles(&h.store), vec![json!("B")]);
        assert_eq!(h.store.persisted()[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_leaves_other_rows_untouched() {
        let config = DispatcherConfig {
            stop_on_permanent: true,
            ..DispatcherConfig::default()
        };
        let h = harness_with(InMemoryBackend::new(), config);
        h.queue.enqueue(task("A")).unwrap();
        h.queue
            .enqueue(NewOperation::update("tasks", "ghost", payload(json!({"stage": "done"}))).unwrap())
            .unwrap();
        h.queue.enqueue(task("C")).unwrap();
        h.queue.enqueue(task("D")).unwrap();
        let before: Vec<_> = h.store.persisted()[2..].to_vec();

        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.persisted(), before);
        assert_eq!(h.store.persisted(), h.queue.snapshot());
    }

    #[tokio::test]
    async fn test_update_after_delete_produces_one_report() {
        let h = harness();
        h.backend
            .insert("tasks", "t1", payload(json!({"title": "Old", "projectId": "p1"})));

        h.queue
            .enqueue(NewOperation::delete("tasks", "t1").unwrap())
            .unwrap();
        h.queue
            .enqueue(NewOperation::update("tasks", "t1", payload(json!({"stage": "done"}))).unwrap())
            .unwrap();

        let summary = h.dispatcher.drain().await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
        assert!(h.queue.is_empty());

        let reports = h.failures.list(10).unwrap();
        assert_eq!(reports.len(), 1);
        let lost = &reports[0].operation;
        assert_eq!(lost.kind, OperationKind::Update);
        assert_eq!(lost.target.document_id.as_deref(), Some("t1"));
        assert_eq!(lost.payload["stage"], "done");
        assert!(reports[0].reason.contains("not found"));
    }

    #[tokio::test]
    async fn test_retry_limit_turns_transient_into_permanent() {
        let config = DispatcherConfig {
            max_attempts: 2,
            ..DispatcherConfig::default()
        };
        let h = harness_with(InMemoryBackend::new(), config);
        h.queue.enqueue(task("A")).unwrap();
        h.queue.enqueue(task("B")).unwrap();
        h.backend.go_offline();

        let first = h.dispatcher.drain().await;
        assert_eq!(first.deferred, 1);
        assert_eq!(first.failed, 0);

        let second = h.dispatcher.drain().await;
        assert_eq!(second.failed, 1);
        assert_eq!(second.deferred, 1);
        assert_eq!(second.remaining, 1);
        assert!(second.failures[0].reason.starts_with("retry limit exceeded after 2 attempts"));
        assert_eq!(second.failures[0].operation.attempts, 2);

        assert_eq!(h.queue.peek_front().unwrap().payload["title"], "B");
        assert_eq!(h.failures.count().unwrap(), 1);

        let persisted = h.store.persisted();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].payload["title"], "B");
        assert_eq!(persisted[0].attempts, 1);
        assert_eq!(persisted[0].last_error.as_deref(), Some("backend unreachable"));
    }

    #[tokio::test]
    async fn test_enqueue_during_drain_is_picked_up() {
        let backend = InMemoryBackend::new().with_latency(Duration::from_millis(30));
        let h = harness_with(backend, DispatcherConfig::default());
        h.queue.enqueue(task("A")).unwrap();
        h.queue.enqueue(task("B")).unwrap();

        let dispatcher = Arc::clone(&h.dispatcher);
        let drain = tokio::spawn(async move { dispatcher.drain().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.dispatcher.state(), DispatcherState::Draining);
        h.queue.enqueue(task("C")).unwrap();

        let summary = drain.await.unwrap();
        assert_eq!(summary.delivered, 3);
        assert_eq!(created_titles(&h.backend), vec![json!("A"), json!("B"), json!("C")]);
    }

    #[tokio::test]
    async fn test_only_one_drain_at_a_time() {
        let backend = InMemoryBackend::new().with_latency(Duration::from_millis(30));
        let h = harness_with(backend, DispatcherConfig::default());
        h.queue.enqueue(task("A")).unwrap();
        h.queue.enqueue(task("B")).unwrap();

        let dispatcher = Arc::clone(&h.dispatcher);
        let first = tokio::spawn(async move { dispatcher.drain().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = h.dispatcher.drain().await;
        assert!(!second.ran);

        let first = first.await.unwrap();
        assert_eq!(first.delivered, 2);
        assert_eq!(h.backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_run_loop_drains_on_reconnect() {
        let h = harness();
        h.monitor.set_offline();

        let shutdown = CancellationToken::new();
        let dispatcher = Arc::clone(&h.dispatcher);
        let token = shutdown.clone();
        let worker = tokio::spawn(async move { dispatcher.run(token).await });

        h.queue.enqueue(task("A")).unwrap();
        h.queue.enqueue(task("B")).unwrap();
        h.dispatcher.notify();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.backend.attempts(), 0);

        h.monitor.set_online();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !h.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(created_titles(&h.backend), vec![json!("A"), json!("B")]);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_drains_on_notify_while_online() {
        let h = harness();
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::clone(&h.dispatcher);
        let token = shutdown.clone();
        let worker = tokio::spawn(async move { dispatcher.run(token).await });

        h.queue.enqueue(task("A")).unwrap();
        h.dispatcher.notify();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !h.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        worker.await.unwrap();
        assert_eq!(h.backend.calls().len(), 1);
    }

    fn mock_dispatcher(backend: MockBackend) -> (Arc<MutationQueue>, Dispatcher) {
        let queue = Arc::new(
            MutationQueue::open(Box::new(MemoryQueueStore::new()), SchemaRegistry::empty()).unwrap(),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::new(backend),
            Arc::new(ConnectivityMonitor::new(Connectivity::Online)),
            Arc::new(FailureLog::in_memory().unwrap()),
            DispatcherConfig::default(),
        );
        (queue, dispatcher)
    }

    #[tokio::test]
    async fn test_delivered_event_carries_backend_id() {
        let mut backend = MockBackend::new();
        backend
            .expect_create()
            .withf(|collection, _| collection == "tasks")
            .times(1)
            .returning(|_, _| Ok(Some("srv-1".to_string())));

        let (queue, dispatcher) = mock_dispatcher(backend);
        queue.enqueue(task("A")).unwrap();

        let ids = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ids);
        dispatcher.on_event(move |event| {
            if let DispatchEvent::Delivered { document_id, .. } = event {
                sink.lock().push(document_id.clone());
            }
        });

        assert_eq!(dispatcher.drain().await.delivered, 1);
        assert_eq!(*ids.lock(), vec![Some("srv-1".to_string())]);
    }

    #[tokio::test]
    async fn test_create_without_returned_id_is_still_delivered() {
        let mut backend = MockBackend::new();
        backend.expect_create().times(1).returning(|_, _| Ok(None));

        let (queue, dispatcher) = mock_dispatcher(backend);
        queue.enqueue(task("A")).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        dispatcher.on_event(move |event| sink.lock().push(event.clone()));

        let summary = dispatcher.drain().await;
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 0);
        assert!(queue.is_empty());
        assert!(matches!(
            events.lock()[0],
            DispatchEvent::Delivered { document_id: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_makes_no_further_calls() {
        let mut backend = MockBackend::new();
        backend
            .expect_create()
            .times(1)
            .returning(|_, _| Err(BackendError::Transient("timeout".to_string())));
        backend.expect_update().never();

        let (queue, dispatcher) = mock_dispatcher(backend);
        queue.enqueue(task("A")).unwrap();
        queue
            .enqueue(NewOperation::update("tasks", "t1", payload(json!({"stage": "done"}))).unwrap())
            .unwrap();

        let summary = dispatcher.drain().await;
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.remaining, 2);
    }

    #[tokio::test]
    async fn test_apply_maps_backend_errors() {
        let mut backend = MockBackend::new();
        backend
            .expect_delete()
            .returning(|_, _| Err(BackendError::Permanent("forbidden".to_string())));

        let (queue, dispatcher) = mock_dispatcher(backend);
        let op = queue
            .enqueue(NewOperation::delete("tasks", "t1").unwrap())
            .unwrap();

        match dispatcher.apply(&op).await.unwrap_err() {
            SyncqError::PermanentDispatchFailure {
                operation_id,
                reason,
            } => {
                assert_eq!(operation_id, op.id);
                assert_eq!(reason, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
