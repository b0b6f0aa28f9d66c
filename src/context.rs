//! Application context.
//!
//! Owns the queue, monitor and dispatcher for the lifetime of a session and
//! is the one entry point writers go through. Lifecycle:
//!
//! 1. [`AppContext::init`] loads the persisted queue
//! 2. [`AppContext::start`] spawns the background drain loop
//! 3. [`AppContext::shutdown`] stops it

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::{Config, Paths, SessionConfig};
use crate::error::SyncqError;
use crate::schema::SchemaRegistry;
use crate::sync::{
    Connectivity, ConnectivityMonitor, Dispatcher, DispatcherConfig, DrainSummary, FailureLog,
    MemoryQueueStore, MutationQueue, NewOperation, OperationKind, QueueStore, QueuedOperation,
    SqliteQueueStore,
};

/// Who is writing. Stamped onto every create and update.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user_id: Option<String>,
    pub company: Option<String>,
}

impl From<&SessionConfig> for Session {
    fn from(config: &SessionConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            company: config.company.clone(),
        }
    }
}

impl Session {
    /// Add ownership and timestamp fields.
    ///
    /// Creates get `company`, `createdBy`, `createdAt` and `updatedAt` unless
    /// the payload already has them. Updates always get a fresh `updatedAt`.
    pub fn stamp(&self, op: &mut NewOperation) {
        let now = Value::String(Utc::now().to_rfc3339());
        match op.kind {
            OperationKind::Create => {
                let payload = &mut op.payload;
                if let Some(company) = &self.company {
                    payload
                        .entry("company")
                        .or_insert_with(|| Value::String(company.clone()));
                }
                if let Some(user) = &self.user_id {
                    payload
                        .entry("createdBy")
                        .or_insert_with(|| Value::String(user.clone()));
                }
                payload.entry("createdAt").or_insert_with(|| now.clone());
                payload.entry("updatedAt").or_insert(now);
            }
            OperationKind::Update => {
                op.payload.insert("updatedAt".to_string(), now);
            }
            OperationKind::Delete => {}
        }
    }
}

/// Storage and backend the context is built from.
pub struct Components {
    pub store: Box<dyn QueueStore>,
    pub failures: FailureLog,
    pub backend: Arc<dyn Backend>,
    pub schemas: SchemaRegistry,
    pub initial: Connectivity,
}

impl Components {
    /// Durable storage under `paths`.
    ///
    /// Falls back to memory for the session if the database cannot be opened.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if even the in-memory fallback fails.
    pub fn on_disk(
        paths: &Paths,
        backend: Arc<dyn Backend>,
        initial: Connectivity,
    ) -> Result<Self, SyncqError> {
        if let Err(e) = paths.ensure_dirs() {
            tracing::warn!(error = %e, "could not create data directory");
        }

        let store: Box<dyn QueueStore> = match SqliteQueueStore::open_at(&paths.database) {
            Ok(store) => Box::new(store),
            Err(e) => {
                tracing::warn!(error = %e, "queue storage unavailable, queue will not survive restart");
                Box::new(FailingStore)
            }
        };
        let failures = match FailureLog::open_at(&paths.database) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(error = %e, "failure log unavailable, reports kept for this session");
                FailureLog::in_memory()?
            }
        };

        Ok(Self {
            store,
            failures,
            backend,
            schemas: SchemaRegistry::with_defaults(),
            initial,
        })
    }

    /// Session-only storage.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the in-memory failure log cannot be opened.
    pub fn in_memory(backend: Arc<dyn Backend>, initial: Connectivity) -> Result<Self, SyncqError> {
        Ok(Self {
            store: Box::new(MemoryQueueStore::new()),
            failures: FailureLog::in_memory()?,
            backend,
            schemas: SchemaRegistry::with_defaults(),
            initial,
        })
    }
}

/// Store used when the database could not be opened at all.
///
/// Every call fails, which leaves the queue in degraded mode.
struct FailingStore;

fn not_open<T>() -> Result<T, SyncqError> {
    Err(SyncqError::StorageUnavailable("database not open".to_string()))
}

impl QueueStore for FailingStore {
    fn load_all(&self) -> Result<Vec<QueuedOperation>, SyncqError> {
        not_open()
    }

    fn append(&mut self, _operation: &QueuedOperation) -> Result<u64, SyncqError> {
        not_open()
    }

    fn update(&mut self, _id: u64, _operation: &QueuedOperation) -> Result<(), SyncqError> {
        not_open()
    }

    fn remove(&mut self, _id: u64) -> Result<(), SyncqError> {
        not_open()
    }
}

/// The running queue and its collaborators.
pub struct AppContext {
    session: Session,
    queue: Arc<MutationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    failures: Arc<FailureLog>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Load the persisted queue and wire up the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the persisted queue is corrupt.
    pub fn init(config: &Config, components: Components) -> Result<Self, SyncqError> {
        let Components {
            store,
            failures,
            backend,
            schemas,
            initial,
        } = components;

        let queue = Arc::new(MutationQueue::open(store, schemas)?);
        let monitor = Arc::new(ConnectivityMonitor::new(initial));
        let failures = Arc::new(failures);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            backend,
            Arc::clone(&monitor),
            Arc::clone(&failures),
            DispatcherConfig::from(&config.queue),
        ));

        tracing::debug!(pending = queue.len(), connectivity = %initial, "context initialized");

        Ok(Self {
            session: Session::from(&config.session),
            queue,
            monitor,
            failures,
            dispatcher,
            shutdown: CancellationToken::new(),
            worker: None,
        })
    }

    /// Spawn the background drain loop. Calling it twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        let token = self.shutdown.clone();
        self.worker = Some(tokio::spawn(async move { dispatcher.run(token).await }));
    }

    /// Queue a write.
    ///
    /// Every write goes through the queue, online or not; when online the
    /// dispatcher is woken immediately.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch`: the write was refused and not queued
    /// - `StorageUnavailable`: the write is queued for this session only
    pub fn write(&self, mut operation: NewOperation) -> Result<QueuedOperation, SyncqError> {
        self.session.stamp(&mut operation);
        let result = self.queue.enqueue(operation);
        if matches!(result, Ok(_) | Err(SyncqError::StorageUnavailable(_))) {
            self.dispatcher.notify();
        }
        result
    }

    /// Drain once in the caller's task.
    pub async fn drain_now(&self) -> DrainSummary {
        self.dispatcher.drain().await
    }

    /// Stop the drain loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "dispatcher task failed");
            }
        }
        tracing::debug!(pending = self.queue.len(), "context shut down");
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    #[must_use]
    pub const fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    #[must_use]
    pub const fn failures(&self) -> &Arc<FailureLog> {
        &self.failures
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
