//! Offline write queue.
//!
//! Writes made while the backend is unreachable are captured as operations,
//! persisted, and replayed in order once connectivity returns.

mod dispatcher;
mod monitor;
mod operation;
mod queue;
mod report;
mod store;

pub use dispatcher::{
    DispatchEvent, Dispatcher, DispatcherConfig, DispatcherState, DrainSummary,
};
pub use monitor::{Connectivity, ConnectivityMonitor};
pub use operation::{NewOperation, OperationKind, QueuedOperation, Target};
pub use queue::MutationQueue;
pub use report::{FailureLog, FailureReport};
pub use store::{MemoryQueueStore, QueueStore, SqliteQueueStore};
