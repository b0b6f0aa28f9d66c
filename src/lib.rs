//! syncq - Offline-first write queue
//!
//! Captures document writes while the backend is unreachable, persists them
//! in `SQLite`, and replays them in order once connectivity returns. Writes
//! the backend rejects are reported together with their payload instead of
//! being dropped silently.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod output;
pub mod schema;
pub mod storage;
pub mod sync;

pub use backend::{Backend, BackendError, HttpBackend, InMemoryBackend};
pub use cli::args::{Cli, Commands, OutputFormat};
pub use context::{AppContext, Components, Session};
pub use error::SyncqError;
pub use sync::{Dispatcher, MutationQueue, NewOperation, OperationKind};
