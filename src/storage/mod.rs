//! Storage layer for syncq.
//!
//! This module provides SQLite-based persistence for:
//! - The durable queue of pending operations
//! - The failure log of permanently rejected operations

mod database;
mod migrations;

pub use database::Database;
