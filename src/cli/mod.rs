//! Command-line interface for syncq.

pub mod args;
pub mod commands;
