use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};

use crate::sync::OperationKind;

#[derive(Parser)]
#[command(name = "syncq")]
#[command(about = "Offline-first write queue for a hosted document backend")]
#[command(long_about = "syncq - offline write queue

Captures document writes while the backend is unreachable, persists them,
and replays them in order once the connection comes back. Writes the
backend rejects are dropped from the queue and kept in a failure log
together with their payload.

QUICK START:
  syncq add create tasks --payload '{\"title\":\"Ship\",\"projectId\":\"p1\"}'
  syncq status                Show pending and failed counts
  syncq run                   Replay pending writes
  syncq failed                Show writes the backend rejected

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

Logs go to stderr. Set SYNCQ_LOG (e.g. SYNCQ_LOG=syncq=debug) to change
the log level.")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Defaults to `general.default_output` from the config file.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Path to the config file
    #[arg(long, global = true, env = "SYNCQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the queue database and default config
    ///
    /// Defaults to ~/.syncq
    #[arg(long, global = true, env = "SYNCQ_HOME")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

/// Kind of write, as typed on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue status
    ///
    /// Displays pending and failed counts, the age of the oldest pending
    /// write, and whether queue storage is degraded.
    #[command(alias = "s")]
    Status,

    /// List pending writes in replay order
    ///
    /// # Examples
    ///
    ///   syncq list
    ///   syncq list -n 5 -o json
    #[command(alias = "ls")]
    List {
        /// Maximum operations to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Queue a write
    ///
    /// The payload is validated against the collection schema before it is
    /// queued. Creates and updates are stamped with the session identity
    /// and timestamps from the config file.
    ///
    /// # Examples
    ///
    ///   syncq add create tasks --payload '{"title":"Ship","projectId":"p1"}'
    ///   syncq add update tasks --id t1 --payload '{"stage":"done"}'
    ///   syncq add delete tasks --id t1
    Add {
        /// Kind of write
        #[arg(value_enum)]
        kind: KindArg,

        /// Target collection
        collection: String,

        /// Target document id (update and delete only)
        #[arg(long, short = 'i')]
        id: Option<String>,

        /// Fields to write, as a JSON object
        #[arg(long, short = 'p')]
        payload: Option<String>,
    },

    /// Replay pending writes against the backend
    ///
    /// Probes the backend first and only drains if it answers. Stops at the
    /// first transient failure; writes the backend rejects are moved to
    /// the failure log.
    Run {
        /// Treat the backend as unreachable
        #[arg(long)]
        offline: bool,

        /// Replay against an in-process backend instead of the network
        #[arg(long)]
        loopback: bool,
    },

    /// List writes the backend rejected, newest first
    Failed {
        /// Maximum reports to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Clear pending writes or the failure log
    Clear {
        /// Clear the failure log instead of the pending queue
        #[arg(long)]
        failed: bool,

        /// Required; clearing cannot be undone
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    ///
    /// Example: syncq completions bash > ~/.bash_completion.d/syncq
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
