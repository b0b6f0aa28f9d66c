//! Command implementations for syncq.

mod queue;
mod run;

pub use queue::{add, clear, failed, list, status};
pub use run::run;

use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::args::Cli;
use crate::config::Paths;
use crate::error::SyncqError;
use crate::schema::SchemaRegistry;
use crate::sync::{FailureLog, MutationQueue, SqliteQueueStore};

/// Generate a completion script for `shell`.
#[must_use]
pub fn completions(shell: Shell) -> String {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, "syncq", &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Open the durable queue under `paths`.
///
/// Unlike a long-running host, a one-shot command refuses to run without
/// storage: anything it queued would vanish when the process exits.
fn open_queue(paths: &Paths) -> Result<MutationQueue, SyncqError> {
    MutationQueue::open(Box::new(open_store(paths)?), SchemaRegistry::with_defaults())
}

fn open_store(paths: &Paths) -> Result<SqliteQueueStore, SyncqError> {
    paths.ensure_dirs()?;
    SqliteQueueStore::open_at(&paths.database)
}

fn open_failure_log(paths: &Paths) -> Result<FailureLog, SyncqError> {
    paths.ensure_dirs()?;
    FailureLog::open_at(&paths.database)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_mention_binary() {
        let script = completions(Shell::Bash);
        assert!(script.contains("syncq"));
    }
}
