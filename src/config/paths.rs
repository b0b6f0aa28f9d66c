//! Path resolution for syncq configuration and data files.
//!
//! All syncq data is stored in `~/.syncq/`:
//! - `config.yaml` - Main configuration file
//! - `syncq.db` - SQLite database holding pending and failed operations

use std::path::PathBuf;

use crate::error::SyncqError;

/// Paths to syncq configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.syncq/`
    pub root: PathBuf,
    /// Config file: `~/.syncq/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.syncq/syncq.db`
    pub database: PathBuf,
}

impl Paths {
    /// Create paths based on the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, SyncqError> {
        let home = std::env::var("HOME")
            .map_err(|_| SyncqError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".syncq")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("syncq.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), SyncqError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                SyncqError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_with_root() {
        let root = PathBuf::from("/tmp/test-syncq");
        let paths = Paths::with_root(root.clone());

        assert_eq!(paths.root, root);
        assert_eq!(paths.config_file, root.join("config.yaml"));
        assert_eq!(paths.database, root.join("syncq.db"));
    }

    #[test]
    fn test_ensure_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_root(temp_dir.path().join("nested").join(".syncq"));

        paths.ensure_dirs().unwrap();

        assert!(paths.root.exists());
    }
}
