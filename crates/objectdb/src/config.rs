//! Configuration surface for opening a database. There is no CLI or
//! environment-variable surface — callers construct this programmatically.

use std::path::PathBuf;
use std::time::Duration;

/// Where the backing SQLite file lives.
#[derive(Debug, Clone)]
pub enum StorePath {
    /// A file on disk at the given path.
    File(PathBuf),
    /// An in-process, shared-cache SQLite database that disappears once the
    /// owning [`crate::Database`] is dropped. Useful for tests.
    Memory,
}

#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub path: StorePath,
    /// Create the file (and run schema migration) if it does not already
    /// exist. Ignored for [`StorePath::Memory`], which is always created.
    pub create_if_missing: bool,
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            path: StorePath::Memory,
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl OpenOptions {
    pub fn file(path: impl Into<PathBuf>) -> OpenOptions {
        OpenOptions {
            path: StorePath::File(path.into()),
            ..OpenOptions::default()
        }
    }

    pub fn memory() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn create_if_missing(mut self, create: bool) -> OpenOptions {
        self.create_if_missing = create;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> OpenOptions {
        self.busy_timeout = timeout;
        self
    }
}
