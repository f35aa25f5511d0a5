//! Persistence configuration

use std::path::PathBuf;

/// History storage options
#[derive(Debug, Clone, Default)]
pub struct PersistenceConfig {
    /// SQLite database file. Telemetry is not persisted without one
    /// (unless a store is supplied to the hub builder).
    pub database: Option<PathBuf>,
}

impl PersistenceConfig {
    /// Set the database path (`:memory:` for an in-memory database)
    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }
}
