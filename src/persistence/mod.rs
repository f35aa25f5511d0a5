//! Robot state history

pub mod config;
pub mod record;
pub mod store;
pub mod worker;

pub use config::PersistenceConfig;
pub use record::{HistoryFields, HistoryRecord, SkipReason};
pub use store::{HistoryStore, SqliteHistoryStore, StoredRow};
pub use worker::{PersistOutcome, PersistenceWorker};
