//! Producer ingest

pub mod adapter;

pub use adapter::{IngestAdapter, IngestReport, InboundMessage};
