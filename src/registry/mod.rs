//! Channel registry and broadcast engine
//!
//! The registry maps each channel to the viewers watching it and caches the
//! latest payload per channel. Broadcasting fans a payload out to every
//! viewer concurrently, then prunes and evicts the ones that fail.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<ChannelRegistry>
//!                     ┌──────────────────────────┐
//!                     │ subscribers: HashMap<Key,│
//!                     │   {ViewerId -> Weak}>    │
//!                     │ latest: HashMap<Key,     │
//!                     │   Payload>               │
//!                     └───────────┬──────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Producer]              [Viewer]                [Viewer]
//!    ingest()                deliver()               deliver()
//!         │                       │                       │
//!         └──► registry.broadcast()──► mpsc ──► WebSocket writer
//! ```
//!
//! # Zero-Copy Design
//!
//! A payload is encoded once per broadcast. Image data is `bytes::Bytes`, so
//! every viewer shares the same allocation.

pub mod broadcast;
pub mod config;
pub mod entry;
pub mod frame;
pub mod store;
pub mod viewer;

pub use broadcast::BroadcastReport;
pub use config::RegistryConfig;
pub use entry::ChannelStats;
pub use frame::OutboundFrame;
pub use store::ChannelRegistry;
pub use viewer::{ChannelViewer, Viewer, ViewerId};
