//! Object detection on camera frames

pub mod client;
pub mod config;
pub mod worker;

pub use client::{HttpInferenceClient, InferenceClient};
pub use config::InferenceConfig;
pub use worker::InferenceWorker;
