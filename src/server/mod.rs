//! WebSocket server for producers, viewers and robot control links

pub mod config;
pub mod listener;
pub mod route;
mod session;

pub use config::ServerConfig;
pub use listener::HubServer;
pub use route::Route;
