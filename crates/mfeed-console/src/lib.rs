//! mfeed console.
//!
//! Runs one live feed per configured topic and serves their status:
//! - WebSocket stream with heartbeat and reconnect backoff
//! - HTTP polling fallback while a stream is unhealthy
//! - Status, snapshot and Prometheus endpoints

pub mod app;
pub mod config;
pub mod error;
pub mod status;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
