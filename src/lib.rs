//! VimanaIO - control and telemetry engine for small UDP-controlled quadrotors
//!
//! The drone exposes three UDP streams: a command/response channel, a
//! telemetry broadcast and a raw H.264 video feed. This library serializes
//! and rate-limits commands, parses telemetry, forwards video and runs a
//! safety supervisor that lands the drone on its own when limits are
//! breached or telemetry goes silent.
//!
//! Entry point for applications is [`Session`].

pub mod cancel;
pub mod commander;
pub mod config;
pub mod error;
pub mod queue;
pub mod safety;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod video;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use commander::Commander;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use session::Session;
pub use telemetry::TelemetrySnapshot;
