//! Configuration for VimanaIO
//!
//! Loads configuration from a TOML file. Every field has a default, so a
//! partial file only overrides what it names.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub safety: SafetyThresholds,
    #[serde(default)]
    pub commander: CommanderConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// UDP addresses and per-call receive timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Drone address (the drone's own access point hands out 192.168.10.x)
    #[serde(default = "default_drone_ip")]
    pub drone_ip: IpAddr,

    /// Local interface for the telemetry and video listeners
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Drone command port (request/response)
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Local telemetry broadcast port (0 = ephemeral, for tests)
    #[serde(default = "default_state_port")]
    pub state_port: u16,

    /// Local video broadcast port (0 = ephemeral, for tests)
    #[serde(default = "default_video_port")]
    pub video_port: u16,

    /// Reply timeout on the command socket
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Receive timeout on the telemetry and video listeners
    #[serde(default = "default_listener_timeout_ms")]
    pub listener_timeout_ms: u64,
}

/// Command rate limiter settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Minimum spacing between two transmissions
    #[serde(default = "default_rate_interval_ms")]
    pub rate_interval_ms: u64,

    /// Maximum number of commands waiting for transmission
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

/// Telemetry stream buffering
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Snapshot stream capacity (oldest dropped when full)
    #[serde(default = "default_telemetry_buffer")]
    pub buffer: usize,

    /// Error stream capacity
    #[serde(default = "default_error_buffer")]
    pub error_buffer: usize,
}

/// Safety supervisor thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SafetyThresholds {
    /// Land when battery percentage is at or below this value
    #[serde(default = "default_battery_low")]
    pub battery_low_percent: i32,

    /// Land when height drops below this value (cm)
    #[serde(default = "default_min_altitude")]
    pub min_altitude_cm: i32,

    /// Land when height exceeds this value (cm)
    #[serde(default = "default_max_altitude")]
    pub max_altitude_cm: i32,

    /// Interval between keep-alive commands
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// Land when no telemetry arrived for longer than this
    #[serde(default = "default_telemetry_timeout_ms")]
    pub telemetry_timeout_ms: u64,

    /// Poll period of the silence watchdog
    #[serde(default = "default_silence_poll_ms")]
    pub silence_poll_ms: u64,
}

/// Commander behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommanderConfig {
    /// Action operations wait for the drone's reply instead of enqueueing
    #[serde(default)]
    pub blocking: bool,

    /// Smallest accepted `curve` arc radius (cm)
    #[serde(default = "default_arc_radius_min")]
    pub arc_radius_min_cm: f64,

    /// Largest accepted `curve` arc radius (cm)
    #[serde(default = "default_arc_radius_max")]
    pub arc_radius_max_cm: f64,
}

/// Raw video forwarding
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Start the video listener and forward fragments to `output`
    #[serde(default)]
    pub enabled: bool,

    /// File receiving the raw H.264 byte stream
    #[serde(default = "default_video_output")]
    pub output: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_drone_ip() -> IpAddr {
    IpAddr::from([192, 168, 10, 1])
}

fn default_bind_ip() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_command_port() -> u16 {
    8889
}

fn default_state_port() -> u16 {
    8890
}

fn default_video_port() -> u16 {
    11111
}

fn default_command_timeout_ms() -> u64 {
    7000
}

fn default_listener_timeout_ms() -> u64 {
    5000
}

fn default_rate_interval_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    32
}

fn default_telemetry_buffer() -> usize {
    32
}

fn default_error_buffer() -> usize {
    4
}

fn default_battery_low() -> i32 {
    20
}

fn default_min_altitude() -> i32 {
    0
}

fn default_max_altitude() -> i32 {
    100
}

fn default_keep_alive_ms() -> u64 {
    5000
}

fn default_telemetry_timeout_ms() -> u64 {
    10_000
}

fn default_silence_poll_ms() -> u64 {
    500
}

fn default_arc_radius_min() -> f64 {
    50.0
}

fn default_arc_radius_max() -> f64 {
    1000.0
}

fn default_video_output() -> String {
    "video.h264".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            drone_ip: default_drone_ip(),
            bind_ip: default_bind_ip(),
            command_port: default_command_port(),
            state_port: default_state_port(),
            video_port: default_video_port(),
            command_timeout_ms: default_command_timeout_ms(),
            listener_timeout_ms: default_listener_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    /// Drone command endpoint
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.drone_ip, self.command_port)
    }

    /// Local telemetry listener address
    pub fn state_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.state_port)
    }

    /// Local video listener address
    pub fn video_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.video_port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rate_interval_ms: default_rate_interval_ms(),
            capacity: default_queue_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer: default_telemetry_buffer(),
            error_buffer: default_error_buffer(),
        }
    }
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            battery_low_percent: default_battery_low(),
            min_altitude_cm: default_min_altitude(),
            max_altitude_cm: default_max_altitude(),
            keep_alive_ms: default_keep_alive_ms(),
            telemetry_timeout_ms: default_telemetry_timeout_ms(),
            silence_poll_ms: default_silence_poll_ms(),
        }
    }
}

impl SafetyThresholds {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    pub fn silence_poll(&self) -> Duration {
        Duration::from_millis(self.silence_poll_ms)
    }
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            blocking: false,
            arc_radius_min_cm: default_arc_radius_min(),
            arc_radius_max_cm: default_arc_radius_max(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output: default_video_output(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use vimana_io::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("vimana.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
