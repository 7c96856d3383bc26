//! VimanaIO - drone control daemon
//!
//! Connects to the drone, enters SDK mode, optionally records raw video and
//! logs battery/height once per second. The safety supervisor runs for the
//! whole session. Ctrl-C lands the drone and shuts down.

use std::env;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use vimana_io::config::AppConfig;
use vimana_io::{Error, Result, Session};

/// Status log period
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Config file read when no path is given on the command line
const DEFAULT_CONFIG: &str = "vimana.toml";

/// Config path named by `--config <path>`, `-c <path>` or a bare first argument
fn config_path(args: &[String]) -> Option<&str> {
    let flagged = args
        .windows(2)
        .find(|pair| pair[0] == "--config" || pair[0] == "-c")
        .map(|pair| pair[1].as_str());

    flagged.or_else(|| {
        args.first()
            .map(String::as_str)
            .filter(|arg| !arg.starts_with('-'))
    })
}

/// Resolve and load the config, returning it with a description of its source
///
/// An explicitly named file must exist. The implicit default falls back to
/// built-in settings when absent.
fn load_config(args: &[String]) -> Result<(AppConfig, String)> {
    match config_path(args) {
        Some(path) => Ok((AppConfig::from_file(path)?, path.to_string())),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok((
            AppConfig::from_file(DEFAULT_CONFIG)?,
            DEFAULT_CONFIG.to_string(),
        )),
        None => Ok((AppConfig::default(), "built-in defaults".to_string())),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (config, source) = load_config(&args)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("VimanaIO v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Config: {}", source);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Io(io::Error::other(format!("Error setting Ctrl-C handler: {}", e))))?;

    let session = Session::connect(&config)?;
    let commander = session.commander();

    commander.connect()?;
    log::info!("SDK mode entered");

    if config.video.enabled
        && let Err(e) = commander.stream_on()
    {
        log::error!("Failed to start video stream: {}", e);
    }

    let telemetry_errors = session.telemetry_errors();
    while running.load(Ordering::Relaxed) {
        thread::sleep(STATUS_INTERVAL);

        for error in telemetry_errors.try_iter() {
            log::debug!("Telemetry: {}", error);
        }

        match session.latest_telemetry() {
            Some(state) => log::info!(
                "Battery {}% | height {} cm | tof {} cm | yaw {}°",
                state.bat,
                state.h,
                state.tof,
                state.yaw
            ),
            None => log::info!("Waiting for telemetry..."),
        }

        if let Some(reason) = session.supervisor().state().reason() {
            log::warn!("Safety landing in effect: {}", reason);
        }
    }

    log::info!("Landing before shutdown");
    if let Err(e) = commander.send_and_wait(&vimana_io::commander::Command::land()) {
        log::error!("Land failed: {}", e);
    }

    session.close();
    log::info!("VimanaIO stopped");
    Ok(())
}
