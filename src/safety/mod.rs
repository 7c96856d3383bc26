//! Safety supervisor
//!
//! Three watchdog threads sharing one lifecycle:
//!
//! | Thread | Schedule | Action |
//! |--------|----------|--------|
//! | `vimana-keepalive` | every `keep_alive_ms` | enqueue `command` (suppresses the drone's idle auto-land) |
//! | `vimana-threshold` | every snapshot | record last-seen, land on battery/altitude breach |
//! | `vimana-silence` | every `silence_poll_ms` | land when no snapshot for `telemetry_timeout_ms` |
//!
//! Both landing watchdogs go through [`SupervisorState::try_trigger`], so at
//! most one `land` is issued per session even when both fire together.
//! Landing is fire-and-forget; a delivery failure is logged by the sender.

mod state;

pub use state::{SupervisorState, TriggerReason, check_thresholds};

use crate::cancel::{CANCEL_POLL, CancelToken};
use crate::commander::Command;
use crate::config::SafetyThresholds;
use crate::error::{Error, Result};
use crate::queue::CommandSink;
use crate::telemetry::TelemetrySnapshot;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Handle to the running watchdogs
pub struct SafetySupervisor {
    state: Arc<SupervisorState>,
    thresholds: SafetyThresholds,
    cancel: CancelToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SafetySupervisor {
    /// Spawn the three watchdogs
    ///
    /// # Arguments
    /// - `sink`: where keep-alive and `land` commands go
    /// - `snapshots`: telemetry stream consumed by the threshold monitor
    /// - `thresholds`: battery/altitude limits and timings
    /// - `parent`: cancelling it stops all watchdogs
    pub fn start(
        sink: Arc<dyn CommandSink>,
        snapshots: Receiver<TelemetrySnapshot>,
        thresholds: SafetyThresholds,
        parent: &CancelToken,
    ) -> Result<Self> {
        let state = Arc::new(SupervisorState::new());
        let cancel = parent.child();
        let mut handles = Vec::with_capacity(3);

        {
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();
            let interval = thresholds.keep_alive();
            handles.push(
                thread::Builder::new()
                    .name("vimana-keepalive".to_string())
                    .spawn(move || keep_alive_loop(sink, interval, cancel))?,
            );
        }

        {
            let sink = Arc::clone(&sink);
            let state = Arc::clone(&state);
            let cancel = cancel.clone();
            let thresholds = thresholds.clone();
            handles.push(
                thread::Builder::new()
                    .name("vimana-threshold".to_string())
                    .spawn(move || threshold_loop(sink, snapshots, state, thresholds, cancel))?,
            );
        }

        {
            let state = Arc::clone(&state);
            let cancel = cancel.clone();
            let thresholds = thresholds.clone();
            handles.push(
                thread::Builder::new()
                    .name("vimana-silence".to_string())
                    .spawn(move || silence_loop(sink, state, thresholds, cancel))?,
            );
        }

        log::info!(
            "Safety supervisor started (battery <= {}%, altitude {}..{} cm, silence {:?})",
            thresholds.battery_low_percent,
            thresholds.min_altitude_cm,
            thresholds.max_altitude_cm,
            thresholds.telemetry_timeout()
        );

        Ok(Self {
            state,
            thresholds,
            cancel,
            handles: Mutex::new(handles),
        })
    }

    pub fn state(&self) -> Arc<SupervisorState> {
        Arc::clone(&self.state)
    }

    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    pub fn is_triggered(&self) -> bool {
        self.state.is_triggered()
    }

    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.state.latest()
    }

    /// Cancel all watchdogs and wait for them; idempotent
    ///
    /// No watchdog enqueues anything once this returns.
    pub fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                log::error!("Safety watchdog thread panicked");
            }
        }
        log::info!("Safety supervisor stopped");
    }
}

impl Drop for SafetySupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Enqueue `land` if this call wins the trigger
fn fire(sink: &dyn CommandSink, state: &SupervisorState, reason: TriggerReason, cancel: &CancelToken) {
    if cancel.is_cancelled() || !state.try_trigger(reason) {
        return;
    }

    log::warn!("Safety trigger: {}, landing", reason);
    match sink.enqueue(Command::land()) {
        Ok(()) => log::info!("Protective land enqueued"),
        Err(Error::QueueFull) => {
            state.release();
            log::warn!("Queue full, protective land retried on next tick");
        }
        Err(e) => log::error!("Failed to enqueue protective land: {}", e),
    }
}

fn keep_alive_loop(sink: Arc<dyn CommandSink>, interval: std::time::Duration, cancel: CancelToken) {
    log::debug!("Keep-alive started ({:?})", interval);
    while cancel.sleep(interval) {
        if let Err(e) = sink.enqueue(Command::sdk_mode()) {
            log::warn!("Keep-alive not enqueued: {}", e);
        }
    }
    log::debug!("Keep-alive stopped");
}

fn threshold_loop(
    sink: Arc<dyn CommandSink>,
    snapshots: Receiver<TelemetrySnapshot>,
    state: Arc<SupervisorState>,
    thresholds: SafetyThresholds,
    cancel: CancelToken,
) {
    log::debug!("Threshold monitor started");
    while !cancel.is_cancelled() {
        match snapshots.recv_timeout(CANCEL_POLL) {
            Ok(snapshot) => {
                state.record(snapshot);
                if let Some(reason) = check_thresholds(&thresholds, &snapshot) {
                    fire(&*sink, &state, reason, &cancel);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("Telemetry stream closed, threshold monitor exiting");
                break;
            }
        }
    }
    log::debug!("Threshold monitor stopped");
}

fn silence_loop(
    sink: Arc<dyn CommandSink>,
    state: Arc<SupervisorState>,
    thresholds: SafetyThresholds,
    cancel: CancelToken,
) {
    log::debug!("Silence monitor started");
    let timeout = thresholds.telemetry_timeout();
    while cancel.sleep(thresholds.silence_poll()) {
        let silent_for = state.since_last_seen();
        if silent_for > timeout {
            log::debug!("No telemetry for {:?}", silent_for);
            fire(&*sink, &state, TriggerReason::TelemetrySilence, &cancel);
        }
    }
    log::debug!("Silence monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Sender, bounded};
    use std::time::{Duration, Instant};

    /// Sink that records commands and can simulate a full queue
    #[derive(Default)]
    struct RecordingSink {
        commands: Mutex<Vec<String>>,
        full: std::sync::atomic::AtomicBool,
    }

    impl RecordingSink {
        fn count(&self, text: &str) -> usize {
            self.commands.lock().iter().filter(|c| *c == text).count()
        }
    }

    impl CommandSink for RecordingSink {
        fn enqueue(&self, command: Command) -> Result<()> {
            if self.full.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::QueueFull);
            }
            self.commands.lock().push(command.text().to_string());
            Ok(())
        }
    }

    fn thresholds() -> SafetyThresholds {
        SafetyThresholds {
            battery_low_percent: 20,
            min_altitude_cm: 0,
            max_altitude_cm: 100,
            keep_alive_ms: 60_000,
            telemetry_timeout_ms: 60_000,
            silence_poll_ms: 10,
        }
    }

    fn start(
        sink: &Arc<RecordingSink>,
        thresholds: SafetyThresholds,
    ) -> (SafetySupervisor, Sender<TelemetrySnapshot>) {
        let (tx, rx) = bounded(16);
        let sink: Arc<dyn CommandSink> = sink.clone();
        let supervisor = SafetySupervisor::start(sink, rx, thresholds, &CancelToken::new()).unwrap();
        (supervisor, tx)
    }

    fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    fn snapshot(bat: i32, h: i32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            bat,
            h,
            ..TelemetrySnapshot::default()
        }
    }

    #[test]
    fn test_low_battery_lands_once() {
        let sink = Arc::new(RecordingSink::default());
        let (supervisor, tx) = start(&sink, thresholds());

        for _ in 0..5 {
            tx.send(snapshot(5, 50)).unwrap();
        }
        assert!(wait_until(Duration::from_secs(1), || sink.count("land") == 1));
        assert!(wait_until(Duration::from_secs(1), || tx.is_empty()));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(sink.count("land"), 1);
        assert_eq!(supervisor.state().reason(), Some(TriggerReason::LowBattery));
        supervisor.stop();
    }

    #[test]
    fn test_altitude_ceiling_lands() {
        let sink = Arc::new(RecordingSink::default());
        let (supervisor, tx) = start(&sink, thresholds());

        tx.send(snapshot(90, 50)).unwrap();
        tx.send(snapshot(90, 150)).unwrap();
        assert!(wait_until(Duration::from_secs(1), || sink.count("land") == 1));
        assert_eq!(supervisor.state().reason(), Some(TriggerReason::AltitudeHigh));
        assert_eq!(supervisor.latest().map(|s| s.h), Some(150));
    }

    #[test]
    fn test_silence_lands_once() {
        let sink = Arc::new(RecordingSink::default());
        let config = SafetyThresholds {
            telemetry_timeout_ms: 50,
            ..thresholds()
        };
        let (supervisor, _tx) = start(&sink, config);

        assert!(wait_until(Duration::from_secs(1), || sink.count("land") == 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.count("land"), 1);
        assert_eq!(supervisor.state().reason(), Some(TriggerReason::TelemetrySilence));
    }

    #[test]
    fn test_both_watchdogs_racing_land_once() {
        let sink = Arc::new(RecordingSink::default());
        let config = SafetyThresholds {
            telemetry_timeout_ms: 20,
            silence_poll_ms: 1,
            ..thresholds()
        };
        let (supervisor, tx) = start(&sink, config);

        thread::sleep(Duration::from_millis(15));
        for _ in 0..10 {
            tx.send(snapshot(1, 50)).unwrap();
            thread::sleep(Duration::from_millis(3));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.count("land"), 1);
        supervisor.stop();
    }

    #[test]
    fn test_queue_full_retries_on_next_tick() {
        let sink = Arc::new(RecordingSink::default());
        sink.full.store(true, std::sync::atomic::Ordering::SeqCst);
        let (supervisor, tx) = start(&sink, thresholds());

        tx.send(snapshot(5, 50)).unwrap();
        assert!(wait_until(Duration::from_secs(1), || tx.is_empty()));
        thread::sleep(Duration::from_millis(30));
        assert!(!supervisor.is_triggered());

        sink.full.store(false, std::sync::atomic::Ordering::SeqCst);
        tx.send(snapshot(5, 50)).unwrap();
        assert!(wait_until(Duration::from_secs(1), || sink.count("land") == 1));
        assert!(supervisor.is_triggered());
    }

    #[test]
    fn test_keep_alive_and_stop() {
        let sink = Arc::new(RecordingSink::default());
        let config = SafetyThresholds {
            keep_alive_ms: 20,
            ..thresholds()
        };
        let (supervisor, _tx) = start(&sink, config);

        assert!(wait_until(Duration::from_secs(1), || sink.count("command") >= 2));

        let begin = Instant::now();
        supervisor.stop();
        assert!(begin.elapsed() < Duration::from_millis(500));

        let after_stop = sink.commands.lock().len();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(sink.commands.lock().len(), after_stop);
    }
}
