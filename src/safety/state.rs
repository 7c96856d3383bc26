//! Supervisor shared state

use crate::config::SafetyThresholds;
use crate::telemetry::TelemetrySnapshot;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why the supervisor ordered a landing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    LowBattery,
    AltitudeHigh,
    AltitudeLow,
    TelemetrySilence,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TriggerReason::LowBattery => "battery low",
            TriggerReason::AltitudeHigh => "altitude above maximum",
            TriggerReason::AltitudeLow => "altitude below minimum",
            TriggerReason::TelemetrySilence => "telemetry silence",
        };
        f.write_str(text)
    }
}

/// First threshold breached by `snapshot`, if any
pub fn check_thresholds(
    thresholds: &SafetyThresholds,
    snapshot: &TelemetrySnapshot,
) -> Option<TriggerReason> {
    if snapshot.bat <= thresholds.battery_low_percent {
        Some(TriggerReason::LowBattery)
    } else if snapshot.h > thresholds.max_altitude_cm {
        Some(TriggerReason::AltitudeHigh)
    } else if snapshot.h < thresholds.min_altitude_cm {
        Some(TriggerReason::AltitudeLow)
    } else {
        None
    }
}

/// State shared by the watchdogs
///
/// `last_seen` has one writer (threshold monitor) and one reader (silence
/// monitor). The Nominal→Triggered flag only moves through
/// [`SupervisorState::try_trigger`].
pub struct SupervisorState {
    last_seen: Mutex<Instant>,
    latest: Mutex<Option<TelemetrySnapshot>>,
    triggered: AtomicBool,
    reason: Mutex<Option<TriggerReason>>,
}

impl SupervisorState {
    /// Silence is measured from construction until the first snapshot
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
            latest: Mutex::new(None),
            triggered: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    /// Record a freshly received snapshot
    pub fn record(&self, snapshot: TelemetrySnapshot) {
        *self.last_seen.lock() = Instant::now();
        *self.latest.lock() = Some(snapshot);
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    pub fn since_last_seen(&self) -> Duration {
        self.last_seen().elapsed()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        *self.latest.lock()
    }

    /// Nominal→Triggered; `true` only for the single caller that won
    pub fn try_trigger(&self, reason: TriggerReason) -> bool {
        let won = self
            .triggered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            *self.reason.lock() = Some(reason);
        }
        won
    }

    /// Undo a won trigger whose `land` could not be enqueued
    pub(crate) fn release(&self) {
        *self.reason.lock() = None;
        self.triggered.store(false, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<TriggerReason> {
        *self.reason.lock()
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_thresholds() {
        let thresholds = SafetyThresholds::default();
        let nominal = TelemetrySnapshot {
            bat: 80,
            h: 50,
            ..TelemetrySnapshot::default()
        };
        assert_eq!(check_thresholds(&thresholds, &nominal), None);

        let low = TelemetrySnapshot { bat: 20, ..nominal };
        assert_eq!(check_thresholds(&thresholds, &low), Some(TriggerReason::LowBattery));

        let high = TelemetrySnapshot { h: 101, ..nominal };
        assert_eq!(check_thresholds(&thresholds, &high), Some(TriggerReason::AltitudeHigh));

        let floor = SafetyThresholds {
            min_altitude_cm: 30,
            ..SafetyThresholds::default()
        };
        let under = TelemetrySnapshot { h: 29, ..nominal };
        assert_eq!(check_thresholds(&floor, &under), Some(TriggerReason::AltitudeLow));
    }

    #[test]
    fn test_single_trigger_winner() {
        let state = Arc::new(SupervisorState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let reason = if i % 2 == 0 {
                        TriggerReason::LowBattery
                    } else {
                        TriggerReason::TelemetrySilence
                    };
                    state.try_trigger(reason)
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(state.is_triggered());
        assert!(state.reason().is_some());
    }

    #[test]
    fn test_record_updates_latest() {
        let state = SupervisorState::new();
        assert!(state.latest().is_none());
        let before = state.last_seen();
        thread::sleep(Duration::from_millis(5));

        state.record(TelemetrySnapshot {
            bat: 42,
            ..TelemetrySnapshot::default()
        });
        assert_eq!(state.latest().map(|s| s.bat), Some(42));
        assert!(state.last_seen() > before);
    }
}
