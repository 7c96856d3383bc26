//! State packet parser
//!
//! Grammar: `key:value` pairs separated by `;`. The drone terminates each
//! packet with `;\r\n`, so empty segments are skipped.
//!
//! | Failure | Outcome |
//! |---------|---------|
//! | pair without exactly one `:` | whole packet rejected |
//! | empty key or value | whole packet rejected |
//! | unknown key | ignored |
//! | known key, unparseable value | that field is 0, rest published |

use super::TelemetrySnapshot;
use crate::error::{Error, Result};
use std::str::FromStr;

/// Parse one state packet
pub fn parse_state(packet: &str) -> Result<TelemetrySnapshot> {
    let mut snapshot = TelemetrySnapshot::default();

    for segment in packet.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let mut parts = segment.split(':');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::MalformedTelemetry(format!(
                "invalid pair '{}'",
                segment
            )));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(Error::MalformedTelemetry(format!(
                "empty key or value in '{}'",
                segment
            )));
        }

        match key {
            "pitch" => snapshot.pitch = field(key, value),
            "roll" => snapshot.roll = field(key, value),
            "yaw" => snapshot.yaw = field(key, value),
            "vgx" => snapshot.vgx = field(key, value),
            "vgy" => snapshot.vgy = field(key, value),
            "vgz" => snapshot.vgz = field(key, value),
            "templ" => snapshot.templ = field(key, value),
            "temph" => snapshot.temph = field(key, value),
            "tof" => snapshot.tof = field(key, value),
            "h" => snapshot.h = field(key, value),
            "bat" => snapshot.bat = field(key, value),
            "baro" => snapshot.baro = field(key, value),
            "time" => snapshot.time = field(key, value),
            "agx" => snapshot.agx = field(key, value),
            "agy" => snapshot.agy = field(key, value),
            "agz" => snapshot.agz = field(key, value),
            _ => log::trace!("Ignoring telemetry key '{}'", key),
        }
    }

    Ok(snapshot)
}

/// Parse one field value, zero on failure
fn field<T: FromStr + Default>(key: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        log::debug!("Telemetry field {}='{}' unparseable, using 0", key, value);
        T::default()
    })
}
