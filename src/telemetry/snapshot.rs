//! Telemetry snapshot value type

/// One parsed state broadcast
///
/// A new packet replaces the previous snapshot wholesale; fields absent from
/// a packet are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    /// Attitude (degrees)
    pub pitch: i32,
    pub roll: i32,
    pub yaw: i32,
    /// Velocity (cm/s)
    pub vgx: i32,
    pub vgy: i32,
    pub vgz: i32,
    /// Lowest/highest board temperature (°C)
    pub templ: i32,
    pub temph: i32,
    /// Time-of-flight distance (cm)
    pub tof: i32,
    /// Height (cm)
    pub h: i32,
    /// Battery (%)
    pub bat: i32,
    /// Barometer (m)
    pub baro: f64,
    /// Motor time (s)
    pub time: i32,
    /// Acceleration (g)
    pub agx: f64,
    pub agy: f64,
    pub agz: f64,
}
