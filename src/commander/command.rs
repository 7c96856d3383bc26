//! Validated protocol commands
//!
//! Every constructor checks its parameters before producing wire text, so a
//! [`Command`] that exists is always transmittable.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Relative move distance (cm)
pub const DISTANCE_RANGE: RangeInclusive<i32> = 20..=500;
/// Rotation angle (degrees)
pub const ROTATION_RANGE: RangeInclusive<i32> = 1..=3600;
/// `go` per-axis target (cm)
pub const GO_AXIS_RANGE: RangeInclusive<i32> = 20..=500;
/// `go` and `speed` velocity (cm/s)
pub const SPEED_RANGE: RangeInclusive<i32> = 10..=100;
/// `curve` coordinate (cm)
pub const CURVE_AXIS_RANGE: RangeInclusive<i32> = -500..=500;
/// `curve` velocity (cm/s)
pub const CURVE_SPEED_RANGE: RangeInclusive<i32> = 10..=60;
/// `curve` endpoints must leave this cube around the origin (cm)
pub const CURVE_DEAD_ZONE: i32 = 20;
/// `rc` channel value
pub const RC_RANGE: RangeInclusive<i32> = -100..=100;
/// Maximum SSID length
pub const SSID_MAX_LEN: usize = 32;

/// Validation rule that produced a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// No parameters (`command`, `takeoff`, `land`, ...)
    Bare,
    Distance,
    Rotation,
    Flip,
    Go,
    Curve,
    Speed,
    Rc,
    Wifi,
    /// Read query (`battery?`, ...)
    Query,
}

/// Relative move direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Backward,
}

impl Direction {
    fn token(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Backward => "back",
        }
    }
}

/// Yaw rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    fn token(self) -> &'static str {
        match self {
            Rotation::Clockwise => "cw",
            Rotation::CounterClockwise => "ccw",
        }
    }
}

/// Flip direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    fn token(self) -> &'static str {
        match self {
            FlipDirection::Left => "l",
            FlipDirection::Right => "r",
            FlipDirection::Forward => "f",
            FlipDirection::Back => "b",
        }
    }
}

impl FromStr for FlipDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l" => Ok(FlipDirection::Left),
            "r" => Ok(FlipDirection::Right),
            "f" => Ok(FlipDirection::Forward),
            "b" => Ok(FlipDirection::Back),
            other => Err(Error::InvalidParameter(format!(
                "flip direction '{}' is not one of l, r, f, b",
                other
            ))),
        }
    }
}

/// Read queries answered with a single reply line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Speed,
    Battery,
    Time,
    Height,
    Temperature,
    Attitude,
    Barometer,
    Acceleration,
    TimeOfFlight,
}

impl Query {
    fn token(self) -> &'static str {
        match self {
            Query::Speed => "speed?",
            Query::Battery => "battery?",
            Query::Time => "time?",
            Query::Height => "height?",
            Query::Temperature => "temp?",
            Query::Attitude => "attitude?",
            Query::Barometer => "baro?",
            Query::Acceleration => "acceleration?",
            Query::TimeOfFlight => "tof?",
        }
    }
}

/// Point relative to the drone's current position (cm)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point3 {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    fn in_dead_zone(&self) -> bool {
        self.x.abs() <= CURVE_DEAD_ZONE
            && self.y.abs() <= CURVE_DEAD_ZONE
            && self.z.abs() <= CURVE_DEAD_ZONE
    }

    fn to_f64(self) -> [f64; 3] {
        [self.x as f64, self.y as f64, self.z as f64]
    }
}

/// Accepted `curve` arc radius band (cm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcBand {
    pub min: f64,
    pub max: f64,
}

/// Immutable command text plus the rule that validated it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    rule: Rule,
}

impl Command {
    fn bare(text: &str) -> Self {
        Self {
            text: text.to_string(),
            rule: Rule::Bare,
        }
    }

    /// `command`: enter SDK mode; doubles as the keep-alive no-op
    pub fn sdk_mode() -> Self {
        Self::bare("command")
    }

    pub fn takeoff() -> Self {
        Self::bare("takeoff")
    }

    pub fn land() -> Self {
        Self::bare("land")
    }

    /// Stop all motors immediately
    pub fn emergency() -> Self {
        Self::bare("emergency")
    }

    pub fn stream_on() -> Self {
        Self::bare("streamon")
    }

    pub fn stream_off() -> Self {
        Self::bare("streamoff")
    }

    /// Relative move of `distance_cm` (20–500)
    pub fn move_by(direction: Direction, distance_cm: i32) -> Result<Self> {
        check_range(direction.token(), distance_cm, &DISTANCE_RANGE)?;
        Ok(Self {
            text: format!("{} {}", direction.token(), distance_cm),
            rule: Rule::Distance,
        })
    }

    /// Rotation of `degrees` (1–3600)
    pub fn rotate(rotation: Rotation, degrees: i32) -> Result<Self> {
        check_range(rotation.token(), degrees, &ROTATION_RANGE)?;
        Ok(Self {
            text: format!("{} {}", rotation.token(), degrees),
            rule: Rule::Rotation,
        })
    }

    pub fn flip(direction: FlipDirection) -> Self {
        Self {
            text: format!("flip {}", direction.token()),
            rule: Rule::Flip,
        }
    }

    /// Fly to `(x, y, z)` at `speed` cm/s
    pub fn go(x: i32, y: i32, z: i32, speed: i32) -> Result<Self> {
        check_range("go x", x, &GO_AXIS_RANGE)?;
        check_range("go y", y, &GO_AXIS_RANGE)?;
        check_range("go z", z, &GO_AXIS_RANGE)?;
        check_range("go speed", speed, &SPEED_RANGE)?;
        Ok(Self {
            text: format!("go {} {} {} {}", x, y, z, speed),
            rule: Rule::Go,
        })
    }

    /// Fly an arc through `p1` to `p2` at `speed` cm/s
    ///
    /// Besides the coordinate and speed ranges, both endpoints must leave the
    /// ±20 cm cube around the origin and the circle through the origin, `p1`
    /// and `p2` must have a radius inside `band`.
    pub fn curve(p1: Point3, p2: Point3, speed: i32, band: ArcBand) -> Result<Self> {
        for (name, value) in [
            ("curve x1", p1.x),
            ("curve y1", p1.y),
            ("curve z1", p1.z),
            ("curve x2", p2.x),
            ("curve y2", p2.y),
            ("curve z2", p2.z),
        ] {
            check_range(name, value, &CURVE_AXIS_RANGE)?;
        }
        check_range("curve speed", speed, &CURVE_SPEED_RANGE)?;

        if p1.in_dead_zone() || p2.in_dead_zone() {
            return Err(Error::InvalidParameter(format!(
                "curve endpoints must lie outside ±{} cm of the origin",
                CURVE_DEAD_ZONE
            )));
        }

        let radius = circumradius(p1, p2).ok_or_else(|| {
            Error::InvalidParameter("curve points are collinear with the origin".to_string())
        })?;
        if radius < band.min || radius > band.max {
            return Err(Error::InvalidParameter(format!(
                "arc radius {:.2} cm is outside [{:.2}, {:.2}]",
                radius, band.min, band.max
            )));
        }

        Ok(Self {
            text: format!(
                "curve {} {} {} {} {} {} {}",
                p1.x, p1.y, p1.z, p2.x, p2.y, p2.z, speed
            ),
            rule: Rule::Curve,
        })
    }

    /// Set cruise speed (10–100 cm/s)
    pub fn speed(speed: i32) -> Result<Self> {
        check_range("speed", speed, &SPEED_RANGE)?;
        Ok(Self {
            text: format!("speed {}", speed),
            rule: Rule::Speed,
        })
    }

    /// Remote-control stick values: roll, pitch, throttle, yaw (−100..100)
    pub fn rc(a: i32, b: i32, c: i32, d: i32) -> Result<Self> {
        check_range("rc a", a, &RC_RANGE)?;
        check_range("rc b", b, &RC_RANGE)?;
        check_range("rc c", c, &RC_RANGE)?;
        check_range("rc d", d, &RC_RANGE)?;
        Ok(Self {
            text: format!("rc {} {} {} {}", a, b, c, d),
            rule: Rule::Rc,
        })
    }

    /// Change the drone's access point credentials
    pub fn wifi(ssid: &str, password: &str) -> Result<Self> {
        let ssid_len = ssid.chars().count();
        if ssid_len == 0 || ssid_len > SSID_MAX_LEN {
            return Err(Error::InvalidParameter(format!(
                "ssid length {} is out of range [1, {}]",
                ssid_len, SSID_MAX_LEN
            )));
        }
        if password.is_empty() {
            return Err(Error::InvalidParameter("password must not be empty".to_string()));
        }
        if ssid.contains(char::is_whitespace) || password.contains(char::is_whitespace) {
            return Err(Error::InvalidParameter(
                "ssid and password must not contain whitespace".to_string(),
            ));
        }
        Ok(Self {
            text: format!("wifi {} {}", ssid, password),
            rule: Rule::Wifi,
        })
    }

    pub fn query(query: Query) -> Self {
        Self {
            text: query.token().to_string(),
            rule: Rule::Query,
        }
    }

    /// Wire text
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rule(&self) -> Rule {
        self.rule
    }

    /// `rc` is fire-and-forget; every other command gets one reply line
    pub fn expects_reply(&self) -> bool {
        self.rule != Rule::Rc
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn check_range(name: &str, value: i32, range: &RangeInclusive<i32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{} {} is out of range [{}, {}]",
            name,
            value,
            range.start(),
            range.end()
        )))
    }
}

/// Radius of the circle through the origin, `p1` and `p2`
///
/// `R = |a|·|b|·|a−b| / (2·|a×b|)`; `None` when the points are collinear.
fn circumradius(p1: Point3, p2: Point3) -> Option<f64> {
    let a = p1.to_f64();
    let b = p2.to_f64();
    let norm = |v: [f64; 3]| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();

    let cross = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    let cross_norm = norm(cross);
    if cross_norm < f64::EPSILON {
        return None;
    }

    let diff = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    Some(norm(a) * norm(b) * norm(diff) / (2.0 * cross_norm))
}
