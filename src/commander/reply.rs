//! Reply interpretation
//!
//! The drone answers every command with one ASCII line: `ok`, `error`, or
//! for read queries the requested value(s).

use crate::error::{Error, Result};
use std::str::FromStr;

/// Map an action reply to success or failure
///
/// `"ok"`/`"OK"` → `Ok`, `"error"`/`"ERROR"` → `CommandRejected`, anything
/// else → `ProtocolViolation`.
pub fn interpret(reply: &str) -> Result<()> {
    match reply.trim() {
        "ok" | "OK" => Ok(()),
        "error" | "ERROR" => Err(Error::CommandRejected(reply.trim().to_string())),
        other => Err(Error::ProtocolViolation(format!(
            "unexpected reply '{}'",
            other
        ))),
    }
}

/// Surface an `error` reply to a read query as a rejection
fn reject_error(reply: &str) -> Result<&str> {
    let trimmed = reply.trim();
    if trimmed.eq_ignore_ascii_case("error") {
        return Err(Error::CommandRejected(trimmed.to_string()));
    }
    Ok(trimmed)
}

fn number<T: FromStr>(text: &str, reply: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::ProtocolViolation(format!("cannot parse reply '{}'", reply)))
}

/// Strip a trailing unit suffix, if present
fn without_unit<'a>(text: &'a str, unit: &str) -> (&'a str, bool) {
    match text.strip_suffix(unit) {
        Some(value) => (value, true),
        None => (text, false),
    }
}

/// `speed?` → cm/s
pub fn parse_speed(reply: &str) -> Result<f64> {
    let text = reject_error(reply)?;
    number(text, reply)
}

/// `battery?` → percent
pub fn parse_battery(reply: &str) -> Result<u8> {
    let text = reject_error(reply)?;
    number(text, reply)
}

/// `time?` → seconds of motor time (`"12s"` or `"12"`)
pub fn parse_time(reply: &str) -> Result<u32> {
    let text = reject_error(reply)?;
    let (value, _) = without_unit(text, "s");
    number(value, reply)
}

/// `height?` → cm; the drone reports decimetres (`"10dm"`)
pub fn parse_height(reply: &str) -> Result<i32> {
    let text = reject_error(reply)?;
    if let (value, true) = without_unit(text, "dm") {
        return number::<i32>(value, reply)?.checked_mul(10).ok_or_else(|| {
            Error::ProtocolViolation(format!("height reply '{}' out of range", reply))
        });
    }
    let (value, _) = without_unit(text, "cm");
    number(value, reply)
}

/// `temp?` → (low, high) °C from `"83~86C"`; a single value yields `(v, v)`
pub fn parse_temperature(reply: &str) -> Result<(i32, i32)> {
    let text = reject_error(reply)?;
    let (value, _) = without_unit(text, "C");
    match value.split_once('~') {
        Some((low, high)) => Ok((number(low, reply)?, number(high, reply)?)),
        None => {
            let v = number(value, reply)?;
            Ok((v, v))
        }
    }
}

/// `baro?` → metres
pub fn parse_barometer(reply: &str) -> Result<f64> {
    let text = reject_error(reply)?;
    let (value, _) = without_unit(text, "m");
    number(value, reply)
}

/// `tof?` → cm; the drone reports millimetres (`"801mm"`)
pub fn parse_tof(reply: &str) -> Result<i32> {
    let text = reject_error(reply)?;
    if let (value, true) = without_unit(text, "mm") {
        return number::<i32>(value, reply).map(|mm| mm / 10);
    }
    let (value, _) = without_unit(text, "cm");
    number(value, reply)
}

/// Parse `"k1:v1;k2:v2;k3:v3;"` into three values in key order
fn parse_triple<T: FromStr + Copy>(reply: &str, keys: [&str; 3]) -> Result<(T, T, T)> {
    let text = reject_error(reply)?;
    let mut values: [Option<T>; 3] = [None; 3];

    for segment in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((key, value)) = segment.split_once(':') else {
            return Err(Error::ProtocolViolation(format!(
                "cannot parse reply '{}'",
                reply
            )));
        };
        if let Some(slot) = keys.iter().position(|k| *k == key.trim()) {
            values[slot] = Some(number(value, reply)?);
        }
    }

    match values {
        [Some(a), Some(b), Some(c)] => Ok((a, b, c)),
        _ => Err(Error::ProtocolViolation(format!(
            "reply '{}' lacks one of {:?}",
            reply, keys
        ))),
    }
}

/// `attitude?` → (pitch, roll, yaw) degrees
pub fn parse_attitude(reply: &str) -> Result<(i32, i32, i32)> {
    parse_triple(reply, ["pitch", "roll", "yaw"])
}

/// `acceleration?` → (agx, agy, agz)
pub fn parse_acceleration(reply: &str) -> Result<(f64, f64, f64)> {
    parse_triple(reply, ["agx", "agy", "agz"])
}
