//! Human-readable durations for timeouts (`90`, `30s`, `10m`, `2h`, `1d`).
//!
//! A bare number is seconds. Serialization picks the largest unit that divides
//! the value exactly, so `600` is written back as `10m`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HumanDuration(Duration);

const UNITS: &[(&str, u64)] = &[("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)];

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*(s|m|h|d)?\s*$").expect("Invalid regex pattern"));

impl HumanDuration {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

/// Parse a duration string such as `45`, `30s`, `10m`, `2h` or `1d`.
pub fn parse_duration(input: &str) -> Result<HumanDuration> {
    let caps = DURATION_PATTERN.captures(input).ok_or_else(|| {
        Error::validation_invalid_argument(
            "duration",
            format!("Invalid duration '{}'", input),
            Some(input.to_string()),
            Some(vec!["30s".to_string(), "10m".to_string(), "2h".to_string()]),
        )
    })?;

    let amount: u64 = caps[1].parse().map_err(|_| {
        Error::validation_invalid_argument(
            "duration",
            format!("Duration '{}' is out of range", input),
            Some(input.to_string()),
            None,
        )
    })?;

    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("s");
    let factor = UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| *factor)
        .unwrap_or(1);

    let secs = amount.checked_mul(factor).ok_or_else(|| {
        Error::validation_invalid_argument(
            "duration",
            format!("Duration '{}' is out of range", input),
            Some(input.to_string()),
            None,
        )
    })?;

    Ok(HumanDuration::from_secs(secs))
}

impl FromStr for HumanDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_duration(s)
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs == 0 {
            return write!(f, "0s");
        }
        for (unit, factor) in UNITS {
            if secs % factor == 0 {
                return write!(f, "{}{}", secs / factor, unit);
            }
        }
        write!(f, "{}s", secs)
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct HumanDurationVisitor;

impl<'de> Visitor<'de> for HumanDurationVisitor {
    type Value = HumanDuration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number of seconds or a string like \"30s\", \"10m\", \"2h\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<HumanDuration, E> {
        Ok(HumanDuration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<HumanDuration, E> {
        u64::try_from(v)
            .map(HumanDuration::from_secs)
            .map_err(|_| E::custom(format!("duration must not be negative, got {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<HumanDuration, E> {
        parse_duration(v).map_err(|e| E::custom(e.message))
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(HumanDurationVisitor)
    }
}
