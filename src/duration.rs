//! Human-friendly durations (`100ms`, `1s`, `1m30s`) for config and CLI.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{LoadflameError, LoadflameResult};

pub fn parse_duration(s: &str) -> LoadflameResult<Duration> {
    let s = s.trim();
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    // Bare numbers are seconds.
    if let Ok(secs) = s.parse::<f64>()
        && let Ok(d) = Duration::try_from_secs_f64(secs)
    {
        return Ok(d);
    }
    Err(LoadflameError::InvalidArgument(format!(
        "invalid duration {s:?} (examples: 100ms, 1s, 0.1, 1m30s)"
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LoadDuration(pub Duration);

impl LoadDuration {
    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn get(self) -> Duration {
        self.0
    }
}

impl From<LoadDuration> for Duration {
    fn from(value: LoadDuration) -> Self {
        value.0
    }
}

impl FromStr for LoadDuration {
    type Err = LoadflameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

impl fmt::Display for LoadDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl Serialize for LoadDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LoadDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
