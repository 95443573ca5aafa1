//! Check interval configuration
//!
//! `check_every` accepts either the literal `never` or a duration such as
//! `30s`, `1m`, `1h30m` or `10ms`. Plans carry intervals in the canonical
//! `1m0s` rendering produced by [`format_duration`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How often a checkable should be checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckEvery {
    /// Checking is disabled entirely
    pub never: bool,
    /// Custom interval; `None` means the installation default applies
    pub interval: Option<Duration>,
}

impl CheckEvery {
    pub fn never() -> Self {
        Self {
            never: true,
            interval: None,
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self {
            never: false,
            interval: Some(interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseDurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
}

impl FromStr for CheckEvery {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "never" {
            return Ok(Self::never());
        }
        parse_duration(s).map(Self::every)
    }
}

impl fmt::Display for CheckEvery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.never, self.interval) {
            (true, _) => f.write_str("never"),
            (false, Some(interval)) => f.write_str(&format_duration(interval)),
            (false, None) => f.write_str(""),
        }
    }
}

impl Serialize for CheckEvery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CheckEvery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a duration made of `<number><unit>` segments, e.g. `1h30m` or `1.5s`.
///
/// Supported units: `h`, `m`, `s`, `ms`, `us`/`µs`, `ns`.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseDurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(ParseDurationError::Invalid(input.to_string()));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| ParseDurationError::Invalid(input.to_string()))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(ParseDurationError::MissingUnit(input.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = match unit {
            "h" => 3_600_000_000_000.0,
            "m" => 60_000_000_000.0,
            "s" => 1_000_000_000.0,
            "ms" => 1_000_000.0,
            "us" | "µs" => 1_000.0,
            "ns" => 1.0,
            other => {
                return Err(ParseDurationError::UnknownUnit {
                    unit: other.to_string(),
                    input: input.to_string(),
                });
            }
        };
        total_nanos += value * scale;
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Renders a duration as `72h3m0.5s`, `1m0s`, `10ms` or `0s`.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let nanos = d.as_nanos();
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", with_fraction((nanos / 1_000) as u64, (nanos % 1_000) as u64, 3));
    }
    if nanos < 1_000_000_000 {
        return format!(
            "{}ms",
            with_fraction((nanos / 1_000_000) as u64, (nanos % 1_000_000) as u64, 6)
        );
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = with_fraction(total_secs % 60, u64::from(d.subsec_nanos()), 9);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn with_fraction(whole: u64, frac: u64, width: usize) -> String {
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10ms", Duration::from_millis(10))]
    #[case("30s", Duration::from_secs(30))]
    #[case("1m", Duration::from_secs(60))]
    #[case("1h30m", Duration::from_secs(5400))]
    #[case("1.5s", Duration::from_millis(1500))]
    #[case("0", Duration::ZERO)]
    fn test_parse_duration(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("10")]
    #[case("ms")]
    #[case("5d")]
    fn test_parse_duration_rejects(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[rstest]
    #[case(Duration::from_secs(60), "1m0s")]
    #[case(Duration::from_millis(10), "10ms")]
    #[case(Duration::from_secs(5400), "1h30m0s")]
    #[case(Duration::from_millis(1500), "1.5s")]
    #[case(Duration::ZERO, "0s")]
    fn test_format_duration(#[case] input: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(input), expected);
    }

    #[test]
    fn test_check_every_never() {
        let every: CheckEvery = "never".parse().unwrap();
        assert!(every.never);
        assert_eq!(every.interval, None);
    }

    #[test]
    fn test_check_every_serde() {
        let every: CheckEvery = serde_json::from_str("\"10ms\"").unwrap();
        assert_eq!(every, CheckEvery::every(Duration::from_millis(10)));
        assert_eq!(serde_json::to_string(&every).unwrap(), "\"10ms\"");

        let never: CheckEvery = serde_json::from_str("\"never\"").unwrap();
        assert_eq!(serde_json::to_string(&never).unwrap(), "\"never\"");
    }
}
