//! Protobuf JSON durations (`"5s"`, `"0.250s"`) as `google.protobuf.Duration`.

use crate::errors::{Error, Result};
use envoy_types::pb::google::protobuf::Duration;
use serde::{Deserialize, Deserializer};

/// Parse a proto3 JSON duration string.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_suffix('s')
        .ok_or_else(|| Error::invalid(format!("invalid duration '{}': missing 's' suffix", raw)))?;

    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };

    let (whole, fraction) = match body.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (body, ""),
    };

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid(format!("invalid duration '{}'", raw)));
    }
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid(format!("invalid duration '{}'", raw)));
    }

    let seconds: i64 =
        whole.parse().map_err(|_| Error::invalid(format!("invalid duration '{}'", raw)))?;
    let nanos: i32 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction)
            .parse()
            .map_err(|_| Error::invalid(format!("invalid duration '{}'", raw)))?
    };

    if negative {
        Ok(Duration { seconds: -seconds, nanos: -nanos })
    } else {
        Ok(Duration { seconds, nanos })
    }
}

/// Serde adapter for optional duration fields.
pub fn deserialize_opt<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom)).transpose()
}
