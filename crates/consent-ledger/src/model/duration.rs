//! Compact duration strings: `30m`, `4h`, `2d`, `1w2d3h`.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;

use crate::error::RejectedError;

static DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([smhdw])").expect("duration token pattern compiles"));
static DURATION_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+[smhdw])+$").expect("duration pattern compiles"));

const UNITS: [(char, i64); 5] = [
    ('w', 604_800),
    ('d', 86_400),
    ('h', 3_600),
    ('m', 60),
    ('s', 1),
];

fn unit_seconds(unit: &str) -> i64 {
    UNITS
        .iter()
        .find(|(u, _)| unit.starts_with(*u))
        .map(|(_, secs)| *secs)
        .unwrap_or(0)
}

/// Parse a duration string. Zero-length and malformed values are rejected.
pub fn parse_duration(raw: &str) -> Result<Duration, RejectedError> {
    let normalized = raw.trim().to_ascii_lowercase();
    let invalid = || RejectedError::InvalidDuration(raw.to_string());

    if !DURATION_FULL.is_match(&normalized) {
        return Err(invalid());
    }

    let mut seconds: i64 = 0;
    for caps in DURATION_TOKEN.captures_iter(&normalized) {
        let value: i64 = caps[1].parse().map_err(|_| invalid())?;
        let part = value
            .checked_mul(unit_seconds(&caps[2]))
            .ok_or_else(invalid)?;
        seconds = seconds.checked_add(part).ok_or_else(invalid)?;
    }

    if seconds == 0 {
        return Err(invalid());
    }
    Duration::try_seconds(seconds).ok_or_else(invalid)
}

/// Render whole seconds in the largest units first, e.g. `1w2d`.
pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.num_seconds().max(0);
    let mut out = String::new();
    for (unit, factor) in UNITS {
        if remaining >= factor {
            out.push_str(&format!("{}{}", remaining / factor, unit));
            remaining %= factor;
        }
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}
