use crate::error::{GateError, Result};

/// Time units accepted in limit declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
}

impl Unit {
    /// Convert unit to seconds (duration)
    pub fn to_seconds(self) -> u64 {
        match self {
            Unit::Second => 1,
            Unit::Minute => 60,
            Unit::Hour => 3600,
            Unit::Day => 86400,
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "" | "s" | "sec" | "secs" | "second" | "seconds" => Some(Unit::Second),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(Unit::Minute),
            "h" | "hour" | "hours" => Some(Unit::Hour),
            "d" | "day" | "days" => Some(Unit::Day),
            _ => None,
        }
    }
}

/// Parse a window such as `90`, `30s`, `5m`, `6h` or `1d` into seconds.
pub fn parse_window(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(GateError::Config(format!("window '{}' has no amount", input)));
    }

    let amount: u64 = digits
        .parse()
        .map_err(|e| GateError::Config(format!("window '{}': {}", input, e)))?;
    let unit = Unit::from_suffix(suffix.trim().to_ascii_lowercase().as_str())
        .ok_or_else(|| GateError::Config(format!("window '{}' has an unknown unit", input)))?;

    amount
        .checked_mul(unit.to_seconds())
        .ok_or_else(|| GateError::Config(format!("window '{}' overflows", input)))
}

/// Escape a scope identifier so it can never contain the key separator.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}
