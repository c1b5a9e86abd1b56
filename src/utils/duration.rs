//! Human-friendly duration strings ("90s", "10m", "1h", "3d").

use std::time::Duration;

/// Unit suffixes and their length in seconds, longest suffix first per unit
const UNITS: &[(&[&str], u64)] = &[
    (&["days", "day", "d"], 86_400),
    (&["hours", "hour", "hrs", "hr", "h"], 3600),
    (&["minutes", "minute", "mins", "min", "m"], 60),
    (&["seconds", "second", "secs", "sec", "s"], 1),
];

/// Parse a duration string to whole seconds.
///
/// Accepts a bare number of seconds ("1800") or a number followed by a
/// day, hour, minute or second suffix ("3d", "1h", "10min", "90s").
///
/// ```
/// use speedboard::utils::duration::parse_duration_to_seconds;
///
/// assert_eq!(parse_duration_to_seconds("1800"), Ok(1800));
/// assert_eq!(parse_duration_to_seconds("10m"), Ok(600));
/// assert_eq!(parse_duration_to_seconds("3d"), Ok(259_200));
/// assert!(parse_duration_to_seconds("soon").is_err());
/// ```
pub fn parse_duration_to_seconds(duration: &str) -> Result<u64, String> {
    let duration = duration.trim();
    let split = duration
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(duration.len());
    let (number, suffix) = duration.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| format!("Invalid duration format: {}", duration))?;

    let multiplier = if suffix.is_empty() {
        1
    } else {
        UNITS
            .iter()
            .find(|(names, _)| names.contains(&suffix.trim()))
            .map(|(_, secs)| *secs)
            .ok_or_else(|| format!("Invalid duration unit '{}' in {}", suffix, duration))?
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration out of range: {}", duration))
}

/// Like [`parse_duration_to_seconds`], for clap value parsers
pub fn parse_duration(duration: &str) -> Result<Duration, String> {
    parse_duration_to_seconds(duration).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration_to_seconds("1800"), Ok(1800));
        assert_eq!(parse_duration_to_seconds("0"), Ok(0));
        assert_eq!(parse_duration_to_seconds("1800s"), Ok(1800));
        assert_eq!(parse_duration_to_seconds("1800secs"), Ok(1800));
        assert_eq!(parse_duration_to_seconds("1800seconds"), Ok(1800));
    }

    #[test]
    fn test_parse_duration_larger_units() {
        assert_eq!(parse_duration_to_seconds("10m"), Ok(600));
        assert_eq!(parse_duration_to_seconds("30min"), Ok(1800));
        assert_eq!(parse_duration_to_seconds("30 minutes"), Ok(1800));
        assert_eq!(parse_duration_to_seconds("5h"), Ok(18_000));
        assert_eq!(parse_duration_to_seconds("5hrs"), Ok(18_000));
        assert_eq!(parse_duration_to_seconds("1d"), Ok(86_400));
        assert_eq!(parse_duration_to_seconds("3days"), Ok(259_200));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration_to_seconds("").is_err());
        assert!(parse_duration_to_seconds("invalid").is_err());
        assert!(parse_duration_to_seconds("5x").is_err());
        assert!(parse_duration_to_seconds("5minutesx").is_err());
        assert!(parse_duration_to_seconds("-5m").is_err());
        assert!(parse_duration_to_seconds("99999999999999999999d").is_err());
    }

    #[test]
    fn test_parse_duration_std() {
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    }
}
