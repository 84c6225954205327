use crate::errors::{LifelineError, LifelineResult};
use std::time::Duration;

/// Parses a duration such as `500ms`, `10s`, `1m` or `2h`.
pub fn parse_time_str(time_str: &str) -> LifelineResult<Duration> {
    let time_str = time_str.trim();
    let unit_start = time_str
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(index, _)| index)
        .ok_or(LifelineError::InvalidConfig(format!(
            "missing unit in '{}'",
            time_str
        )))?;
    let (value, unit) = time_str.split_at(unit_start);

    let amount: u64 = value
        .trim()
        .parse()
        .map_err(|_| LifelineError::InvalidConfig(format!("invalid number in '{}'", time_str)))?;

    let seconds = |factor: u64| {
        amount
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or(LifelineError::InvalidConfig(format!(
                "'{}' is too large",
                time_str
            )))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => seconds(60),
        "h" => seconds(3600),
        _ => Err(LifelineError::InvalidConfig(format!("unknown unit: {}", unit))),
    }
}

#[test]
fn test_parse_time_str() {
    assert_eq!(parse_time_str("10s").unwrap(), Duration::from_secs(10));
    assert_eq!(parse_time_str("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_time_str("2m").unwrap(), Duration::from_secs(120));
    assert_eq!(parse_time_str("1h").unwrap(), Duration::from_secs(3600));
    assert!(parse_time_str("10").is_err());
    assert!(parse_time_str("-5s").is_err());
    assert!(parse_time_str("5d").is_err());
    // Fullwidth digit: multibyte, and not an ASCII number.
    assert!(matches!(
        parse_time_str("\u{ff11}s"),
        Err(LifelineError::InvalidConfig(_))
    ));
    assert!(matches!(
        parse_time_str("６s"),
        Err(LifelineError::InvalidConfig(_))
    ));
    assert!(matches!(
        parse_time_str("6000000000000000h"),
        Err(LifelineError::InvalidConfig(_))
    ));
    assert!(matches!(
        parse_time_str("18446744073709551615m"),
        Err(LifelineError::InvalidConfig(_))
    ));
}
