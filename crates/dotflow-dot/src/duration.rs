use std::time::Duration;

use crate::ast::AttrValue;

/// Interpret a `timeout`-style attribute. Integers are milliseconds; strings
/// may carry an `ms`, `s`, `m`, `h`, or `d` suffix. Zero, negative, and
/// unrecognised values mean "no timeout".
pub fn parse_duration(value: &AttrValue) -> Option<Duration> {
    let ms = match value {
        AttrValue::Integer(n) => u64::try_from(*n).ok()?,
        AttrValue::Float(f) if f.is_finite() && *f > 0.0 => *f as u64,
        AttrValue::String(s) => parse_duration_str(s.trim())?,
        _ => return None,
    };
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_duration_str(s: &str) -> Option<u64> {
    if let Ok(ms) = s.parse::<u64>() {
        return Some(ms);
    }

    let (digits, scale) = if let Some(val) = s.strip_suffix("ms") {
        (val, 1)
    } else if let Some(val) = s.strip_suffix('s') {
        (val, 1_000)
    } else if let Some(val) = s.strip_suffix('m') {
        (val, 60_000)
    } else if let Some(val) = s.strip_suffix('h') {
        (val, 3_600_000)
    } else if let Some(val) = s.strip_suffix('d') {
        (val, 86_400_000)
    } else {
        return None;
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_milliseconds() {
        assert_eq!(
            parse_duration(&AttrValue::Integer(1500)),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_duration(&AttrValue::String("250".into())),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn suffixes() {
        let cases = [
            ("900ms", 900),
            ("30s", 30_000),
            ("2m", 120_000),
            ("1h", 3_600_000),
            ("1d", 86_400_000),
        ];
        for (raw, ms) in cases {
            assert_eq!(
                parse_duration(&AttrValue::String(raw.into())),
                Some(Duration::from_millis(ms)),
                "{raw}"
            );
        }
    }

    #[test]
    fn unusable_values_mean_no_timeout() {
        assert_eq!(parse_duration(&AttrValue::Integer(0)), None);
        assert_eq!(parse_duration(&AttrValue::Integer(-5)), None);
        assert_eq!(parse_duration(&AttrValue::String("soon".into())), None);
        assert_eq!(parse_duration(&AttrValue::String("1.5s".into())), None);
        assert_eq!(parse_duration(&AttrValue::Boolean(true)), None);
    }
}
