//! Number parsing for INDI element values.
//!
//! Drivers send plain decimals as well as sexagesimal values such as
//! `-12:30:45.5` or `5 30` for angles and hour angles.

use crate::error::ProtocolError;

/// Parse a decimal or sexagesimal number
pub fn parse_number(text: &str) -> Result<f64, ProtocolError> {
    let text = text.trim();

    if text.is_empty() {
        return Err(ProtocolError::InvalidNumber(text.to_string()));
    }

    if let Ok(value) = text.parse::<f64>() {
        return Ok(value);
    }

    parse_sexagesimal(text).ok_or_else(|| ProtocolError::InvalidNumber(text.to_string()))
}

fn parse_sexagesimal(text: &str) -> Option<f64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let parts: Vec<&str> = body
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let mut value = 0.0;
    let mut scale = 1.0;

    for part in parts {
        let component: f64 = part.parse().ok()?;
        if component < 0.0 {
            return None;
        }
        value += component / scale;
        scale *= 60.0;
    }

    Some(if negative { -value } else { value })
}

/// Render a number for the wire
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal() {
        assert_eq!(parse_number("42").unwrap(), 42.0);
        assert_eq!(parse_number(" -1.5e3 ").unwrap(), -1500.0);
    }

    #[test]
    fn test_sexagesimal() {
        assert_eq!(parse_number("12:30").unwrap(), 12.5);
        assert_eq!(parse_number("-10:30:00").unwrap(), -10.5);
        assert!((parse_number("5 15 36").unwrap() - 5.26).abs() < 1e-12);
        assert_eq!(parse_number("+1:30").unwrap(), 1.5);
    }

    #[test]
    fn test_invalid() {
        assert!(parse_number("").is_err());
        assert!(parse_number("abc").is_err());
        assert!(parse_number("1:2:3:4").is_err());
        assert!(parse_number("1:-2").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.25), "-0.25");
    }
}
