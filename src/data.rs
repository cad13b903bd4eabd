use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::typed_table::SemanticType;

const TIMESTAMP_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Value::Integer(_) => SemanticType::Integer,
            Value::Float(_) => SemanticType::Float,
            Value::Boolean(_) => SemanticType::Boolean,
            Value::Timestamp(_) => SemanticType::Timestamp,
            Value::Text(_) => SemanticType::Text,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Timestamp(ts) => ts.format(TIMESTAMP_DISPLAY_FORMAT).to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses anything the warehouse stores as a TIMESTAMP: naive datetimes,
/// RFC 3339 values (normalised to UTC) and bare dates (midnight).
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(parsed) = parse_naive_datetime(trimmed) {
        return Ok(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_utc());
    }
    if let Ok(date) = parse_naive_date(trimmed)
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight);
    }
    Err(anyhow!("Failed to parse '{value}' as timestamp"))
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Tokens the decoders read as a missing value.
pub fn is_placeholder_token(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    matches!(
        lowered.trim_start_matches('#'),
        "na" | "n/a" | "nan" | "null" | "none" | "<na>"
    )
}

pub fn parse_typed_value(value: &str, ty: SemanticType) -> Result<Option<Value>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || is_placeholder_token(trimmed) {
        return Ok(None);
    }
    let parsed = match ty {
        SemanticType::Text | SemanticType::Unresolved => Value::Text(value.to_string()),
        SemanticType::Integer => {
            let parsed: i64 = trimmed
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Value::Integer(parsed)
        }
        SemanticType::Float => {
            let parsed: f64 = trimmed
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as float"))?;
            Value::Float(parsed)
        }
        SemanticType::Boolean => match parse_boolean(trimmed) {
            Some(parsed) => Value::Boolean(parsed),
            None => bail!("Failed to parse '{value}' as boolean"),
        },
        SemanticType::Timestamp => Value::Timestamp(parse_timestamp(trimmed)?),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parse_naive_date_supports_multiple_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06").unwrap(), expected);
        assert_eq!(parse_naive_date("06/05/2024").unwrap(), expected);
        assert_eq!(parse_naive_date("2024/05/06").unwrap(), expected);
    }

    #[test]
    fn parse_timestamp_accepts_dates_datetimes_and_rfc3339() {
        let expected =
            NaiveDateTime::parse_from_str("2024-05-06 14:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_timestamp("2024-05-06T14:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-06 14:30").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-06T16:30:00+02:00").unwrap(), expected);

        let midnight = parse_timestamp("2024-05-06").unwrap();
        assert_eq!(midnight.format("%H:%M:%S").to_string(), "00:00:00");
        assert!(parse_timestamp("next tuesday").is_err());
    }

    #[test]
    fn parse_typed_value_handles_empty_placeholder_and_boolean_inputs() {
        assert_eq!(parse_typed_value("", SemanticType::Integer).unwrap(), None);
        assert_eq!(parse_typed_value("N/A", SemanticType::Float).unwrap(), None);

        let truthy = parse_typed_value("Yes", SemanticType::Boolean)
            .unwrap()
            .unwrap();
        assert_eq!(truthy, Value::Boolean(true));
        assert!(parse_typed_value("maybe", SemanticType::Boolean).is_err());
    }

    #[test]
    fn text_values_keep_surrounding_whitespace() {
        let parsed = parse_typed_value(" Paris ", SemanticType::Text)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, Value::Text(" Paris ".to_string()));
    }

    #[test]
    fn display_renders_timestamps_without_fraction() {
        let ts = parse_timestamp("2024-01-02T03:04:05").unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2024-01-02 03:04:05");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
    }
}
