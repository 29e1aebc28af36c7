//! Timestamp extraction from access-log style records.
//!
//! A record is split on single spaces after collapsing double spaces. The
//! field at the configured position holds the timestamp wrapped in one
//! enclosing character on each side, e.g. `[02/Jan/2024:03:00:00.000]`.

use chrono::NaiveDateTime;

use crate::error::ExtractError;

/// Pattern of the timestamp text once the enclosing characters are removed.
/// Fractional seconds are optional.
pub const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S%.f";

/// Default position of the timestamp field.
pub const DEFAULT_FIELD_INDEX: usize = 6;

/// A parsed timestamp and the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTimestamp {
    pub timestamp: NaiveDateTime,
    /// Field text without its enclosing characters.
    pub raw: String,
}

/// Pulls the event time out of a record.
#[derive(Debug, Clone, Copy)]
pub struct TimestampExtractor {
    field_index: usize,
}

impl Default for TimestampExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FIELD_INDEX)
    }
}

impl TimestampExtractor {
    pub fn new(field_index: usize) -> Self {
        Self { field_index }
    }

    /// Extract the timestamp of `record`.
    ///
    /// Only one pass of double-space collapsing is applied, so a run of three
    /// spaces still yields an empty field.
    pub fn extract(&self, record: &str) -> Result<ExtractedTimestamp, ExtractError> {
        let normalized = record.replace("  ", " ");
        let field = normalized
            .split(' ')
            .nth(self.field_index)
            .ok_or(ExtractError::MissingField {
                index: self.field_index,
            })?;

        let inner = strip_enclosing(field).ok_or_else(|| ExtractError::Unenclosed {
            field: field.to_string(),
        })?;

        let timestamp = NaiveDateTime::parse_from_str(inner, TIMESTAMP_FORMAT).map_err(|e| {
            ExtractError::Unparsable {
                raw: inner.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(ExtractedTimestamp {
            timestamp,
            raw: inner.to_string(),
        })
    }
}

/// Drop the first and last character of `field`.
fn strip_enclosing(field: &str) -> Option<&str> {
    let mut chars = field.char_indices();
    let (_, first) = chars.next()?;
    let (last_start, _) = chars.next_back()?;
    Some(&field[first.len_utf8()..last_start])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn record(ts: &str) -> String {
        format!("10.0.0.1 - - svc GET /index.html [{ts}] 200 512")
    }

    #[test]
    fn test_extracts_bracketed_timestamp() {
        let extracted = TimestampExtractor::default()
            .extract(&record("02/Jan/2024:03:00:00.000"))
            .unwrap();

        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        assert_eq!(extracted.timestamp, expected);
        assert_eq!(extracted.raw, "02/Jan/2024:03:00:00.000");
    }

    #[test]
    fn test_fraction_is_optional() {
        let extracted = TimestampExtractor::default()
            .extract(&record("31/Dec/2023:23:59:59"))
            .unwrap();
        assert_eq!(extracted.timestamp.hour(), 23);
        assert_eq!(extracted.timestamp.date(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn test_double_spaces_collapsed() {
        let line = "10.0.0.1 -  - svc GET /index.html [02/Jan/2024:03:00:00.5] 200 512";
        let extracted = TimestampExtractor::default().extract(line).unwrap();
        assert_eq!(extracted.raw, "02/Jan/2024:03:00:00.5");
    }

    #[test]
    fn test_short_record_is_missing_field() {
        let err = TimestampExtractor::default()
            .extract("too short")
            .unwrap_err();
        assert_eq!(err, ExtractError::MissingField { index: 6 });
        assert_eq!(err.reason(), "missing_field");
    }

    #[test]
    fn test_single_character_field_is_unenclosed() {
        let err = TimestampExtractor::new(1).extract("a b c").unwrap_err();
        assert_eq!(
            err,
            ExtractError::Unenclosed {
                field: "b".to_string()
            }
        );
    }

    #[test]
    fn test_garbage_timestamp_is_unparsable() {
        let err = TimestampExtractor::default()
            .extract(&record("yesterday"))
            .unwrap_err();
        assert_eq!(err.reason(), "unparsable");
    }

    #[test]
    fn test_custom_field_index() {
        let extracted = TimestampExtractor::new(0)
            .extract("[01/Feb/2024:12:30:00] GET /")
            .unwrap();
        assert_eq!(extracted.timestamp.minute(), 30);
    }
}
