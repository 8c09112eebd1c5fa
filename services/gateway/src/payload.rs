//! Broker payload encoding

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use crate::error::Result;
use crate::poll::{DecodedRecord, TagValue};
use crate::template::PayloadFormat;

/// Timestamp layout used in JSON payloads
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

pub fn format_timestamp<Tz>(timestamp: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

// Field order is the wire order
#[derive(Serialize)]
struct JsonPayload {
    timestamp_utc: String,
    timestamp_local: String,
    value: TagValue,
}

/// Encode one tag value for publishing
pub fn encode(format: PayloadFormat, value: TagValue, record: &DecodedRecord) -> Result<Vec<u8>> {
    match format {
        PayloadFormat::Text => Ok(value.to_string().into_bytes()),
        PayloadFormat::Json => {
            let payload = JsonPayload {
                timestamp_utc: format_timestamp(&record.timestamp_utc),
                timestamp_local: format_timestamp(&record.timestamp_local),
                value,
            };
            Ok(serde_json::to_vec(&payload)?)
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> DecodedRecord {
        DecodedRecord::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap())
    }

    #[test]
    fn test_text_payload() {
        let record = record();
        assert_eq!(
            encode(PayloadFormat::Text, TagValue::Int(42), &record).unwrap(),
            b"42"
        );
        assert_eq!(
            encode(PayloadFormat::Text, TagValue::Float(21.5), &record).unwrap(),
            b"21.5"
        );
    }

    #[test]
    fn test_json_payload_layout() {
        let record = record();
        let bytes = encode(PayloadFormat::Json, TagValue::Float(1.5), &record).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("{\"timestamp_utc\":\"2024-03-01 12:30:05+0000\",\"timestamp_local\":\""));
        assert!(text.ends_with(",\"value\":1.5}"));

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["value"], 1.5);
        assert_eq!(
            parsed["timestamp_local"],
            format_timestamp(&record.timestamp_local)
        );
    }

    #[test]
    fn test_json_integer_value() {
        let bytes = encode(PayloadFormat::Json, TagValue::Int(-7), &record()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["value"], -7);
    }
}
