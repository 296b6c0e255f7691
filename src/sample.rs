use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EntityId = i64;

/// Readings above this value mark the equipment as enabled.
pub const ENABLED_THRESHOLD: f64 = 20.0;
pub const VALUE_MIN: f64 = 0.0;
pub const VALUE_MAX: f64 = 100.0;

/// One telemetry reading for a piece of equipment.
///
/// `enabled` is derived from `value` on construction and cannot be set on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    entity_id: EntityId,
    value: f64,
    enabled: bool,
    timestamp: Option<DateTime<Utc>>,
}

impl Sample {
    pub fn new(entity_id: EntityId, value: f64) -> Self {
        debug_assert!((VALUE_MIN..=VALUE_MAX).contains(&value));
        Self {
            entity_id,
            value,
            enabled: value > ENABLED_THRESHOLD,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("invalid equipment id {0:?}")]
    InvalidEntityId(String),
    #[error("malformed sample payload: {0}")]
    Json(#[from] simd_json::Error),
    #[error("sample value {0} outside [0, 100]")]
    ValueOutOfRange(f64),
    #[error("invalid sample timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("no handler for topic {0}")]
    UnknownTopic(String),
}

#[derive(Serialize)]
struct SampleMessage {
    equipment_id: EntityId,
    u: f64,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BorrowedSample<'a> {
    equipment_id: EntityId,
    u: f64,
    #[serde(default, borrow)]
    timestamp: Option<BorrowedTimestamp<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BorrowedTimestamp<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
}

impl<'a> BorrowedTimestamp<'a> {
    fn to_datetime(&self) -> Result<DateTime<Utc>, PayloadError> {
        match self {
            BorrowedTimestamp::Str(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .filter(fits_nanos)
                .ok_or_else(|| PayloadError::InvalidTimestamp(s.to_string())),
            BorrowedTimestamp::Int(ms) => millis_to_dt(*ms),
            BorrowedTimestamp::Float(ts) => millis_to_dt(ts.trunc() as i64),
        }
    }
}

/// Points carry i64 nanoseconds, so only 1677-09-21 through 2262-04-11 is representable.
fn fits_nanos(dt: &DateTime<Utc>) -> bool {
    dt.timestamp_nanos_opt().is_some()
}

fn millis_to_dt(ms: i64) -> Result<DateTime<Utc>, PayloadError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .filter(fits_nanos)
        .ok_or_else(|| PayloadError::InvalidTimestamp(ms.to_string()))
}

pub fn encode_sample(sample: &Sample) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&SampleMessage {
        equipment_id: sample.entity_id,
        u: sample.value,
        enabled: sample.enabled,
        timestamp: sample.timestamp,
    })
}

/// Decodes a JSON sample message. The wire `enabled` flag is ignored and re-derived from `u`.
pub fn decode_sample(payload: &mut [u8]) -> Result<Sample, PayloadError> {
    let message: BorrowedSample = simd_json::from_slice(payload)?;
    if !message.u.is_finite() || !(VALUE_MIN..=VALUE_MAX).contains(&message.u) {
        return Err(PayloadError::ValueOutOfRange(message.u));
    }
    let timestamp = message
        .timestamp
        .as_ref()
        .map(BorrowedTimestamp::to_datetime)
        .transpose()?;

    let sample = Sample::new(message.equipment_id, message.u);
    Ok(match timestamp {
        Some(ts) => sample.with_timestamp(ts),
        None => sample,
    })
}

/// Decodes a plain-text decimal equipment id, as published on the delete topic.
pub fn decode_entity_id(payload: &[u8]) -> Result<EntityId, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let trimmed = text.trim();
    trimmed
        .parse::<EntityId>()
        .map_err(|_| PayloadError::InvalidEntityId(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_tracks_threshold() {
        assert!(!Sample::new(1, 0.0).enabled());
        assert!(!Sample::new(1, 20.0).enabled());
        assert!(Sample::new(1, 20.0001).enabled());
        assert!(Sample::new(1, 100.0).enabled());
    }

    #[test]
    fn decode_rederives_enabled_from_value() {
        let mut payload = br#"{"equipment_id":7,"u":12.5,"enabled":true}"#.to_vec();
        let sample = decode_sample(&mut payload).unwrap();
        assert_eq!(sample.entity_id(), 7);
        assert_eq!(sample.value(), 12.5);
        assert!(!sample.enabled());
        assert!(sample.timestamp().is_none());
    }

    #[test]
    fn decode_accepts_rfc3339_and_epoch_millis() {
        let mut rfc = br#"{"equipment_id":1,"u":50,"timestamp":"2024-03-01T12:00:00Z"}"#.to_vec();
        let mut millis = br#"{"equipment_id":1,"u":50,"timestamp":1709294400000}"#.to_vec();
        let a = decode_sample(&mut rfc).unwrap();
        let b = decode_sample(&mut millis).unwrap();
        assert_eq!(a.timestamp(), b.timestamp());
        assert_eq!(a.timestamp().unwrap().timestamp(), 1_709_294_400);
    }

    #[test]
    fn decode_rejects_out_of_range_value() {
        let mut payload = br#"{"equipment_id":1,"u":100.5}"#.to_vec();
        assert!(matches!(
            decode_sample(&mut payload),
            Err(PayloadError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut payload = b"not json".to_vec();
        assert!(matches!(decode_sample(&mut payload), Err(PayloadError::Json(_))));

        let mut bad_ts = br#"{"equipment_id":1,"u":1,"timestamp":"yesterday"}"#.to_vec();
        assert!(matches!(
            decode_sample(&mut bad_ts),
            Err(PayloadError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn decode_rejects_timestamps_outside_nanosecond_range() {
        for raw in [
            r#""9999-12-31T00:00:00Z""#,
            r#""1500-01-01T00:00:00Z""#,
            "253402214400000",
        ] {
            let mut payload = format!(r#"{{"equipment_id":1,"u":50,"timestamp":{raw}}}"#).into_bytes();
            assert!(
                matches!(decode_sample(&mut payload), Err(PayloadError::InvalidTimestamp(_))),
                "{raw} should be rejected"
            );
        }

        let mut edge = br#"{"equipment_id":1,"u":50,"timestamp":"2262-04-11T00:00:00Z"}"#.to_vec();
        assert!(decode_sample(&mut edge).is_ok());
    }

    #[test]
    fn encoded_sample_decodes_to_the_same_point() {
        let ts = Utc.timestamp_millis_opt(1_709_294_400_123).unwrap();
        let sample = Sample::new(42, 57.25).with_timestamp(ts);
        let mut bytes = encode_sample(&sample).unwrap();
        assert_eq!(decode_sample(&mut bytes).unwrap(), sample);
    }

    #[test]
    fn entity_id_payloads() {
        assert_eq!(decode_entity_id(b"42").unwrap(), 42);
        assert_eq!(decode_entity_id(b" 42\n").unwrap(), 42);
        assert!(matches!(
            decode_entity_id(b"forty-two"),
            Err(PayloadError::InvalidEntityId(_))
        ));
        assert!(matches!(decode_entity_id(&[0xff, 0xfe]), Err(PayloadError::NotUtf8)));
    }
}
