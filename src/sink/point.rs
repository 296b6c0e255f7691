use super::StoreError;
use crate::sample::Sample;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

pub const ENTITY_TAG: &str = "equipment_id";
const VALUE_FIELD: &str = "u";
const ENABLED_FIELD: &str = "enabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    EquipmentData,
    EquipmentStatistics,
}

impl Measurement {
    pub fn as_str(self) -> &'static str {
        match self {
            Measurement::EquipmentData => "equipment_data",
            Measurement::EquipmentStatistics => "equipment_statistics",
        }
    }
}

impl FromStr for Measurement {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "equipment_data" | "data" => Ok(Measurement::EquipmentData),
            "equipment_statistics" | "statistics" => Ok(Measurement::EquipmentStatistics),
            other => Err(anyhow::anyhow!("unknown measurement {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp_ns: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    /// Builds the point for a sample, stamping it with `now` if the sample carries no timestamp.
    /// Timestamps that do not fit in i64 nanoseconds are refused rather than clamped.
    pub fn from_sample(
        measurement: Measurement,
        sample: &Sample,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let timestamp = sample.timestamp().unwrap_or(now);
        let timestamp_ns = timestamp
            .timestamp_nanos_opt()
            .ok_or(StoreError::TimestampOutOfRange(timestamp))?;
        Ok(Point::new(measurement.as_str(), timestamp_ns)
            .tag(ENTITY_TAG, sample.entity_id().to_string())
            .field(VALUE_FIELD, FieldValue::Float(sample.value()))
            .field(ENABLED_FIELD, FieldValue::Boolean(sample.enabled())))
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    #[cfg(test)]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    #[cfg(test)]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    #[cfg(test)]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    #[cfg(test)]
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Renders the point as one InfluxDB line protocol record with nanosecond precision.
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::with_capacity(64);
        escape_into(&mut line, &self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        let mut first = true;
        for (key, value) in &self.fields {
            line.push(if first { ' ' } else { ',' });
            first = false;
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            match value {
                FieldValue::Float(v) => {
                    let _ = write!(line, "{v}");
                }
                FieldValue::Boolean(v) => line.push_str(if *v { "true" } else { "false" }),
            }
        }

        let _ = write!(line, " {}", self.timestamp_ns);
        line
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for ch in raw.chars() {
        if special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}
