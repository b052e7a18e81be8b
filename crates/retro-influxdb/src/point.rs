//! Measurement points and InfluxDB line protocol encoding

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

/// A field value as InfluxDB stores it
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Str(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(value) => Some(*value),
            FieldValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Float(_) => None,
            FieldValue::Str(value) => Some(value),
        }
    }
}

/// One sample written to the time-series database
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub time: DateTime<Utc>,
}

impl MeasurementPoint {
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time,
        }
    }

    /// Set a field; non-finite floats are refused and remove the key
    pub fn set_field(&mut self, key: impl Into<String>, value: FieldValue) -> bool {
        let key = key.into();
        if let FieldValue::Float(number) = value {
            if !number.is_finite() {
                self.fields.remove(&key);
                return false;
            }
        }
        self.fields.insert(key, value);
        true
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Encode as one line of InfluxDB line protocol
    ///
    /// Empty tag values are omitted; the timestamp is in nanoseconds.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            line.push(separator);
            separator = ',';
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            match value {
                FieldValue::Float(number) => {
                    let _ = write!(line, "{number}");
                }
                FieldValue::Str(text) => {
                    line.push('"');
                    line.push_str(&escape(text, &['"', '\\']));
                    line.push('"');
                }
            }
        }

        if let Some(nanos) = self.time.timestamp_nanos_opt() {
            let _ = write!(line, " {nanos}");
        }
        line
    }
}

/// Encode a batch, one point per line
pub fn to_line_protocol(points: &[MeasurementPoint]) -> String {
    points
        .iter()
        .map(MeasurementPoint::to_line_protocol)
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 5).unwrap()
    }

    #[test]
    fn test_simple_line() {
        let mut point = MeasurementPoint::new("°C", time());
        point.tags.insert("domain".into(), "sensor".into());
        point.tags.insert("entity_id".into(), "temp".into());
        point.set_field("value", FieldValue::Float(20.5));

        assert_eq!(
            point.to_line_protocol(),
            "°C,domain=sensor,entity_id=temp value=20.5 1700000000000000005"
        );
    }

    #[test]
    fn test_escaping() {
        let mut point = MeasurementPoint::new("living room,main", time());
        point.tags.insert("friendly name".into(), "a=b".into());
        point.tags.insert("empty".into(), String::new());
        point.set_field("state", FieldValue::Str(r#"say "hi" \o/"#.into()));
        point.set_field("my key", FieldValue::Float(1.0));

        assert_eq!(
            point.to_line_protocol(),
            concat!(
                r"living\ room\,main,friendly\ name=a\=b ",
                r#"my\ key=1,state="say \"hi\" \\o/" 1700000000000000005"#
            )
        );
    }

    #[test]
    fn test_non_finite_fields_are_refused() {
        let mut point = MeasurementPoint::new("m", time());
        assert!(point.set_field("x", FieldValue::Float(2.0)));
        assert!(!point.set_field("x", FieldValue::Float(f64::INFINITY)));
        assert!(!point.set_field("y", FieldValue::Float(f64::NAN)));
        assert!(point.fields.is_empty());
    }

    #[test]
    fn test_batch_is_newline_separated() {
        let mut a = MeasurementPoint::new("a", time());
        a.set_field("value", FieldValue::Float(1.0));
        let mut b = MeasurementPoint::new("b", time());
        b.set_field("value", FieldValue::Float(2.0));
        let body = to_line_protocol(&[a, b]);
        assert_eq!(body.lines().count(), 2);
        assert!(body.starts_with("a value=1 "));
    }
}
