//! Time functions and conversion filters

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDateTime, Timelike, Utc};
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};

/// Accepted shapes for naive timestamps, read as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// A datetime value in templates
///
/// Renders as RFC 3339, so a timestamp template can pass one straight through.
#[derive(Debug, Clone)]
pub struct DateTimeWrapper(pub DateTime<FixedOffset>);

impl DateTimeWrapper {
    pub fn utc(dt: DateTime<Utc>) -> Value {
        Value::from_object(DateTimeWrapper(dt.fixed_offset()))
    }
}

impl Object for DateTimeWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let dt = &self.0;
        match key.as_str()? {
            "year" => Some(Value::from(dt.year())),
            "month" => Some(Value::from(dt.month())),
            "day" => Some(Value::from(dt.day())),
            "hour" => Some(Value::from(dt.hour())),
            "minute" => Some(Value::from(dt.minute())),
            "second" => Some(Value::from(dt.second())),
            _ => None,
        }
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &minijinja::State,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match name {
            "isoformat" => Ok(Value::from(self.0.to_rfc3339())),
            "timestamp" => Ok(Value::from(epoch_seconds(&self.0))),
            "strftime" => {
                let format = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidOperation, "strftime requires a format")
                })?;
                Ok(Value::from(self.0.format(format).to_string()))
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("datetime has no method named {name}"),
            )),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

fn epoch_seconds(dt: &DateTime<FixedOffset>) -> f64 {
    dt.timestamp_micros() as f64 / 1_000_000.0
}

/// Parse a rendered timestamp
///
/// RFC 3339 keeps its offset; naive `YYYY-MM-DD HH:MM:SS` is taken as UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn value_to_f64(value: &Value) -> Option<f64> {
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
}

/// Current local time
pub fn now() -> Value {
    Value::from_object(DateTimeWrapper(Local::now().fixed_offset()))
}

/// Current UTC time
pub fn utcnow() -> Value {
    DateTimeWrapper::utc(Utc::now())
}

/// Seconds since the epoch for a datetime, timestamp string or number
pub fn as_timestamp(value: Value) -> Result<Value, Error> {
    if let Some(dt) = value.downcast_object_ref::<DateTimeWrapper>() {
        return Ok(Value::from(epoch_seconds(&dt.0)));
    }
    if let Some(text) = value.as_str() {
        if let Some(dt) = parse_datetime(text) {
            return Ok(Value::from(epoch_seconds(&dt.fixed_offset())));
        }
        if let Ok(ts) = text.trim().parse::<f64>() {
            return Ok(Value::from(ts));
        }
    }
    if let Some(ts) = value_to_f64(&value) {
        return Ok(Value::from(ts));
    }
    Err(Error::new(
        ErrorKind::InvalidOperation,
        format!("cannot convert {value} to a timestamp"),
    ))
}

/// `value | float(default)`
pub fn to_float(value: Value, default: Option<Value>) -> Value {
    let parsed = value_to_f64(&value).or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
    match parsed {
        Some(f) => Value::from(f),
        None => Value::from(default.as_ref().and_then(value_to_f64).unwrap_or(0.0)),
    }
}

/// `value | int(default)`
pub fn to_int(value: Value, default: Option<Value>) -> Value {
    let parsed = value.as_i64().or_else(|| value_to_f64(&value).map(|f| f as i64)).or_else(|| {
        value.as_str().and_then(|s| {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        })
    });
    match parsed {
        Some(i) => Value::from(i),
        None => Value::from(
            default
                .as_ref()
                .and_then(|d| d.as_i64().or_else(|| value_to_f64(d).map(|f| f as i64)))
                .unwrap_or(0),
        ),
    }
}
