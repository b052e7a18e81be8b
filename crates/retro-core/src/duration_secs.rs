//! Serde helpers for durations written as (fractional) seconds in config

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Wait {
        #[serde(with = "super")]
        wait: Duration,
    }

    #[test]
    fn test_fractional_seconds() {
        let wait: Wait = serde_json::from_str(r#"{"wait": 0.25}"#).unwrap();
        assert_eq!(wait.wait, Duration::from_millis(250));
        assert_eq!(serde_json::to_string(&wait).unwrap(), r#"{"wait":0.25}"#);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(serde_json::from_str::<Wait>(r#"{"wait": -1}"#).is_err());
    }
}
