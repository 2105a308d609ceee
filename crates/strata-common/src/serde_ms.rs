//! Serde adapters that encode [`Duration`] as integer milliseconds.
//!
//! Use with `#[serde(with = "strata_common::serde_ms")]`, or
//! `serde_ms::option` for `Option<Duration>` fields.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Serialize a duration as milliseconds
///
/// # Errors
/// Propagates serializer errors
pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

/// Deserialize milliseconds into a duration
///
/// # Errors
/// Propagates deserializer errors
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
}

/// Same encoding for optional durations; `None` maps to null
pub mod option {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serialize an optional duration as milliseconds or null
    ///
    /// # Errors
    /// Propagates serializer errors
    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds
    ///
    /// # Errors
    /// Propagates deserializer errors
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "crate::serde_ms")]
        wait: Duration,
        #[serde(with = "crate::serde_ms::option", default)]
        deadline: Option<Duration>,
    }

    #[test]
    fn encodes_milliseconds() {
        let sample = Sample {
            wait: Duration::from_millis(1500),
            deadline: None,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"wait":1500,"deadline":null}"#);
    }

    #[test]
    fn missing_optional_field_defaults_to_none() {
        let sample: Sample = serde_json::from_str(r#"{"wait":20}"#).unwrap();
        assert_eq!(sample.wait, Duration::from_millis(20));
        assert_eq!(sample.deadline, None);
    }
}
