//! Common serde helpers
//!
//! Timestamps are stored as epoch milliseconds and exposed as RFC 3339 strings.
//! Deserialization accepts either form.

use serde::{Deserialize, Deserializer, Serializer, de};

use crate::util::{millis_to_rfc3339, rfc3339_to_millis};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    fn into_millis<E: de::Error>(self) -> Result<i64, E> {
        match self {
            RawTimestamp::Millis(m) => Ok(m),
            RawTimestamp::Text(s) => rfc3339_to_millis(&s)
                .ok_or_else(|| E::custom(format!("invalid RFC 3339 timestamp: {s}"))),
        }
    }
}

/// `i64` millis <-> RFC 3339
pub mod timestamp {
    use super::*;

    pub fn serialize<S>(millis: &i64, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&millis_to_rfc3339(*millis))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawTimestamp::deserialize(deserializer)?.into_millis()
    }
}

/// `Option<i64>` millis <-> RFC 3339 or null
pub mod option_timestamp {
    use super::*;

    pub fn serialize<S>(millis: &Option<i64>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match millis {
            Some(m) => s.serialize_str(&millis_to_rfc3339(*m)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawTimestamp>::deserialize(deserializer)?
            .map(RawTimestamp::into_millis)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "super::timestamp")]
        at: i64,
        #[serde(default, with = "super::option_timestamp")]
        until: Option<i64>,
    }

    #[test]
    fn accepts_rfc3339_and_millis() {
        let a: Stamped = serde_json::from_str(r#"{"at":"2024-06-10T06:13:20.123Z"}"#).unwrap();
        let b: Stamped = serde_json::from_str(r#"{"at":1718000000123,"until":null}"#).unwrap();
        assert_eq!(a.at, 1_718_000_000_123);
        assert_eq!(a.at, b.at);
        assert!(b.until.is_none());
    }

    #[test]
    fn rejects_garbage() {
        let r: Result<Stamped, _> = serde_json::from_str(r#"{"at":"yesterday"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn serializes_as_rfc3339() {
        let json = serde_json::to_string(&Stamped {
            at: 1_718_000_000_123,
            until: None,
        })
        .unwrap();
        assert!(json.contains("2024-06-10T06:13:20.123Z"));
    }
}
