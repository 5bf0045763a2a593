//! Core Record Types
//!
//! Ledger metadata, entries, append results, and event payloads, plus the
//! serde helpers that keep 64-bit counters and timestamps loss-free on the
//! JSON wire.

mod entry;
mod event;
mod ledger;

pub use entry::{AppendProofRecord, AppendResult, BlobRef, LedgerEntry, BLOB_REF_TYPE};
pub use event::LedgerEvent;
pub use ledger::{new_ledger_id, LedgerMetadata, LedgerMetadataPatch};

/// Serialize `u64` as a decimal string; counts and positions may exceed the
/// IEEE-754 safe integer range, which JSON numbers cannot carry loss-free.
/// Deserialization accepts both strings and bare numbers.
pub mod u64_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Serialize timestamps as ISO-8601 UTC with millisecond precision.
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::canonical::canonical_timestamp;

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&canonical_timestamp(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<DateTime<Utc>>().map_err(de::Error::custom)
    }
}

/// `Option<DateTime<Utc>>` variant of [`iso_millis`].
pub mod iso_millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::canonical::canonical_timestamp;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&canonical_timestamp(*ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| s.parse::<DateTime<Utc>>().map_err(de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Counter {
        #[serde(with = "super::u64_string")]
        count: u64,
    }

    #[test]
    fn test_u64_as_decimal_string() {
        let json = serde_json::to_string(&Counter { count: u64::MAX }).unwrap();
        assert_eq!(json, r#"{"count":"18446744073709551615"}"#);
        let back: Counter = serde_json::from_str(&json).unwrap();
        assert_eq!(back.count, u64::MAX);
    }

    #[test]
    fn test_u64_accepts_bare_number() {
        let back: Counter = serde_json::from_str(r#"{"count":7}"#).unwrap();
        assert_eq!(back.count, 7);
    }
}
