//! Opaque structured payloads owned by individual component types.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Uninterpreted JSON carried through registration unchanged.
///
/// The shape belongs to each component type; this crate only moves the
/// bytes and decodes them on demand.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueData(Box<RawValue>);

impl OpaqueData {
    /// Serialize `value` into an opaque payload.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::value::to_raw_value(value).map(Self)
    }

    /// Wrap already-encoded JSON text. The text must be valid JSON.
    pub fn from_json(json: impl Into<String>) -> serde_json::Result<Self> {
        RawValue::from_string(json.into()).map(Self)
    }

    /// Decode the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.0.get())
    }

    /// The raw JSON text.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for OpaqueData {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Debug for OpaqueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueData").field(&self.as_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Bucketed {
        #[serde(rename = "Bucket")]
        bucket: String,
    }

    #[test]
    fn test_encode_then_decode() {
        let data = OpaqueData::encode(&Bucketed {
            bucket: "bucket".to_string(),
        })
        .unwrap();

        assert_eq!(data.as_str(), r#"{"Bucket":"bucket"}"#);
        let decoded: Bucketed = data.decode().unwrap();
        assert_eq!(decoded.bucket, "bucket");
    }

    #[test]
    fn test_passes_through_unmodified() {
        let text = r#"{"b": 1,  "a": [true, null]}"#;
        let data = OpaqueData::from_json(text).unwrap();
        assert_eq!(data.as_str(), text);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(OpaqueData::from_json("{not json").is_err());
    }

    #[test]
    fn test_decode_shape_mismatch() {
        let data = OpaqueData::from_json(r#"{"Bucket": 7}"#).unwrap();
        assert!(data.decode::<Bucketed>().is_err());
    }
}
