//! Payload encoding shared by both cache tiers.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{CacheError, Result};

/// How cached values are turned into bytes.
///
/// JSON keeps Redis values readable from `redis-cli` and interoperable
/// with other writers; MessagePack is smaller for large payloads such as
/// the bootstrap document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string())),
            Codec::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| CacheError::Encode(e.to_string()))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
            }
            Codec::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_is_plain_text() {
        let bytes = Codec::Json.encode(&vec![1, 2, 3]).unwrap();
        assert_eq!(bytes, b"[1,2,3]");
    }

    #[test]
    fn messagepack_keeps_field_names() {
        let mut map = HashMap::new();
        map.insert("entry_name".to_string(), 42u32);
        let bytes = Codec::MessagePack.encode(&map).unwrap();
        let back: HashMap<String, u32> = Codec::MessagePack.decode(&bytes).unwrap();
        assert_eq!(back.get("entry_name"), Some(&42));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = Codec::Json.decode::<Vec<u32>>(b"not json").unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }
}
