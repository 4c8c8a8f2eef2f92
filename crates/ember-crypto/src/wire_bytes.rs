//! Base64 serde adapters for byte fields on the relay wire.
//!
//! Every byte field the protocol transmits is encoded as standard-alphabet
//! base64 inside the JSON relay envelope. Both peers must use this module
//! (directly or through the derived serde impls) so the encoding can never
//! diverge between sides.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize any byte container as a base64 string.
pub fn ser<T: AsRef<[u8]>, S: Serializer>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}

/// Deserialize a base64 string into a `Vec<u8>`.
pub fn de_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    STANDARD
        .decode(text.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Deserialize a base64 string into a fixed-length array.
pub fn de_arr<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    let bytes = de_vec(deserializer)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| serde::de::Error::custom(format!("expected {N} bytes, got {actual}")))
}

/// Serialize an optional byte container, `None` as JSON null.
pub fn ser_opt<T: AsRef<[u8]>, S: Serializer>(
    bytes: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => ser(b, serializer),
        None => serializer.serialize_none(),
    }
}

/// Deserialize an optional base64 string into an optional array.
pub fn de_opt_arr<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> Result<Option<[u8; N]>, D::Error> {
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text {
        None => Ok(None),
        Some(text) => {
            let bytes = STANDARD
                .decode(text.as_bytes())
                .map_err(serde::de::Error::custom)?;
            let actual = bytes.len();
            bytes
                .try_into()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("expected {N} bytes, got {actual}")))
        }
    }
}
