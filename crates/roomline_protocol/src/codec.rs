//! CBOR encoding for persisted records.
//!
//! Every journal payload goes through these two functions so the on-disk
//! format stays in one place.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// CBOR encode/decode failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A value could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the requested type.
    #[error("decoding failed: {0}")]
    Decode(String),
}

/// Encodes `value` as CBOR.
///
/// # Errors
///
/// Fails when the value's `Serialize` impl fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value.
///
/// # Errors
///
/// Fails when `bytes` is not valid CBOR for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, EventId, RoomId, UserId};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn event_with_json_content_survives_cbor() {
        let event = Event::new(
            EventId::from("$a"),
            RoomId::from("!r:example.org"),
            UserId::from("@alice:example.org"),
            "m.room.message",
            json!({"msgtype": "m.text", "body": "hi", "nested": {"n": [1, 2, 3]}}),
        )
        .with_timestamp(1_700_000_000_000);

        let bytes = to_cbor(&event).unwrap();
        let back: Event = from_cbor(&bytes).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = from_cbor::<Event>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = from_cbor::<Event>(&bytes);
        }
    }
}
