//! Tagged payload encoding.
//!
//! Every cached value is one tag byte followed by its payload:
//!
//! | tag    | payload                                  |
//! |--------|------------------------------------------|
//! | `0x01` | integer: 8 bytes, big-endian `i64`       |
//! | `0x02` | blob: 4-byte big-endian length, then bytes |
//!
//! Decoding never panics on corrupted input; [`try_decode`] names the
//! failure and [`decode`] collapses it to `None` for the cache read path.

use rowcache_core::CodecError;
use serde::{de::DeserializeOwned, Serialize};

pub const TAG_INTEGER: u8 = 0x01;
pub const TAG_BLOB: u8 = 0x02;

const INTEGER_LEN: usize = 8;
const LENGTH_PREFIX_LEN: usize = 4;

/// A decoded cache payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Integer(i64),
    Blob(Vec<u8>),
}

impl Payload {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Payload::Integer(n) => Some(*n),
            Payload::Blob(_) => None,
        }
    }

    pub fn into_blob(self) -> Option<Vec<u8>> {
        match self {
            Payload::Blob(bytes) => Some(bytes),
            Payload::Integer(_) => None,
        }
    }
}

pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    match payload {
        Payload::Integer(n) => Ok(encode_integer(*n)),
        Payload::Blob(bytes) => encode_blob(bytes),
    }
}

pub fn encode_integer(n: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + INTEGER_LEN);
    out.push(TAG_INTEGER);
    out.extend_from_slice(&n.to_be_bytes());
    out
}

pub fn encode_blob(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge { len: bytes.len() })?;
    let mut out = Vec::with_capacity(1 + LENGTH_PREFIX_LEN + bytes.len());
    out.push(TAG_BLOB);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Decode a payload, naming what is wrong with it.
pub fn try_decode(raw: &[u8]) -> Result<Payload, CodecError> {
    let (&tag, body) = raw.split_first().ok_or(CodecError::Empty)?;
    match tag {
        TAG_INTEGER => {
            let bytes: [u8; INTEGER_LEN] = exact(body, INTEGER_LEN)?
                .try_into()
                .map_err(|_| CodecError::Truncated {
                    expected: INTEGER_LEN,
                    got: body.len(),
                })?;
            Ok(Payload::Integer(i64::from_be_bytes(bytes)))
        }
        TAG_BLOB => {
            if body.len() < LENGTH_PREFIX_LEN {
                return Err(CodecError::Truncated {
                    expected: LENGTH_PREFIX_LEN,
                    got: body.len(),
                });
            }
            let (prefix, data) = body.split_at(LENGTH_PREFIX_LEN);
            let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
            len_bytes.copy_from_slice(prefix);
            let len = u32::from_be_bytes(len_bytes) as usize;
            Ok(Payload::Blob(exact(data, len)?.to_vec()))
        }
        other => Err(CodecError::UnknownTag { tag: other }),
    }
}

fn exact(body: &[u8], expected: usize) -> Result<&[u8], CodecError> {
    match body.len() {
        got if got < expected => Err(CodecError::Truncated { expected, got }),
        got if got > expected => Err(CodecError::TrailingBytes {
            extra: got - expected,
        }),
        _ => Ok(body),
    }
}

/// Decode a payload; any corruption yields `None`.
pub fn decode(raw: &[u8]) -> Option<Payload> {
    try_decode(raw).ok()
}

/// Encode a serializable value as a JSON blob.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(value).map_err(|e| CodecError::Serialization {
        reason: e.to_string(),
    })?;
    encode_blob(&json)
}

/// Decode a JSON blob written by [`encode_json`].
pub fn decode_json<T: DeserializeOwned>(raw: &[u8]) -> Result<T, CodecError> {
    let bytes = try_decode(raw)?
        .into_blob()
        .ok_or_else(|| CodecError::Deserialization {
            reason: "expected blob payload, found integer".to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| CodecError::Deserialization {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_layout() {
        let encoded = encode_integer(258);
        assert_eq!(encoded, vec![TAG_INTEGER, 0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(decode(&encoded), Some(Payload::Integer(258)));
    }

    #[test]
    fn test_blob_layout() {
        let encoded = encode_blob(b"ab").unwrap();
        assert_eq!(encoded, vec![TAG_BLOB, 0, 0, 0, 2, b'a', b'b']);
        assert_eq!(decode(&encoded), Some(Payload::Blob(b"ab".to_vec())));
    }

    #[test]
    fn test_integer_and_blob_are_distinct() {
        let int = encode(&Payload::Integer(7)).unwrap();
        let blob = encode(&Payload::Blob(b"7".to_vec())).unwrap();
        assert_ne!(int, blob);
        assert_eq!(decode(&int).and_then(|p| p.as_integer()), Some(7));
        assert_eq!(decode(&blob).and_then(|p| p.as_integer()), None);
    }

    #[test]
    fn test_empty_blob() {
        let encoded = encode_blob(&[]).unwrap();
        assert_eq!(decode(&encoded), Some(Payload::Blob(Vec::new())));
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(try_decode(&[]), Err(CodecError::Empty));
        assert_eq!(try_decode(&[0x7f]), Err(CodecError::UnknownTag { tag: 0x7f }));
        assert_eq!(
            try_decode(&[TAG_INTEGER, 1, 2]),
            Err(CodecError::Truncated {
                expected: 8,
                got: 2
            })
        );
        assert_eq!(
            try_decode(&[TAG_BLOB, 0, 0, 0, 1, b'a', b'b']),
            Err(CodecError::TrailingBytes { extra: 1 })
        );
        assert_eq!(
            try_decode(&[TAG_BLOB, 0, 0]),
            Err(CodecError::Truncated {
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let value = serde_json::json!({"id": 1, "name": "root"});
        let encoded = encode_json(&value).unwrap();
        let decoded: serde_json::Value = decode_json(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_json_rejects_integer_payload() {
        let result: Result<serde_json::Value, _> = decode_json(&encode_integer(1));
        assert!(matches!(result, Err(CodecError::Deserialization { .. })));
    }
}
