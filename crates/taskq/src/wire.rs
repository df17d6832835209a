//! Presence-prefixed task frames.
//!
//! A task on the wire is `[presence:1][kind_tag + body]`. Presence `0`
//! encodes the null task: replies that carry no work use it, and the rest
//! of the buffer is ignored. The tag/body pair is one MessagePack value so
//! the body stays opaque to everything but the matching task kind.

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// Decoded frame: the kind tag plus the opaque body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFrame {
    pub kind: String,
    pub body: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FrameParts {
    kind: String,
    #[serde(with = "body_bytes")]
    body: Vec<u8>,
}

/// Encode a frame, or the null task when `frame` is `None`.
pub fn encode_frame(frame: Option<&TaskFrame>) -> Result<Vec<u8>, QueueError> {
    match frame {
        None => Ok(vec![ABSENT]),
        Some(frame) => {
            let parts = FrameParts {
                kind: frame.kind.clone(),
                body: frame.body.clone(),
            };
            let encoded = rmp_serde::to_vec(&parts)
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            let mut out = Vec::with_capacity(1 + encoded.len());
            out.push(PRESENT);
            out.extend_from_slice(&encoded);
            Ok(out)
        }
    }
}

/// Decode a frame; `Ok(None)` is the null task.
pub fn decode_frame(buf: &[u8]) -> Result<Option<TaskFrame>, QueueError> {
    let (&presence, rest) = buf.split_first().ok_or(QueueError::TruncatedStream)?;
    match presence {
        ABSENT => Ok(None),
        PRESENT => {
            let parts: FrameParts =
                rmp_serde::from_slice(rest).map_err(|_| QueueError::TruncatedStream)?;
            Ok(Some(TaskFrame {
                kind: parts.kind,
                body: parts.body,
            }))
        }
        _ => Err(QueueError::TruncatedStream),
    }
}

mod body_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_task_is_one_byte() {
        let encoded = encode_frame(None).unwrap();
        assert_eq!(encoded, vec![0]);
        assert_eq!(decode_frame(&encoded).unwrap(), None);
    }

    #[test]
    fn frame_roundtrip() {
        let frame = TaskFrame {
            kind: "square".into(),
            body: vec![1, 2, 3, 4],
        };
        let encoded = encode_frame(Some(&frame)).unwrap();
        assert_eq!(encoded[0], 1);
        assert_eq!(decode_frame(&encoded).unwrap(), Some(frame));
    }

    #[test]
    fn empty_buffer_is_truncated() {
        assert!(matches!(
            decode_frame(&[]),
            Err(QueueError::TruncatedStream)
        ));
    }

    #[test]
    fn underflowing_body_is_truncated() {
        let frame = TaskFrame {
            kind: "square".into(),
            body: vec![9; 32],
        };
        let encoded = encode_frame(Some(&frame)).unwrap();
        assert!(matches!(
            decode_frame(&encoded[..encoded.len() / 2]),
            Err(QueueError::TruncatedStream)
        ));
    }

    #[test]
    fn bad_presence_byte_is_truncated() {
        assert!(matches!(
            decode_frame(&[7, 0, 0]),
            Err(QueueError::TruncatedStream)
        ));
    }
}
