//! Wire codec for message batches.
//!
//! A batch travels as a JSON array of `{"command": <tag>, "data": <text>}`
//! records. Payloads are opaque bytes to the rest of the crate; on the wire
//! they are carried as UTF-8 text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tagged message as seen by producers and handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Logical sub-channel the message belongs to.
    pub tag: String,

    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(tag: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag.into(),
            payload: payload.into(),
        }
    }
}

/// An ordered group of messages exchanged in one transport round-trip.
pub type Batch = Vec<Message>;

/// On-the-wire record.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage<'a> {
    #[serde(borrow)]
    command: std::borrow::Cow<'a, str>,
    #[serde(borrow)]
    data: std::borrow::Cow<'a, str>,
}

/// Errors from decoding an inbound batch.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed batch: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a batch to wire bytes.
///
/// Payload bytes that are not valid UTF-8 are replaced with U+FFFD. The
/// empty batch encodes to `[]`.
pub fn encode(batch: &[Message]) -> Vec<u8> {
    let records: Vec<WireMessage<'_>> = batch
        .iter()
        .map(|m| WireMessage {
            command: m.tag.as_str().into(),
            data: String::from_utf8_lossy(&m.payload),
        })
        .collect();
    // A Vec of string pairs always serializes.
    serde_json::to_vec(&records).unwrap_or_else(|_| b"[]".to_vec())
}

/// Decode wire bytes into a batch.
///
/// An empty (or whitespace-only) body and a JSON `null` both mean "no
/// messages".
pub fn decode(bytes: &[u8]) -> Result<Batch, DecodeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let records: Option<Vec<WireMessage<'_>>> = serde_json::from_slice(bytes)?;
    Ok(records
        .unwrap_or_default()
        .into_iter()
        .map(|r| Message {
            tag: r.command.into_owned(),
            payload: r.data.into_owned().into_bytes(),
        })
        .collect())
}

/// Turn a drained per-tag snapshot into a batch, one message per tag.
pub fn coalesce(drained: BTreeMap<String, Vec<u8>>) -> Batch {
    drained
        .into_iter()
        .map(|(tag, payload)| Message { tag, payload })
        .collect()
}
