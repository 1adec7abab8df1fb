// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CBOR wire codec for change records.
//!
//! The envelope (id, account, device) comes from the record store; the
//! payload bytes carry everything else as a CBOR map. Decoding is lenient in
//! one specific way: when the full record does not decode but its parent
//! pointers do, the change is still usable for building the DAG and is
//! returned as [`Decoded::Partial`].
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::{Change, ChangePayload, ContentOp, SnapshotPayload};
use crate::store::RecordEnvelope;

/// Wire codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Serialising a change failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// The payload is not a valid change record.
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Serialize, Deserialize)]
struct ChangeRecord {
    #[serde(default)]
    previous_ids: Vec<String>,
    #[serde(default)]
    previous_meta_ids: Vec<String>,
    #[serde(default)]
    last_snapshot_id: String,
    #[serde(default)]
    snapshot: Option<SnapshotPayload>,
    #[serde(default)]
    content: Vec<ContentOp>,
    #[serde(default)]
    timestamp: i64,
}

// Unknown or malformed fields are skipped; only the parent pointers matter.
#[derive(Deserialize)]
struct ParentsOnly {
    previous_ids: Vec<String>,
    #[serde(default)]
    previous_meta_ids: Vec<String>,
    #[serde(default)]
    last_snapshot_id: String,
}

/// Outcome of decoding a record payload.
#[derive(Debug)]
pub enum Decoded {
    /// The full record decoded.
    Full(Change),
    /// Only parent pointers were recoverable; the change is an empty delta.
    Partial {
        /// The recovered change.
        change: Change,
        /// Why the full decode failed.
        reason: String,
    },
}

/// Encodes the payload bytes for `change`.
///
/// `id`, `account` and `device` are not part of the payload; they travel in
/// the [`RecordEnvelope`].
pub fn encode_change(change: &Change) -> Result<Vec<u8>, CodecError> {
    let (snapshot, content) = match &change.payload {
        ChangePayload::Snapshot(snapshot) => (Some(SnapshotPayload::clone(snapshot)), Vec::new()),
        ChangePayload::Delta(ops) => (None, ops.clone()),
    };
    let record = ChangeRecord {
        previous_ids: change.previous_ids.clone(),
        previous_meta_ids: change.previous_meta_ids.clone(),
        last_snapshot_id: change.last_snapshot_id.clone(),
        snapshot,
        content,
        timestamp: change.timestamp,
    };
    let mut out = Vec::new();
    ciborium::ser::into_writer(&record, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a record envelope into a change.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when neither the full record nor its parent
/// pointers can be decoded.
pub fn decode_change(envelope: &RecordEnvelope) -> Result<Decoded, CodecError> {
    match ciborium::de::from_reader::<ChangeRecord, _>(envelope.payload.as_slice()) {
        Ok(record) => {
            let payload = match record.snapshot {
                Some(snapshot) => ChangePayload::Snapshot(Arc::new(snapshot)),
                None => ChangePayload::Delta(record.content),
            };
            Ok(Decoded::Full(Change {
                id: envelope.id.clone(),
                account: envelope.account.clone(),
                device: envelope.device.clone(),
                previous_ids: record.previous_ids,
                previous_meta_ids: record.previous_meta_ids,
                last_snapshot_id: record.last_snapshot_id,
                payload,
                timestamp: record.timestamp,
            }))
        }
        Err(full_err) => {
            let reason = full_err.to_string();
            let parents: ParentsOnly = ciborium::de::from_reader(envelope.payload.as_slice())
                .map_err(|_| CodecError::Decode(reason.clone()))?;
            Ok(Decoded::Partial {
                change: Change {
                    id: envelope.id.clone(),
                    account: envelope.account.clone(),
                    device: envelope.device.clone(),
                    previous_ids: parents.previous_ids,
                    previous_meta_ids: parents.previous_meta_ids,
                    last_snapshot_id: parents.last_snapshot_id,
                    payload: ChangePayload::Delta(Vec::new()),
                    timestamp: 0,
                },
                reason,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::change::SnapshotData;

    fn envelope(id: &str, payload: Vec<u8>) -> RecordEnvelope {
        RecordEnvelope {
            id: id.into(),
            account: "acc".into(),
            device: "dev".into(),
            payload,
        }
    }

    #[test]
    fn snapshot_survives_the_wire() {
        let change = Change {
            id: "s".into(),
            account: "acc".into(),
            device: "dev".into(),
            previous_ids: Vec::new(),
            previous_meta_ids: Vec::new(),
            last_snapshot_id: String::new(),
            payload: ChangePayload::Snapshot(Arc::new(SnapshotPayload {
                data: Some(SnapshotData::default()),
                log_heads: [("dev2".to_owned(), "h".to_owned())].into(),
                ..SnapshotPayload::default()
            })),
            timestamp: 7,
        };
        let bytes = encode_change(&change).unwrap();
        match decode_change(&envelope("s", bytes)).unwrap() {
            Decoded::Full(decoded) => assert_eq!(decoded, change),
            Decoded::Partial { .. } => panic!("expected full decode"),
        }
    }

    #[test]
    fn recoverable_parents_yield_partial_change() {
        #[derive(Serialize)]
        struct Broken {
            previous_ids: Vec<String>,
            last_snapshot_id: String,
            content: &'static str,
        }
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(
            &Broken {
                previous_ids: vec!["p1".into(), "p2".into()],
                last_snapshot_id: "s".into(),
                content: "not a list",
            },
            &mut bytes,
        )
        .unwrap();
        match decode_change(&envelope("c", bytes)).unwrap() {
            Decoded::Partial { change, .. } => {
                assert_eq!(change.previous_ids, vec!["p1", "p2"]);
                assert_eq!(change.last_snapshot_id, "s");
                assert!(change.content().is_empty());
            }
            Decoded::Full(_) => panic!("expected partial decode"),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode_change(&envelope("c", vec![0xff, 0x00, 0x13])).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
