// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change records: the immutable unit every device appends to its log.
//!
//! A change is either a snapshot (full materialised state plus the log heads
//! it observed) or a delta (an ordered list of content operations). The
//! payload is a tagged variant so "is this a snapshot" and "does this touch
//! metadata" are pure functions over the record.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A single block inside a snapshot.
///
/// Block contents belong to the document layer; the engine only counts
/// blocks (see [`SnapshotPayload::is_empty`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block identifier, unique within the smartblock.
    pub id: String,
    /// Ordered child block ids.
    #[serde(default)]
    pub children_ids: Vec<String>,
    /// Opaque block fields.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Materialised state carried by a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// All blocks of the smartblock at snapshot time.
    #[serde(default)]
    pub blocks: Vec<BlockRecord>,
    /// Object details (key → JSON-encoded value).
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    /// Relation keys attached to the object.
    #[serde(default)]
    pub relation_keys: Vec<String>,
    /// Object type urls.
    #[serde(default)]
    pub object_types: Vec<String>,
}

/// Snapshot payload: optional state plus the log heads the author had seen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    /// Materialised state; `None` for bare synchronisation snapshots.
    #[serde(default)]
    pub data: Option<SnapshotData>,
    /// Log id → head change id observed when the snapshot was taken.
    #[serde(default)]
    pub log_heads: BTreeMap<String, String>,
    /// File hash → encryption key references.
    #[serde(default)]
    pub file_keys: BTreeMap<String, String>,
}

impl SnapshotPayload {
    /// Number of blocks in the snapshot (0 when there is no data).
    pub fn block_count(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.blocks.len())
    }

    /// Returns `true` when the snapshot carries no data or at most
    /// `max_blocks` blocks.
    pub fn is_empty(&self, max_blocks: usize) -> bool {
        self.data.is_none() || self.block_count() <= max_blocks
    }
}

/// Event embedded in a block update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BlockEvent {
    /// Text content of a block changed.
    Text {
        /// Target block.
        block_id: String,
        /// New text.
        text: String,
    },
    /// Arbitrary block fields changed.
    Fields {
        /// Target block.
        block_id: String,
        /// Replaced fields.
        fields: BTreeMap<String, String>,
    },
    /// A relation was set on a dataview block.
    DataviewRelationSet {
        /// Target dataview block.
        block_id: String,
        /// Relation key.
        relation_key: String,
    },
    /// A relation was removed from a dataview block.
    DataviewRelationDelete {
        /// Target dataview block.
        block_id: String,
        /// Relation key.
        relation_key: String,
    },
    /// A dataview view was replaced.
    DataviewViewSet {
        /// Target dataview block.
        block_id: String,
        /// View identifier.
        view_id: String,
    },
}

impl BlockEvent {
    /// Returns `true` for dataview relation set/delete events.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Self::DataviewRelationSet { .. } | Self::DataviewRelationDelete { .. }
        )
    }
}

/// One delta operation inside a change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ContentOp {
    /// Set an object detail.
    DetailsSet {
        /// Detail key.
        key: String,
        /// JSON-encoded value.
        value: String,
    },
    /// Remove an object detail.
    DetailsUnset {
        /// Detail key.
        key: String,
    },
    /// Attach a relation to the object.
    RelationAdd {
        /// Relation key.
        relation_key: String,
    },
    /// Detach a relation from the object.
    RelationRemove {
        /// Relation key.
        relation_key: String,
    },
    /// Add an object type.
    ObjectTypeAdd {
        /// Object type url.
        url: String,
    },
    /// Remove an object type.
    ObjectTypeRemove {
        /// Object type url.
        url: String,
    },
    /// Set a value in the object's key/value store.
    StoreKeySet {
        /// Key path.
        path: Vec<String>,
        /// JSON-encoded value.
        value: String,
    },
    /// Remove a value from the object's key/value store.
    StoreKeyUnset {
        /// Key path.
        path: Vec<String>,
    },
    /// Create blocks.
    BlockCreate {
        /// Block the new blocks are positioned against.
        target_id: String,
        /// Created blocks.
        blocks: Vec<BlockRecord>,
    },
    /// Apply events to existing blocks.
    BlockUpdate {
        /// Events in application order.
        events: Vec<BlockEvent>,
    },
    /// Remove blocks.
    BlockRemove {
        /// Removed block ids.
        ids: Vec<String>,
    },
    /// Move blocks.
    BlockMove {
        /// Block the moved blocks are positioned against.
        target_id: String,
        /// Moved block ids.
        ids: Vec<String>,
    },
}

impl ContentOp {
    /// Returns `true` when the operation touches object metadata.
    pub fn is_meta(&self) -> bool {
        match self {
            Self::DetailsSet { .. }
            | Self::DetailsUnset { .. }
            | Self::RelationAdd { .. }
            | Self::RelationRemove { .. }
            | Self::ObjectTypeAdd { .. }
            | Self::ObjectTypeRemove { .. }
            | Self::StoreKeySet { .. }
            | Self::StoreKeyUnset { .. } => true,
            Self::BlockUpdate { events } => events.iter().any(BlockEvent::is_meta),
            Self::BlockCreate { .. } | Self::BlockRemove { .. } | Self::BlockMove { .. } => false,
        }
    }
}

/// Snapshot-or-delta payload of a change.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangePayload {
    /// Full state. Shared so virtual snapshots can alias a parent's payload.
    Snapshot(Arc<SnapshotPayload>),
    /// Ordered delta operations.
    Delta(Vec<ContentOp>),
}

/// Immutable, content-addressed change record.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    /// Content-addressed identifier.
    pub id: String,
    /// Authoring account.
    pub account: String,
    /// Authoring device; also the id of the log the change lives in.
    pub device: String,
    /// Ordered parent ids; empty only for a root.
    pub previous_ids: Vec<String>,
    /// Ordered parent ids in the metadata-only projection.
    pub previous_meta_ids: Vec<String>,
    /// Most recent snapshot in the ancestry; empty iff this is a root snapshot.
    pub last_snapshot_id: String,
    /// Snapshot or delta payload.
    pub payload: ChangePayload,
    /// Author wall-clock (advisory only).
    pub timestamp: i64,
}

impl Change {
    /// Returns the snapshot payload when this change is a snapshot.
    pub fn snapshot(&self) -> Option<&SnapshotPayload> {
        match &self.payload {
            ChangePayload::Snapshot(snapshot) => Some(snapshot),
            ChangePayload::Delta(_) => None,
        }
    }

    /// Returns `true` when this change is a snapshot.
    pub fn is_snapshot(&self) -> bool {
        matches!(self.payload, ChangePayload::Snapshot(_))
    }

    /// Delta operations; empty for snapshots.
    pub fn content(&self) -> &[ContentOp] {
        match &self.payload {
            ChangePayload::Snapshot(_) => &[],
            ChangePayload::Delta(ops) => ops,
        }
    }

    /// Snapshot-bearing changes and changes with at least one meta-class
    /// operation have metadata impact.
    pub fn has_meta(&self) -> bool {
        match &self.payload {
            ChangePayload::Snapshot(_) => true,
            ChangePayload::Delta(ops) => ops.iter().any(ContentOp::is_meta),
        }
    }

    /// Own id for a snapshot, `last_snapshot_id` otherwise.
    pub fn get_last_snapshot_id(&self) -> &str {
        if self.is_snapshot() {
            &self.id
        } else {
            &self.last_snapshot_id
        }
    }

    /// Parent ids in the requested projection.
    pub fn parents(&self, only_meta: bool) -> &[String] {
        if only_meta {
            &self.previous_meta_ids
        } else {
            &self.previous_ids
        }
    }
}
