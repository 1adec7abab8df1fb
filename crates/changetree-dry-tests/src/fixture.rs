// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change builders for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use changetree_core::{
    BlockEvent, BlockRecord, Change, ChangePayload, ContentOp, SnapshotData, SnapshotPayload,
};

/// Converts a slice of string literals into owned ids.
pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

/// Builder for [`Change`] values.
///
/// Deltas default to `last_snapshot_id = "root"`; snapshots default to no
/// data (an "empty" snapshot). Unless [`ChangeFixture::meta_prev`] is
/// called, `previous_meta_ids` mirrors `previous_ids`.
///
/// # Example
///
/// ```
/// use changetree_dry_tests::ChangeFixture;
///
/// let root = ChangeFixture::snapshot("root").device("L1").blocks(3).build();
/// let a = ChangeFixture::delta("A").device("L1").prev(&["root"]).details_set("name").build();
///
/// assert!(root.is_snapshot());
/// assert_eq!(a.previous_ids, vec!["root"]);
/// assert!(a.has_meta());
/// ```
#[derive(Clone, Debug)]
pub struct ChangeFixture {
    id: String,
    account: String,
    device: String,
    previous_ids: Vec<String>,
    previous_meta_ids: Option<Vec<String>>,
    last_snapshot_id: String,
    snapshot: Option<SnapshotPayload>,
    ops: Vec<ContentOp>,
    timestamp: i64,
}

impl ChangeFixture {
    /// Start a snapshot change.
    pub fn snapshot(id: &str) -> Self {
        Self {
            snapshot: Some(SnapshotPayload::default()),
            last_snapshot_id: String::new(),
            ..Self::base(id)
        }
    }

    /// Start a delta change.
    pub fn delta(id: &str) -> Self {
        Self::base(id)
    }

    fn base(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            account: "account".to_owned(),
            device: "device".to_owned(),
            previous_ids: Vec::new(),
            previous_meta_ids: None,
            last_snapshot_id: "root".to_owned(),
            snapshot: None,
            ops: Vec::new(),
            timestamp: 0,
        }
    }

    /// Set the authoring device, which is also the log id.
    pub fn device(mut self, device: &str) -> Self {
        device.clone_into(&mut self.device);
        self
    }

    /// Set the authoring account.
    pub fn account(mut self, account: &str) -> Self {
        account.clone_into(&mut self.account);
        self
    }

    /// Set `previous_ids`.
    pub fn prev(mut self, parents: &[&str]) -> Self {
        self.previous_ids = ids(parents);
        self
    }

    /// Set `previous_meta_ids` independently of `previous_ids`.
    pub fn meta_prev(mut self, parents: &[&str]) -> Self {
        self.previous_meta_ids = Some(ids(parents));
        self
    }

    /// Set `last_snapshot_id`.
    pub fn last(mut self, snapshot_id: &str) -> Self {
        snapshot_id.clone_into(&mut self.last_snapshot_id);
        self
    }

    /// Set the authoring timestamp.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Append a content operation (deltas only).
    pub fn op(mut self, op: ContentOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Append a details-set operation (metadata).
    pub fn details_set(self, key: &str) -> Self {
        self.op(ContentOp::DetailsSet {
            key: key.to_owned(),
            value: "\"value\"".to_owned(),
        })
    }

    /// Append a relation-add operation (metadata).
    pub fn relation_add(self, relation_key: &str) -> Self {
        self.op(ContentOp::RelationAdd {
            relation_key: relation_key.to_owned(),
        })
    }

    /// Append a block text update (not metadata).
    pub fn text_update(self, block_id: &str) -> Self {
        self.op(ContentOp::BlockUpdate {
            events: vec![BlockEvent::Text {
                block_id: block_id.to_owned(),
                text: "text".to_owned(),
            }],
        })
    }

    /// Give the snapshot `count` blocks (snapshots only).
    pub fn blocks(mut self, count: usize) -> Self {
        if let Some(snapshot) = self.snapshot.as_mut() {
            let data = snapshot.data.get_or_insert_with(SnapshotData::default);
            data.blocks = (0..count)
                .map(|i| BlockRecord {
                    id: format!("block-{i}"),
                    children_ids: Vec::new(),
                    fields: BTreeMap::new(),
                })
                .collect();
        }
        self
    }

    /// Declare a log head observed by the snapshot (snapshots only).
    pub fn log_head(mut self, log_id: &str, head_id: &str) -> Self {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot
                .log_heads
                .insert(log_id.to_owned(), head_id.to_owned());
        }
        self
    }

    /// Build the change.
    pub fn build(self) -> Change {
        let previous_meta_ids = self
            .previous_meta_ids
            .unwrap_or_else(|| self.previous_ids.clone());
        let payload = match self.snapshot {
            Some(snapshot) => ChangePayload::Snapshot(Arc::new(snapshot)),
            None => ChangePayload::Delta(self.ops),
        };
        Change {
            id: self.id,
            account: self.account,
            device: self.device,
            previous_ids: self.previous_ids,
            previous_meta_ids,
            last_snapshot_id: self.last_snapshot_id,
            payload,
            timestamp: self.timestamp,
        }
    }

    /// Build the change behind an `Arc`.
    pub fn build_arc(self) -> Arc<Change> {
        Arc::new(self.build())
    }
}
