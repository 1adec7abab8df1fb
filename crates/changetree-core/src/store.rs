// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record store port and its in-memory implementation.
//!
//! The record store is the peer-to-peer thread layer that owns the per-device
//! logs. The engine is read-only against it: it enumerates logs and fetches
//! records by id. Retries, replication and persistence are the store's
//! business.
//!
//! # Key Types
//!
//! - [`RecordStore`]: the port the engine consumes.
//! - [`MemoryRecordStore`]: ordered in-memory implementation.
//! - [`BeforeStore`]: decorator that presents the history of one change as a
//!   log set (used by [`build_tree_before`](crate::build_tree_before)).
use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::change::Change;
use crate::codec::{decode_change, encode_change, CodecError, Decoded};

/// Errors reported by record store implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("record not found: {id}")]
    NotFound {
        /// Requested id.
        id: String,
    },
    /// Backend failure (I/O, network, decryption, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Head of one device log as published by the record store.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogDescriptor {
    /// Log id (the authoring device).
    pub log_id: String,
    /// Id of the newest change in the log; empty for an empty log.
    pub head_id: String,
    /// Number of records in the log.
    pub head_counter: u64,
}

/// Raw record as returned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordEnvelope {
    /// Record (change) id.
    pub id: String,
    /// Authoring account.
    pub account: String,
    /// Authoring device / log id.
    pub device: String,
    /// Encoded change payload (see [`crate::codec`]).
    pub payload: Vec<u8>,
}

/// Read-only access to the logs of a single smartblock.
pub trait RecordStore {
    /// Smartblock identifier, used for diagnostics.
    fn id(&self) -> &str;

    /// Enumerates all known logs with their heads.
    fn get_logs(&self) -> Result<Vec<LogDescriptor>, StoreError>;

    /// Fetches one record by id.
    fn get_record(&self, id: &str) -> Result<RecordEnvelope, StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn get_logs(&self) -> Result<Vec<LogDescriptor>, StoreError> {
        (**self).get_logs()
    }

    fn get_record(&self, id: &str) -> Result<RecordEnvelope, StoreError> {
        (**self).get_record(id)
    }
}

/// In-memory record store keyed by log id and record id.
///
/// Logs are kept in a `BTreeMap`, so [`get_logs`](RecordStore::get_logs)
/// returns them in ascending log id order.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecordStore {
    smartblock_id: String,
    logs: BTreeMap<String, LogDescriptor>,
    records: HashMap<String, RecordEnvelope>,
}

impl MemoryRecordStore {
    /// Creates an empty store for `smartblock_id`.
    pub fn new(smartblock_id: impl Into<String>) -> Self {
        Self {
            smartblock_id: smartblock_id.into(),
            ..Self::default()
        }
    }

    /// Encodes `change`, stores it and makes it the head of its device log.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the change cannot be serialised.
    pub fn put_change(&mut self, change: &Change) -> Result<(), CodecError> {
        let payload = encode_change(change)?;
        self.put_raw(RecordEnvelope {
            id: change.id.clone(),
            account: change.account.clone(),
            device: change.device.clone(),
            payload,
        });
        Ok(())
    }

    /// Stores an envelope verbatim and makes it the head of its device log.
    pub fn put_raw(&mut self, envelope: RecordEnvelope) {
        let log = self
            .logs
            .entry(envelope.device.clone())
            .or_insert_with(|| LogDescriptor {
                log_id: envelope.device.clone(),
                ..LogDescriptor::default()
            });
        log.head_id.clone_from(&envelope.id);
        log.head_counter += 1;
        self.records.insert(envelope.id.clone(), envelope);
    }

    /// Stores an envelope without touching any log head.
    pub fn put_detached(&mut self, envelope: RecordEnvelope) {
        self.records.insert(envelope.id.clone(), envelope);
    }

    /// Overrides the head of `log_id`, creating the log if needed.
    pub fn set_head(&mut self, log_id: &str, head_id: &str) {
        let log = self
            .logs
            .entry(log_id.to_owned())
            .or_insert_with(|| LogDescriptor {
                log_id: log_id.to_owned(),
                ..LogDescriptor::default()
            });
        head_id.clone_into(&mut log.head_id);
    }

    /// Removes a log; its records stay fetchable.
    pub fn remove_log(&mut self, log_id: &str) {
        self.logs.remove(log_id);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn id(&self) -> &str {
        &self.smartblock_id
    }

    fn get_logs(&self) -> Result<Vec<LogDescriptor>, StoreError> {
        Ok(self.logs.values().cloned().collect())
    }

    fn get_record(&self, id: &str) -> Result<RecordEnvelope, StoreError> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
    }
}

/// Presents the history ending at one change as a log set.
///
/// With `include_before`, the single log head is `before_id` itself;
/// otherwise every parent of `before_id` becomes its own pseudo-log whose id
/// and head are the parent id. Record fetches go straight to the inner store.
pub struct BeforeStore<S> {
    inner: S,
    before_id: String,
    include_before: bool,
}

impl<S: RecordStore> BeforeStore<S> {
    /// Wraps `inner` for a history build ending at `before_id`.
    pub fn new(inner: S, before_id: impl Into<String>, include_before: bool) -> Self {
        Self {
            inner,
            before_id: before_id.into(),
            include_before,
        }
    }
}

impl<S: RecordStore> RecordStore for BeforeStore<S> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn get_logs(&self) -> Result<Vec<LogDescriptor>, StoreError> {
        if self.include_before {
            return Ok(vec![LogDescriptor {
                log_id: self.before_id.clone(),
                head_id: self.before_id.clone(),
                head_counter: 0,
            }]);
        }
        let envelope = self.inner.get_record(&self.before_id)?;
        let change = match decode_change(&envelope) {
            Ok(Decoded::Full(change) | Decoded::Partial { change, .. }) => change,
            Err(err) => return Err(StoreError::Backend(err.to_string())),
        };
        Ok(change
            .previous_ids
            .into_iter()
            .map(|pid| LogDescriptor {
                log_id: pid.clone(),
                head_id: pid,
                head_counter: 0,
            })
            .collect())
    }

    fn get_record(&self, id: &str) -> Result<RecordEnvelope, StoreError> {
        self.inner.get_record(id)
    }
}
