// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-demand change loading with a per-build memo cache.
//!
//! The loader is the only component that talks to the record store during a
//! build. It owns the canonical copy of every change for the build's
//! lifetime; the tree and traversal share those copies by `Arc`.
//!
//! Responsibilities:
//! - materialise virtual snapshots from their ids;
//! - decode records, accepting partially decoded ones whose parents survive;
//! - project parents through `previous_meta_ids` in metadata mode;
//! - poll cancellation around every store call;
//! - keep load latency statistics and report slow loads.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::cancel::CancelToken;
use crate::change::{Change, ChangePayload, SnapshotPayload};
use crate::codec::{decode_change, Decoded};
use crate::config::{BuildConfig, BuildOptions};
use crate::error::TreeError;
use crate::ident::{decode_virtual_id, is_virtual_id};
use crate::store::{LogDescriptor, RecordStore};

/// Record load counters for one build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Number of records fetched from the store (cache hits excluded).
    pub loads: u64,
    /// Total time spent inside `get_record`.
    pub total: Duration,
    /// Slowest single fetch.
    pub slowest: Duration,
}

/// Memoising change loader bound to one record store and one build.
pub struct ChangeLoader<'s, S: ?Sized> {
    store: &'s S,
    cache: HashMap<String, Arc<Change>>,
    only_meta: bool,
    config: BuildConfig,
    cancel: CancelToken,
    origin: Option<LogDescriptor>,
    stats: LoadStats,
}

impl<'s, S: RecordStore + ?Sized> ChangeLoader<'s, S> {
    /// Creates a loader with an empty cache.
    pub fn new(store: &'s S, only_meta: bool, options: &BuildOptions) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            only_meta,
            config: options.config.clone(),
            cancel: options.cancel.clone(),
            origin: None,
            stats: LoadStats::default(),
        }
    }

    /// The record store this loader reads from.
    pub fn store(&self) -> &'s S {
        self.store
    }

    /// Whether parents are projected through `previous_meta_ids`.
    pub fn only_meta(&self) -> bool {
        self.only_meta
    }

    /// Build tunables.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Cancellation token of the build.
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Load statistics so far.
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Log whose history is currently being walked; attached to slow-load
    /// diagnostics.
    pub fn set_origin(&mut self, origin: Option<LogDescriptor>) {
        self.origin = origin;
    }

    /// Returns the cached change without touching the store.
    pub fn cached(&self, id: &str) -> Option<&Arc<Change>> {
        self.cache.get(id)
    }

    /// Loads `id`, from cache when possible.
    ///
    /// # Errors
    ///
    /// - [`TreeError::Cancelled`] if the token fires around a store call.
    /// - [`TreeError::InvalidVirtualId`] for undecodable virtual ids.
    /// - [`TreeError::RecordFetchFailed`] for store failures.
    /// - [`TreeError::CorruptRecord`] for payloads without recoverable parents.
    pub fn load_change(&mut self, id: &str) -> Result<Arc<Change>, TreeError> {
        if let Some(change) = self.cache.get(id) {
            return Ok(Arc::clone(change));
        }
        let change = if is_virtual_id(id) {
            self.materialise_virtual(id)?
        } else {
            self.fetch(id)?
        };
        let change = Arc::new(change);
        self.cache.insert(id.to_owned(), Arc::clone(&change));
        Ok(change)
    }

    /// Replaces the parents of a cached change.
    ///
    /// Used by the breakpoint finder to hang two disjoint snapshots off a
    /// virtual root. Both projections are patched so metadata builds see the
    /// same root.
    pub(crate) fn patch_parents(&mut self, id: &str, parents: &[String]) {
        if let Some(entry) = self.cache.get_mut(id) {
            let change = Arc::make_mut(entry);
            change.previous_ids = parents.to_vec();
            change.previous_meta_ids = parents.to_vec();
        }
    }

    fn materialise_virtual(&mut self, id: &str) -> Result<Change, TreeError> {
        let (s1, s2) = decode_virtual_id(id).ok_or_else(|| TreeError::InvalidVirtualId {
            id: id.to_owned(),
        })?;
        let c1 = self.load_change(&s1)?;
        self.load_change(&s2)?;
        let snapshot = match &c1.payload {
            ChangePayload::Snapshot(snapshot) => Arc::clone(snapshot),
            ChangePayload::Delta(_) => Arc::new(SnapshotPayload::default()),
        };
        Ok(Change {
            id: id.to_owned(),
            account: c1.account.clone(),
            device: c1.device.clone(),
            previous_ids: Vec::new(),
            previous_meta_ids: Vec::new(),
            last_snapshot_id: String::new(),
            payload: ChangePayload::Snapshot(snapshot),
            timestamp: c1.timestamp,
        })
    }

    fn fetch(&mut self, id: &str) -> Result<Change, TreeError> {
        self.cancel.check()?;
        let started = Instant::now();
        let fetched = self.store.get_record(id);
        let elapsed = started.elapsed();
        self.observe(id, elapsed);
        self.cancel.check()?;

        let envelope = fetched.map_err(|source| TreeError::RecordFetchFailed {
            id: id.to_owned(),
            source,
        })?;
        let mut change = match decode_change(&envelope) {
            Ok(Decoded::Full(change)) => change,
            Ok(Decoded::Partial { change, reason }) => {
                warn!(
                    smartblock = self.store.id(),
                    change_id = id,
                    %reason,
                    "change decoded partially; keeping parent pointers"
                );
                change
            }
            Err(err) => {
                return Err(TreeError::CorruptRecord {
                    id: id.to_owned(),
                    reason: err.to_string(),
                })
            }
        };
        if self.only_meta {
            change.previous_ids.clone_from(&change.previous_meta_ids);
        }
        Ok(change)
    }

    fn observe(&mut self, id: &str, elapsed: Duration) {
        self.stats.loads += 1;
        self.stats.total += elapsed;
        self.stats.slowest = self.stats.slowest.max(elapsed);
        if elapsed > self.config.slow_load_threshold() {
            let (log_id, log_head) = self
                .origin
                .as_ref()
                .map_or(("", ""), |o| (o.log_id.as_str(), o.head_id.as_str()));
            warn!(
                smartblock = self.store.id(),
                change_id = id,
                log_id,
                log_head,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                total_ms = u64::try_from(self.stats.total.as_millis()).unwrap_or(u64::MAX),
                "slow change load"
            );
        }
    }
}
