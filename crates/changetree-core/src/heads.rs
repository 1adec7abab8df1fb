// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Effective head resolution.
//!
//! Snapshots record the log heads their author had already seen. A log head
//! named in any scanned snapshot's `log_heads` is an ancestor of that
//! snapshot and does not need to be explored on its own.
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::warn;

use crate::change::Change;
use crate::error::TreeError;
use crate::loader::ChangeLoader;
use crate::store::{LogDescriptor, RecordStore};

/// Loads the snapshot nearest to `head_id`: the head itself when it is a
/// snapshot, otherwise the change named by its `last_snapshot_id`.
///
/// # Errors
///
/// Propagates load failures; a `last_snapshot_id` that points at a
/// non-snapshot is reported as [`TreeError::CorruptRecord`].
pub fn near_snapshot<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    head_id: &str,
) -> Result<Arc<Change>, TreeError> {
    let head = loader.load_change(head_id)?;
    if head.is_snapshot() {
        return Ok(head);
    }
    let snapshot = loader.load_change(&head.last_snapshot_id)?;
    if snapshot.is_snapshot() {
        Ok(snapshot)
    } else {
        Err(TreeError::CorruptRecord {
            id: head.id.clone(),
            reason: format!("last snapshot {} is not a snapshot", head.last_snapshot_id),
        })
    }
}

/// Filters `logs` down to the heads not subsumed by any snapshot's declared
/// log heads.
///
/// Logs are scanned in ascending log id order so every device reaches the
/// same answer. Logs whose nearest snapshot cannot be loaded are dropped with
/// a warning; cancellation still aborts.
///
/// # Errors
///
/// - [`TreeError::NoUsableHeads`] if no head survives.
/// - [`TreeError::Cancelled`] if the build is cancelled mid-scan.
pub fn resolve_heads<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    logs: &[LogDescriptor],
) -> Result<Vec<String>, TreeError> {
    let mut sorted: Vec<&LogDescriptor> = logs.iter().filter(|l| !l.head_id.is_empty()).collect();
    sorted.sort_by(|a, b| a.log_id.cmp(&b.log_id));

    let mut known_heads: BTreeSet<String> = BTreeSet::new();
    let mut valid: Vec<&LogDescriptor> = Vec::with_capacity(sorted.len());
    for log in sorted {
        if known_heads.contains(&log.head_id) {
            continue;
        }
        let snapshot = match near_snapshot(loader, &log.head_id) {
            Ok(snapshot) => snapshot,
            Err(TreeError::Cancelled) => return Err(TreeError::Cancelled),
            Err(err) => {
                warn!(
                    smartblock = loader.store().id(),
                    log_id = %log.log_id,
                    head_id = %log.head_id,
                    error = %err,
                    "cannot load nearest snapshot; ignoring log"
                );
                continue;
            }
        };
        if let Some(payload) = snapshot.snapshot() {
            known_heads.extend(payload.log_heads.values().cloned());
        }
        valid.push(log);
    }

    let heads: Vec<String> = valid
        .into_iter()
        .filter(|l| !known_heads.contains(&l.head_id))
        .map(|l| l.head_id.clone())
        .collect();
    if heads.is_empty() {
        return Err(TreeError::NoUsableHeads);
    }
    Ok(heads)
}
