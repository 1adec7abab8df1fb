// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Breakpoint (common snapshot) discovery.
//!
//! The breakpoint is the snapshot every surviving head descends from; it
//! becomes the tree root. Heads normally share a snapshot lineage and the
//! common ancestor is found by walking `last_snapshot_id` chains. When two
//! lineages are disjoint, a tie-break ladder picks one of them or, as a last
//! resort, joins both under a virtual snapshot.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::change::Change;
use crate::error::TreeError;
use crate::ident::virtual_snapshot_id;
use crate::loader::ChangeLoader;
use crate::store::RecordStore;

/// Outcome of one tie-break predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Decision {
    /// Use this existing snapshot as the common root.
    Prefer(String),
    /// Join both snapshots under a virtual root.
    Virtual,
}

/// Finds the breakpoint for `heads`.
///
/// # Errors
///
/// - [`TreeError::NoSnapshots`] if no head names a snapshot.
/// - [`TreeError::VirtualPatchConflict`] if a virtual root cannot be installed.
/// - Any loader error.
pub fn find_breakpoint<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    heads: &[String],
) -> Result<String, TreeError> {
    let mut snapshot_ids: Vec<String> = Vec::new();
    for head in heads {
        let change = loader.load_change(head)?;
        let sid = change.get_last_snapshot_id();
        if !sid.is_empty() && !snapshot_ids.iter().any(|s| s == sid) {
            snapshot_ids.push(sid.to_owned());
        }
    }
    find_common_snapshot(loader, snapshot_ids)
}

/// Reduces `snapshot_ids` to a single common snapshot, pairwise from the
/// back of the list.
///
/// # Errors
///
/// See [`find_breakpoint`].
pub fn find_common_snapshot<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    mut snapshot_ids: Vec<String>,
) -> Result<String, TreeError> {
    while snapshot_ids.len() > 1 {
        let s2 = snapshot_ids.pop().ok_or(TreeError::NoSnapshots)?;
        let s1 = snapshot_ids.pop().ok_or(TreeError::NoSnapshots)?;
        let common = common_for_two(loader, &s1, &s2)?;
        snapshot_ids.push(common);
    }
    snapshot_ids.pop().ok_or(TreeError::NoSnapshots)
}

fn common_for_two<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    s1: &str,
    s2: &str,
) -> Result<String, TreeError> {
    if s1 == s2 {
        return Ok(s1.to_owned());
    }
    let c1 = loader.load_change(s1)?;
    let c2 = loader.load_change(s2)?;
    if let Some(common) = common_snapshot_ancestor(&c1, &c2, |id| loader.load_change(id))? {
        return Ok(common);
    }

    warn!(
        smartblock = loader.store().id(),
        s1, s2, "disjoint snapshot lineages; possible versions split"
    );
    let max_blocks = loader.config().empty_snapshot_max_blocks;
    match tie_break(&c1, &c2, max_blocks) {
        Decision::Prefer(id) => {
            warn!(preferred = %id, "tie-break picked an existing snapshot");
            Ok(id)
        }
        Decision::Virtual => install_virtual(loader, &c1, &c2),
    }
}

/// Walks the `last_snapshot_id` chains of two snapshots in parallel and
/// returns the first id of one chain that appears in the other.
///
/// `load` resolves ids to changes; the tree reuses this walk over its
/// attached set. Returns `Ok(None)` when both chains end without meeting.
pub(crate) fn common_snapshot_ancestor<E, F>(
    c1: &Change,
    c2: &Change,
    mut load: F,
) -> Result<Option<String>, E>
where
    F: FnMut(&str) -> Result<Arc<Change>, E>,
{
    if c1.last_snapshot_id == c2.id {
        return Ok(Some(c2.id.clone()));
    }
    if c2.last_snapshot_id == c1.id {
        return Ok(Some(c1.id.clone()));
    }
    if !c1.last_snapshot_id.is_empty() && c1.last_snapshot_id == c2.last_snapshot_id {
        return Ok(Some(c1.last_snapshot_id.clone()));
    }

    let mut t1 = vec![c1.id.clone(), c1.last_snapshot_id.clone()];
    let mut t2 = vec![c2.id.clone(), c2.last_snapshot_id.clone()];
    loop {
        let tip1 = t1.last().cloned().unwrap_or_default();
        if !tip1.is_empty() {
            let next = next_in_chain(&tip1, &t1, &mut load)?;
            if !next.is_empty() && t2.contains(&next) {
                return Ok(Some(next));
            }
            t1.push(next);
        }
        let tip2 = t2.last().cloned().unwrap_or_default();
        if !tip2.is_empty() {
            let next = next_in_chain(&tip2, &t2, &mut load)?;
            if !next.is_empty() && t1.contains(&next) {
                return Ok(Some(next));
            }
            t2.push(next);
        }
        if tip1.is_empty() && tip2.is_empty() {
            return Ok(None);
        }
    }
}

// An id already on its own chain would loop forever; treat it as the end.
fn next_in_chain<E, F>(tip: &str, chain: &[String], load: &mut F) -> Result<String, E>
where
    F: FnMut(&str) -> Result<Arc<Change>, E>,
{
    let change = load(tip)?;
    let next = change.last_snapshot_id.clone();
    if chain.contains(&next) {
        Ok(String::new())
    } else {
        Ok(next)
    }
}

/// Ordered predicates; the first decisive one wins.
fn tie_break(c1: &Change, c2: &Change, max_blocks: usize) -> Decision {
    prefer_non_root(c1, c2)
        .or_else(|| prefer_non_empty(c1, c2, max_blocks))
        .unwrap_or(Decision::Virtual)
}

fn prefer_non_root(c1: &Change, c2: &Change) -> Option<Decision> {
    match (c1.previous_ids.is_empty(), c2.previous_ids.is_empty()) {
        (true, false) => Some(Decision::Prefer(c2.id.clone())),
        (false, true) => Some(Decision::Prefer(c1.id.clone())),
        _ => None,
    }
}

fn prefer_non_empty(c1: &Change, c2: &Change, max_blocks: usize) -> Option<Decision> {
    let empty = |c: &Change| c.snapshot().map_or(true, |s| s.is_empty(max_blocks));
    match (empty(c1), empty(c2)) {
        (true, false) => Some(Decision::Prefer(c2.id.clone())),
        (false, true) => Some(Decision::Prefer(c1.id.clone())),
        _ => None,
    }
}

fn install_virtual<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    c1: &Change,
    c2: &Change,
) -> Result<String, TreeError> {
    let virtual_id = virtual_snapshot_id(&c1.id, &c2.id);
    let points_at_virtual = |c: &Change| c.previous_ids.len() == 1 && c.previous_ids[0] == virtual_id;
    if points_at_virtual(c1) && points_at_virtual(c2) {
        return Ok(virtual_id);
    }
    for change in [c1, c2] {
        if !change.previous_ids.is_empty() {
            return Err(TreeError::VirtualPatchConflict {
                change_id: change.id.clone(),
                virtual_id,
            });
        }
    }
    let parents = [virtual_id.clone()];
    loader.patch_parents(&c1.id, &parents);
    loader.patch_parents(&c2.id, &parents);
    debug!(
        smartblock = loader.store().id(),
        virtual_id = %virtual_id,
        s1 = %c1.id,
        s2 = %c2.id,
        "installed virtual snapshot"
    );
    Ok(virtual_id)
}
