// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Build orchestrator: record store in, rooted change tree out.
//!
//! Phases, each followed by a cancellation check:
//! 1. enumerate logs (sorted by log id) and pre-load their heads;
//! 2. resolve effective heads;
//! 3. find the breakpoint snapshot and root a fresh tree at it;
//! 4. walk every head's history down to the breakpoint;
//! 5. insert the collected changes with [`Tree::add_fast`].
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::breakpoint::find_breakpoint;
use crate::change::Change;
use crate::config::BuildOptions;
use crate::error::TreeError;
use crate::heads::resolve_heads;
use crate::loader::ChangeLoader;
use crate::store::{BeforeStore, LogDescriptor, RecordStore};
use crate::tree::Tree;

/// Head change of every log whose head could be loaded, keyed by log id.
pub type LogHeads = BTreeMap<String, Arc<Change>>;

/// Builds the full change tree of `store`'s smartblock.
///
/// # Errors
///
/// Any [`TreeError`]; a cancelled build returns [`TreeError::Cancelled`].
#[instrument(skip_all, fields(smartblock = %store.id()))]
pub fn build_tree<S: RecordStore + ?Sized>(
    store: &S,
    options: &BuildOptions,
) -> Result<(Tree, LogHeads), TreeError> {
    build(store, false, options)
}

/// Builds the metadata projection: parents come from `previous_meta_ids` and
/// changes without metadata impact are left out.
///
/// # Errors
///
/// See [`build_tree`].
#[instrument(skip_all, fields(smartblock = %store.id()))]
pub fn build_meta_tree<S: RecordStore + ?Sized>(
    store: &S,
    options: &BuildOptions,
) -> Result<(Tree, LogHeads), TreeError> {
    build(store, true, options)
}

/// Builds the tree of the history ending at `before_id`, including that
/// change only when `include_before` is set.
///
/// # Errors
///
/// See [`build_tree`]. A `before_id` without parents and with
/// `include_before == false` yields [`TreeError::EmptyLogs`].
#[instrument(
    skip_all,
    fields(smartblock = %store.id(), before_id = %before_id, include_before = include_before)
)]
pub fn build_tree_before<S: RecordStore + ?Sized>(
    store: &S,
    before_id: &str,
    include_before: bool,
    options: &BuildOptions,
) -> Result<Tree, TreeError> {
    let history = BeforeStore::new(store, before_id, include_before);
    build(&history, false, options).map(|(tree, _)| tree)
}

fn build<S: RecordStore + ?Sized>(
    store: &S,
    only_meta: bool,
    options: &BuildOptions,
) -> Result<(Tree, LogHeads), TreeError> {
    let cancel = &options.cancel;
    let mut loader = ChangeLoader::new(store, only_meta, options);

    cancel.check()?;
    let mut logs = store
        .get_logs()
        .map_err(|source| TreeError::RecordFetchFailed {
            id: store.id().to_owned(),
            source,
        })?;
    cancel.check()?;
    if logs.is_empty() || (logs.len() == 1 && logs[0].head_id.is_empty()) {
        return Err(TreeError::EmptyLogs);
    }
    logs.sort_by(|a, b| a.log_id.cmp(&b.log_id));
    debug!(logs = logs.len(), only_meta, "enumerated logs");

    preload_heads(&mut loader, &logs)?;
    cancel.check()?;

    let heads = resolve_heads(&mut loader, &logs)?;
    debug!(?heads, "resolved effective heads");
    cancel.check()?;

    let breakpoint = find_breakpoint(&mut loader, &heads)?;
    debug!(%breakpoint, "found breakpoint");
    cancel.check()?;

    let mut tree = if only_meta { Tree::new_meta() } else { Tree::new() };
    tree.add_fast([loader.load_change(&breakpoint)?]);

    let mut changes = collect_reachable(&mut loader, &logs, &heads, &breakpoint)?;
    cancel.check()?;
    if only_meta {
        changes.retain(|c| c.has_meta());
    }
    tree.add_fast(changes);
    cancel.check()?;

    let log_heads: LogHeads = logs
        .iter()
        .filter_map(|log| {
            loader
                .cached(&log.head_id)
                .map(|change| (log.log_id.clone(), Arc::clone(change)))
        })
        .collect();

    let stats = loader.stats();
    debug!(
        attached = tree.len(),
        unattached = tree.unattached_len(),
        loads = stats.loads,
        load_ms = u64::try_from(stats.total.as_millis()).unwrap_or(u64::MAX),
        slowest_ms = u64::try_from(stats.slowest.as_millis()).unwrap_or(u64::MAX),
        "tree built"
    );
    Ok((tree, log_heads))
}

// A head that fails here stays in the log set; head resolution drops it.
fn preload_heads<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    logs: &[LogDescriptor],
) -> Result<(), TreeError> {
    for log in logs.iter().filter(|l| !l.head_id.is_empty()) {
        loader.set_origin(Some(log.clone()));
        match loader.load_change(&log.head_id) {
            Ok(_) => {}
            Err(TreeError::Cancelled) => return Err(TreeError::Cancelled),
            Err(err) => error!(
                log_id = %log.log_id,
                head_id = %log.head_id,
                error = %err,
                "cannot load log head"
            ),
        }
    }
    loader.set_origin(None);
    Ok(())
}

/// Depth-first walk from every head, parents before children, stopping at
/// the breakpoint and at changes already collected.
fn collect_reachable<S: RecordStore + ?Sized>(
    loader: &mut ChangeLoader<'_, S>,
    logs: &[LogDescriptor],
    heads: &[String],
    breakpoint: &str,
) -> Result<Vec<Arc<Change>>, TreeError> {
    let origins: HashMap<&str, &LogDescriptor> =
        logs.iter().map(|l| (l.head_id.as_str(), l)).collect();
    let mut visited: HashSet<String> = HashSet::from([breakpoint.to_owned()]);
    let mut out = Vec::new();

    for head in heads {
        if !visited.insert(head.clone()) {
            continue;
        }
        loader.set_origin(origins.get(head.as_str()).map(|l| (*l).clone()));
        let mut stack: Vec<(Arc<Change>, bool)> = vec![(loader.load_change(head)?, false)];
        while let Some((change, expanded)) = stack.pop() {
            if expanded {
                out.push(change);
                continue;
            }
            stack.push((Arc::clone(&change), true));
            for pid in change.previous_ids.iter().rev() {
                if visited.insert(pid.clone()) {
                    stack.push((loader.load_change(pid)?, false));
                }
            }
        }
    }
    loader.set_origin(None);
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::change::{ChangePayload, SnapshotPayload};
    use crate::store::MemoryRecordStore;

    fn change(id: &str, prev: &[&str], snapshot: bool) -> Change {
        Change {
            id: id.into(),
            account: "acc".into(),
            device: "L1".into(),
            previous_ids: prev.iter().map(|s| (*s).to_owned()).collect(),
            previous_meta_ids: prev.iter().map(|s| (*s).to_owned()).collect(),
            last_snapshot_id: if snapshot { String::new() } else { "root".into() },
            payload: if snapshot {
                ChangePayload::Snapshot(Arc::new(SnapshotPayload::default()))
            } else {
                ChangePayload::Delta(Vec::new())
            },
            timestamp: 0,
        }
    }

    #[test]
    fn linear_chain_builds() {
        let mut store = MemoryRecordStore::new("sb");
        store.put_change(&change("root", &[], true)).unwrap();
        store.put_change(&change("A", &["root"], false)).unwrap();
        store.put_change(&change("B", &["A"], false)).unwrap();
        let (tree, log_heads) = build_tree(&store, &BuildOptions::default()).unwrap();
        assert_eq!(tree.root_id(), Some("root"));
        assert_eq!(tree.heads(), vec!["B"]);
        assert_eq!(tree.ordered_ids("root"), vec!["root", "A", "B"]);
        assert_eq!(log_heads["L1"].id, "B");
    }

    #[test]
    fn empty_store_has_no_logs() {
        let store = MemoryRecordStore::new("sb");
        assert!(matches!(
            build_tree(&store, &BuildOptions::default()),
            Err(TreeError::EmptyLogs)
        ));
    }

    #[test]
    fn single_headless_log_is_empty() {
        let mut store = MemoryRecordStore::new("sb");
        store.set_head("L1", "");
        assert!(matches!(
            build_tree(&store, &BuildOptions::default()),
            Err(TreeError::EmptyLogs)
        ));
    }

    #[test]
    fn history_build_stops_before_change() {
        let mut store = MemoryRecordStore::new("sb");
        store.put_change(&change("root", &[], true)).unwrap();
        store.put_change(&change("A", &["root"], false)).unwrap();
        store.put_change(&change("B", &["A"], false)).unwrap();
        let opts = BuildOptions::default();
        let without = build_tree_before(&store, "B", false, &opts).unwrap();
        assert_eq!(without.heads(), vec!["A"]);
        let with = build_tree_before(&store, "B", true, &opts).unwrap();
        assert_eq!(with.heads(), vec!["B"]);
    }
}
