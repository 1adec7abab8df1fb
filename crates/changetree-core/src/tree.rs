// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory change DAG.
//!
//! Attached changes live in a vector-backed arena; parent and child edges are
//! arena indices, so the tree has no ownership cycles and clones cheaply
//! (changes themselves are shared `Arc`s). Changes whose parents are not all
//! attached wait in a separate partition and are promoted as soon as their
//! last missing parent arrives.
//!
//! Determinism contract
//! - Each node's child list is kept sorted by child id, so traversal order
//!   depends only on the attached set, never on insertion order.
//! - The first-insert root choice depends only on the batch contents (see
//!   [`Tree::add_fast`]).
//! - Heads, meta-heads and the fingerprint are derived from sorted sets.
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::breakpoint::common_snapshot_ancestor;
use crate::change::Change;
use crate::error::TreeError;
use crate::ident::{fingerprint_sections, Fingerprint};

/// How an incremental [`Tree::add`] changed the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddMode {
    /// Nothing new was attached.
    Nothing,
    /// Every newly attached change descends from every previous head; the
    /// old traversal is a prefix of the new one.
    Append,
    /// The tree was empty, or something attached in the interior; replay
    /// must restart from the root.
    Rebuild,
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) change: Arc<Change>,
    pub(crate) parents: Vec<usize>,
    pub(crate) next: Vec<usize>,
}

/// Change DAG rooted at a single snapshot.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    only_meta: bool,
    // nodes[0] is the root once anything is attached.
    pub(crate) nodes: Vec<Node>,
    pub(crate) index: HashMap<String, usize>,
    unattached: BTreeMap<String, Arc<Change>>,
    // Missing parent id -> ids of unattached changes waiting for it.
    waiting: HashMap<String, BTreeSet<String>>,
    heads: BTreeSet<String>,
    meta_heads: BTreeSet<String>,
    fingerprint: OnceCell<Fingerprint>,
}

impl Tree {
    /// Creates an empty tree over the full projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty metadata-projection tree: changes without metadata
    /// impact are dropped and parents come from `previous_meta_ids`.
    pub fn new_meta() -> Self {
        Self {
            only_meta: true,
            ..Self::default()
        }
    }

    /// Whether this is a metadata projection.
    pub fn only_meta(&self) -> bool {
        self.only_meta
    }

    /// Id of the root change, `None` while the tree is empty.
    pub fn root_id(&self) -> Option<&str> {
        self.nodes.first().map(|n| n.change.id.as_str())
    }

    /// Number of attached changes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` while nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attached change by id.
    pub fn get(&self, id: &str) -> Option<&Arc<Change>> {
        self.index.get(id).map(|&i| &self.nodes[i].change)
    }

    /// Returns `true` if `id` is attached.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of changes waiting for missing parents.
    pub fn unattached_len(&self) -> usize {
        self.unattached.len()
    }

    /// Sorted ids of changes waiting for missing parents.
    pub fn unattached_ids(&self) -> Vec<String> {
        self.unattached.keys().cloned().collect()
    }

    /// Sorted ids of attached changes without attached children.
    pub fn heads(&self) -> Vec<String> {
        self.heads.iter().cloned().collect()
    }

    /// Sorted ids of attached meta-bearing changes that no attached
    /// meta-bearing change names in its `previous_meta_ids`.
    pub fn meta_heads(&self) -> Vec<String> {
        self.meta_heads.iter().cloned().collect()
    }

    /// Bulk insertion for a closed, acyclic change set.
    ///
    /// Already known changes are ignored. On an empty tree the root is chosen
    /// among the changes whose parents are all absent from the batch:
    /// parentless changes first, then the lowest id. Any other parentless
    /// change is a second root and is silently dropped.
    pub fn add_fast<I>(&mut self, changes: I)
    where
        I: IntoIterator<Item = Arc<Change>>,
    {
        let batch = self.prepare(changes);
        if batch.is_empty() {
            return;
        }
        let root_id = self.root_id().map(str::to_owned).or_else(|| choose_root(&batch, self.only_meta));
        let batch: Vec<Arc<Change>> = batch
            .into_iter()
            .filter(|c| !self.is_foreign_root(c, root_id.as_deref()))
            .collect();
        self.insert(batch, root_id.as_deref());
    }

    /// Incremental insertion reporting how replay must react.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::MultipleRoots`] without modifying the tree if the
    /// batch contains a parentless change other than the (chosen) root.
    pub fn add<I>(&mut self, changes: I) -> Result<AddMode, TreeError>
    where
        I: IntoIterator<Item = Arc<Change>>,
    {
        let batch = self.prepare(changes);
        if batch.is_empty() {
            return Ok(AddMode::Nothing);
        }
        let root_id = self.root_id().map(str::to_owned).or_else(|| choose_root(&batch, self.only_meta));
        if let Some(foreign) = batch.iter().find(|c| self.is_foreign_root(c, root_id.as_deref())) {
            return Err(TreeError::MultipleRoots {
                existing: root_id.unwrap_or_default(),
                rejected: foreign.id.clone(),
            });
        }

        let was_empty = self.is_empty();
        let old_heads: Vec<usize> = self.heads.iter().filter_map(|h| self.index.get(h).copied()).collect();
        let attached = self.insert(batch, root_id.as_deref());
        if attached.is_empty() {
            return Ok(AddMode::Nothing);
        }
        if was_empty {
            return Ok(AddMode::Rebuild);
        }
        let linear = attached
            .iter()
            .all(|&n| old_heads.iter().all(|&h| self.descends_from(n, h)));
        Ok(if linear { AddMode::Append } else { AddMode::Rebuild })
    }

    /// Returns `true` if `id` is a strict descendant of `ancestor` among the
    /// attached changes.
    pub fn is_descendant(&self, id: &str, ancestor: &str) -> bool {
        match (self.index.get(id), self.index.get(ancestor)) {
            (Some(&n), Some(&a)) => self.descends_from(n, a),
            _ => false,
        }
    }

    /// Most recent snapshot shared by the histories of all current heads.
    ///
    /// Empty string for an empty tree. Falls back to the root when the heads'
    /// snapshot lineages do not meet inside the attached set.
    pub fn last_snapshot_id(&self) -> String {
        let Some(root) = self.root_id() else {
            return String::new();
        };
        let mut ids: Vec<String> = Vec::new();
        for head in &self.heads {
            let Some(change) = self.get(head) else { continue };
            let sid = change.get_last_snapshot_id();
            if !sid.is_empty() && !ids.iter().any(|s| s == sid) {
                ids.push(sid.to_owned());
            }
        }
        while ids.len() > 1 {
            let (Some(s2), Some(s1)) = (ids.pop(), ids.pop()) else { break };
            if s1 == s2 {
                ids.push(s1);
                continue;
            }
            let (Some(c1), Some(c2)) = (self.get(&s1), self.get(&s2)) else {
                return root.to_owned();
            };
            let lookup = |id: &str| self.get(id).cloned().ok_or(());
            match common_snapshot_ancestor(c1, c2, lookup) {
                Ok(Some(common)) => ids.push(common),
                Ok(None) | Err(()) => return root.to_owned(),
            }
        }
        ids.pop().unwrap_or_else(|| root.to_owned())
    }

    /// Deterministic fingerprint over sorted attached ids, heads and
    /// meta-heads. Computed lazily and cached until the next mutation.
    pub fn hash(&self) -> Fingerprint {
        *self.fingerprint.get_or_init(|| {
            let mut attached: Vec<&str> = self.index.keys().map(String::as_str).collect();
            attached.sort_unstable();
            let heads: Vec<&str> = self.heads.iter().map(String::as_str).collect();
            let meta_heads: Vec<&str> = self.meta_heads.iter().map(String::as_str).collect();
            fingerprint_sections([attached, heads, meta_heads])
        })
    }

    // Drops known changes, batch duplicates and (in metadata mode) changes
    // without metadata impact.
    fn prepare<I>(&self, changes: I) -> Vec<Arc<Change>>
    where
        I: IntoIterator<Item = Arc<Change>>,
    {
        let mut seen = HashSet::new();
        changes
            .into_iter()
            .filter(|c| {
                !self.index.contains_key(&c.id)
                    && !self.unattached.contains_key(&c.id)
                    && (!self.only_meta || c.has_meta())
                    && seen.insert(c.id.clone())
            })
            .collect()
    }

    fn is_foreign_root(&self, change: &Change, root_id: Option<&str>) -> bool {
        change.parents(self.only_meta).is_empty() && root_id.is_some_and(|r| r != change.id)
    }

    // Returns the arena indices attached by this batch, promotions included.
    fn insert(&mut self, batch: Vec<Arc<Change>>, root_id: Option<&str>) -> Vec<usize> {
        self.fingerprint = OnceCell::new();
        let mut attached = Vec::new();
        let mut rest = Vec::with_capacity(batch.len());
        for change in batch {
            if self.nodes.is_empty() && root_id == Some(change.id.as_str()) {
                attached.push(self.attach_node(change, Vec::new()));
            } else {
                rest.push(change);
            }
        }
        if self.nodes.is_empty() {
            // Nothing could be rooted; keep everything waiting.
            for change in rest {
                self.park(change);
            }
            return attached;
        }
        if let Some(&root) = attached.first() {
            self.promote_waiting(root, &mut attached);
        }
        for change in rest {
            if self.index.contains_key(&change.id) || self.unattached.contains_key(&change.id) {
                continue;
            }
            match self.parent_indices(&change) {
                Some(parents) => {
                    let idx = self.attach_node(change, parents);
                    attached.push(idx);
                    self.promote_waiting(idx, &mut attached);
                }
                None => self.park(change),
            }
        }
        self.refresh_heads();
        attached
    }

    fn parent_indices(&self, change: &Change) -> Option<Vec<usize>> {
        let mut parents: Vec<usize> = Vec::new();
        for pid in change.parents(self.only_meta) {
            let idx = *self.index.get(pid)?;
            if !parents.contains(&idx) {
                parents.push(idx);
            }
        }
        Some(parents)
    }

    fn attach_node(&mut self, change: Arc<Change>, parents: Vec<usize>) -> usize {
        let idx = self.nodes.len();
        for &p in &parents {
            let pos = {
                let nodes = &self.nodes;
                nodes[p]
                    .next
                    .partition_point(|&c| nodes[c].change.id < change.id)
            };
            self.nodes[p].next.insert(pos, idx);
        }
        self.index.insert(change.id.clone(), idx);
        self.nodes.push(Node {
            change,
            parents,
            next: Vec::new(),
        });
        idx
    }

    fn park(&mut self, change: Arc<Change>) {
        for pid in change.parents(self.only_meta) {
            if !self.index.contains_key(pid) {
                self.waiting
                    .entry(pid.clone())
                    .or_default()
                    .insert(change.id.clone());
            }
        }
        self.unattached.insert(change.id.clone(), change);
    }

    fn promote_waiting(&mut self, from: usize, attached: &mut Vec<usize>) {
        let mut work = vec![from];
        while let Some(idx) = work.pop() {
            let id = self.nodes[idx].change.id.clone();
            let Some(waiters) = self.waiting.remove(&id) else { continue };
            for wid in waiters {
                let Some(change) = self.unattached.get(&wid).cloned() else { continue };
                if let Some(parents) = self.parent_indices(&change) {
                    self.unattached.remove(&wid);
                    let child = self.attach_node(change, parents);
                    attached.push(child);
                    work.push(child);
                }
            }
        }
    }

    fn refresh_heads(&mut self) {
        self.heads = self
            .nodes
            .iter()
            .filter(|n| n.next.is_empty())
            .map(|n| n.change.id.clone())
            .collect();
        let referenced: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|n| n.change.has_meta())
            .flat_map(|n| n.change.previous_meta_ids.iter().map(String::as_str))
            .collect();
        self.meta_heads = self
            .nodes
            .iter()
            .filter(|n| n.change.has_meta() && !referenced.contains(n.change.id.as_str()))
            .map(|n| n.change.id.clone())
            .collect();
    }

    fn descends_from(&self, node: usize, ancestor: usize) -> bool {
        if node == ancestor {
            return false;
        }
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = self.nodes[node].parents.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if idx == ancestor {
                return true;
            }
            if seen.insert(idx) {
                queue.extend(self.nodes[idx].parents.iter().copied());
            }
        }
        false
    }
}

fn choose_root(batch: &[Arc<Change>], only_meta: bool) -> Option<String> {
    let ids: HashSet<&str> = batch.iter().map(|c| c.id.as_str()).collect();
    batch
        .iter()
        .filter(|c| c.parents(only_meta).iter().all(|p| !ids.contains(p.as_str())))
        .min_by(|a, b| {
            let key = |c: &Change| (!c.parents(only_meta).is_empty(), c.id.clone());
            key(a).cmp(&key(b))
        })
        .map(|c| c.id.clone())
}
