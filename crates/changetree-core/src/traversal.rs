// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic topological traversal.
//!
//! Kahn walk over the sub-DAG reachable from a start node. The frontier is a
//! FIFO queue; children enter it in their parent's `next` order (ascending
//! id) once all of their reachable parents have been delivered. Replaying the
//! same attached set therefore yields the same sequence on every device.
use std::collections::VecDeque;
use std::ops::ControlFlow;

use crate::change::Change;
use crate::tree::Tree;

impl Tree {
    /// Visits every change reachable from `from_id` in topological order.
    ///
    /// Stops early when `visit` breaks. Unknown `from_id` visits nothing.
    pub fn iterate<F>(&self, from_id: &str, mut visit: F)
    where
        F: FnMut(&Change) -> ControlFlow<()>,
    {
        self.walk(from_id, |change, _| visit(change));
    }

    /// Like [`Tree::iterate`], also reporting the branch level of each
    /// change: the number of concurrently ready nodes (itself included) at
    /// the moment it is delivered. A level of 1 means the walk is on a single
    /// linear branch.
    pub fn iterate_branching<F>(&self, from_id: &str, visit: F)
    where
        F: FnMut(&Change, usize) -> ControlFlow<()>,
    {
        self.walk(from_id, visit);
    }

    /// Collects the ids of [`Tree::iterate`] from `from_id`.
    pub fn ordered_ids(&self, from_id: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(self.len());
        self.iterate(from_id, |change| {
            out.push(change.id.clone());
            ControlFlow::Continue(())
        });
        out
    }

    fn walk<F>(&self, from_id: &str, mut visit: F)
    where
        F: FnMut(&Change, usize) -> ControlFlow<()>,
    {
        let Some(&start) = self.index.get(from_id) else {
            return;
        };

        // Count only parents that the walk can actually deliver.
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        reachable[start] = true;
        while let Some(idx) = stack.pop() {
            for &child in &self.nodes[idx].next {
                if !reachable[child] {
                    reachable[child] = true;
                    stack.push(child);
                }
            }
        }
        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| n.parents.iter().filter(|&&p| reachable[p]).count())
            .collect();

        let mut frontier = VecDeque::from([start]);
        while let Some(idx) = frontier.pop_front() {
            let level = frontier.len() + 1;
            let node = &self.nodes[idx];
            if visit(&node.change, level).is_break() {
                return;
            }
            for &child in &node.next {
                remaining[child] = remaining[child].saturating_sub(1);
                if remaining[child] == 0 {
                    frontier.push_back(child);
                }
            }
        }
    }
}
