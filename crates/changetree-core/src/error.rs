// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine error type.
//!
//! Every error aborts the current build and propagates to the caller. The
//! only recoveries happen inside the engine (the breakpoint tie-break ladder
//! and skipping logs whose snapshot cannot be loaded) and never surface here.
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by tree builds and incremental tree insertion.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The record store returned no logs, or a single log without a head.
    #[error("record store returned no usable logs")]
    EmptyLogs,

    /// Every log head was subsumed by some snapshot's declared log heads.
    #[error("no usable heads: every log head is subsumed by a snapshot")]
    NoUsableHeads,

    /// The breakpoint finder could not obtain a snapshot id.
    #[error("no snapshots found for the surviving heads")]
    NoSnapshots,

    /// The tie-break ladder tried to install a virtual parent onto a change
    /// that already has different parents.
    #[error("cannot patch {change_id} onto virtual snapshot {virtual_id}: change already has parents")]
    VirtualPatchConflict {
        /// Change whose parents conflict.
        change_id: String,
        /// Virtual snapshot that was being installed.
        virtual_id: String,
    },

    /// A virtual-prefixed id that does not decode to two snapshot ids.
    #[error("invalid virtual snapshot id: {id}")]
    InvalidVirtualId {
        /// The offending id.
        id: String,
    },

    /// The record payload is unparseable and its parents are unrecoverable.
    #[error("corrupt record {id}: {reason}")]
    CorruptRecord {
        /// Record id.
        id: String,
        /// Decoder diagnostic.
        reason: String,
    },

    /// The record store failed.
    #[error("failed to fetch record {id}: {source}")]
    RecordFetchFailed {
        /// Record (or log set, for `get_logs`) that was being fetched.
        id: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// The build was aborted through its cancellation token.
    #[error("build cancelled")]
    Cancelled,

    /// Incremental insertion observed a second root.
    #[error("multiple roots: tree is rooted at {existing}, rejected {rejected}")]
    MultipleRoots {
        /// Current root id.
        existing: String,
        /// Parentless change that was rejected.
        rejected: String,
    },
}
