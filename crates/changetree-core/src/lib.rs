// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change-graph engine for replicated smartblocks.
//!
//! Every device appends hash-addressed changes to its own log. Given the union
//! of those logs, this crate reconstructs a single DAG rooted at a common
//! snapshot and replays it in an order every device agrees on.
//!
//! Entry points: [`build_tree`], [`build_meta_tree`] and
//! [`build_tree_before`]. They read from any [`RecordStore`] and return a
//! [`Tree`] that supports incremental insertion ([`Tree::add`]) and ordered
//! traversal ([`Tree::iterate`], [`Tree::iterate_branching`]).
//!
//! # Determinism Invariant
//!
//! For a fixed set of loaded changes the resulting tree's [`Tree::hash`],
//! [`Tree::heads`], [`Tree::meta_heads`] and traversal order are identical on
//! every device, regardless of log enumeration or insertion order.
//!
//! # Diagnostics
//!
//! The engine logs through `tracing` and never installs a subscriber.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

pub mod breakpoint;
mod builder;
mod cancel;
mod change;
mod codec;
mod config;
mod error;
pub mod heads;
mod ident;
pub mod loader;
mod store;
mod traversal;
mod tree;

pub use builder::{build_meta_tree, build_tree, build_tree_before, LogHeads};
pub use cancel::CancelToken;
pub use change::{
    BlockEvent, BlockRecord, Change, ChangePayload, ContentOp, SnapshotData, SnapshotPayload,
};
pub use codec::{decode_change, encode_change, CodecError, Decoded};
pub use config::{BuildConfig, BuildOptions, ConfigError, ConfigStore, CONFIG_KEY};
pub use error::TreeError;
pub use ident::{
    decode_virtual_id, is_virtual_id, virtual_snapshot_id, Fingerprint, Hash, VIRTUAL_PREFIX,
};
pub use store::{
    BeforeStore, LogDescriptor, MemoryRecordStore, RecordEnvelope, RecordStore, StoreError,
};
pub use tree::{AddMode, Tree};
