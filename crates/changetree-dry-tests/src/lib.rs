// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for changetree crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixture`] - Change builders for snapshots and deltas
//! - [`store`] - Scripted record store with call counting and failure injection

pub mod config;
pub mod fixture;
pub mod store;

// Re-export commonly used items at crate root for convenience
pub use config::InMemoryConfigStore;
pub use fixture::{ids, ChangeFixture};
pub use store::ScriptedRecordStore;
