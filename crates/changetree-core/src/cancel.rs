// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cooperative cancellation for tree builds.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TreeError;

/// Shared cancellation flag threaded through a build.
///
/// Clones share the same flag. Deadlines are implemented by the caller
/// cancelling the token; the engine never times out on its own.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns [`TreeError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<(), TreeError> {
        if self.is_cancelled() {
            Err(TreeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
