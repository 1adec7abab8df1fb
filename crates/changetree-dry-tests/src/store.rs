// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted record store for exercising build failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use changetree_core::{
    encode_change, CancelToken, Change, CodecError, LogDescriptor, MemoryRecordStore,
    RecordEnvelope, RecordStore, StoreError,
};

/// [`RecordStore`] fake wrapping a [`MemoryRecordStore`].
///
/// Clones share state, so a test can keep a handle for assertions while the
/// build borrows another. Every `get_record` call is counted and logged
/// before any scripted behaviour applies.
///
/// # Example
///
/// ```
/// use changetree_core::RecordStore;
/// use changetree_dry_tests::{ChangeFixture, ScriptedRecordStore};
///
/// let store = ScriptedRecordStore::new("sb");
/// store.put(&ChangeFixture::snapshot("root").device("L1").build()).unwrap();
/// store.fail_on("root");
///
/// assert!(store.get_record("root").is_err());
/// assert_eq!(store.record_calls(), 1);
/// ```
#[derive(Clone)]
pub struct ScriptedRecordStore {
    id: String,
    inner: Arc<Mutex<ScriptedRecordStoreInner>>,
}

struct ScriptedRecordStoreInner {
    store: MemoryRecordStore,
    logs_calls: usize,
    record_calls: usize,
    fetched: Vec<String>,
    fail_on: HashSet<String>,
    fail_logs: bool,
    delays: HashMap<String, Duration>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl ScriptedRecordStore {
    /// Create an empty store for `smartblock_id`.
    pub fn new(smartblock_id: &str) -> Self {
        Self {
            id: smartblock_id.to_owned(),
            inner: Arc::new(Mutex::new(ScriptedRecordStoreInner {
                store: MemoryRecordStore::new(smartblock_id),
                logs_calls: 0,
                record_calls: 0,
                fetched: Vec::new(),
                fail_on: HashSet::new(),
                fail_logs: false,
                delays: HashMap::new(),
                cancel_after: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptedRecordStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `change` and make it the head of its device log.
    pub fn put(&self, change: &Change) -> Result<(), CodecError> {
        self.lock().store.put_change(change)
    }

    /// Store every change in order; the last one per device ends up as head.
    pub fn put_all<'a>(
        &self,
        changes: impl IntoIterator<Item = &'a Change>,
    ) -> Result<(), CodecError> {
        let mut inner = self.lock();
        for change in changes {
            inner.store.put_change(change)?;
        }
        Ok(())
    }

    /// Store `change` without moving any log head.
    pub fn put_detached(&self, change: &Change) -> Result<(), CodecError> {
        let payload = encode_change(change)?;
        self.lock().store.put_detached(RecordEnvelope {
            id: change.id.clone(),
            account: change.account.clone(),
            device: change.device.clone(),
            payload,
        });
        Ok(())
    }

    /// Store an undecodable record as the head of `device`'s log.
    pub fn put_corrupt(&self, id: &str, device: &str) {
        self.lock().store.put_raw(RecordEnvelope {
            id: id.to_owned(),
            account: "account".to_owned(),
            device: device.to_owned(),
            payload: vec![0xff, 0x00, 0x13],
        });
    }

    /// Store an arbitrary envelope as the head of its device log.
    pub fn put_raw(&self, envelope: RecordEnvelope) {
        self.lock().store.put_raw(envelope);
    }

    /// Override the head of `log_id`.
    pub fn set_head(&self, log_id: &str, head_id: &str) {
        self.lock().store.set_head(log_id, head_id);
    }

    /// Forget a log; its records stay fetchable.
    pub fn remove_log(&self, log_id: &str) {
        self.lock().store.remove_log(log_id);
    }

    /// Make every fetch of `id` fail with a backend error.
    pub fn fail_on(&self, id: &str) {
        self.lock().fail_on.insert(id.to_owned());
    }

    /// Make `get_logs` fail with a backend error.
    pub fn set_fail_logs(&self, fail: bool) {
        self.lock().fail_logs = fail;
    }

    /// Sleep for `delay` whenever `id` is fetched.
    pub fn delay_on(&self, id: &str, delay: Duration) {
        self.lock().delays.insert(id.to_owned(), delay);
    }

    /// Cancel `token` during the `calls`-th `get_record` call.
    pub fn cancel_after(&self, calls: usize, token: CancelToken) {
        self.lock().cancel_after = Some((calls, token));
    }

    /// Number of `get_logs` calls.
    pub fn logs_calls(&self) -> usize {
        self.lock().logs_calls
    }

    /// Number of `get_record` calls, failed ones included.
    pub fn record_calls(&self) -> usize {
        self.lock().record_calls
    }

    /// Ids passed to `get_record`, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.lock().fetched.clone()
    }

    /// How many times `id` was fetched.
    pub fn fetch_count(&self, id: &str) -> usize {
        self.lock().fetched.iter().filter(|f| *f == id).count()
    }
}

impl RecordStore for ScriptedRecordStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_logs(&self) -> Result<Vec<LogDescriptor>, StoreError> {
        let mut inner = self.lock();
        inner.logs_calls += 1;
        if inner.fail_logs {
            return Err(StoreError::Backend("simulated get_logs failure".into()));
        }
        inner.store.get_logs()
    }

    fn get_record(&self, id: &str) -> Result<RecordEnvelope, StoreError> {
        let mut inner = self.lock();
        inner.record_calls += 1;
        inner.fetched.push(id.to_owned());

        let calls = inner.record_calls;
        if let Some((after, token)) = &inner.cancel_after {
            if calls >= *after {
                token.cancel();
            }
        }
        if let Some(delay) = inner.delays.get(id).copied() {
            std::thread::sleep(delay);
        }
        if inner.fail_on.contains(id) {
            return Err(StoreError::Backend(format!("simulated failure for {id}")));
        }
        inner.store.get_record(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ChangeFixture;

    #[test]
    fn clones_share_state() {
        let store = ScriptedRecordStore::new("sb");
        let handle = store.clone();
        store
            .put(&ChangeFixture::snapshot("root").device("L1").build())
            .unwrap();
        handle.get_record("root").unwrap();
        assert_eq!(store.record_calls(), 1);
        assert_eq!(store.fetched(), vec!["root"]);
    }

    #[test]
    fn detached_records_do_not_move_heads() {
        let store = ScriptedRecordStore::new("sb");
        store
            .put(&ChangeFixture::snapshot("root").device("L1").build())
            .unwrap();
        store
            .put_detached(&ChangeFixture::delta("A").device("L1").prev(&["root"]).build())
            .unwrap();
        let logs = store.get_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].head_id, "root");
        assert!(store.get_record("A").is_ok());
    }

    #[test]
    fn cancel_after_fires_on_the_nth_call() {
        let store = ScriptedRecordStore::new("sb");
        let token = CancelToken::new();
        store.cancel_after(2, token.clone());
        let _ = store.get_record("x");
        assert!(!token.is_cancelled());
        let _ = store.get_record("y");
        assert!(token.is_cancelled());
    }

    #[test]
    fn get_logs_failure_is_scripted() {
        let store = ScriptedRecordStore::new("sb");
        store.set_fail_logs(true);
        assert!(matches!(store.get_logs(), Err(StoreError::Backend(_))));
        assert_eq!(store.logs_calls(), 1);
    }
}
