// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Error kinds, recoveries and cancellation of tree builds.

use std::time::Duration;

use changetree_core::{
    build_meta_tree, build_tree, BuildConfig, BuildOptions, RecordEnvelope, StoreError, TreeError,
};
use changetree_dry_tests::{ChangeFixture, ScriptedRecordStore};
use ciborium::Value;

fn chain(store: &ScriptedRecordStore) {
    store
        .put_all(&[
            ChangeFixture::snapshot("root").device("L1").build(),
            ChangeFixture::delta("A").device("L1").prev(&["root"]).build(),
            ChangeFixture::delta("B").device("L1").prev(&["A"]).build(),
        ])
        .expect("put");
}

#[test]
fn no_logs_is_empty_logs() {
    let store = ScriptedRecordStore::new("sb");
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(matches!(err, TreeError::EmptyLogs), "got {err:?}");
    assert_eq!(store.record_calls(), 0);
}

#[test]
fn single_log_without_head_is_empty_logs() {
    let store = ScriptedRecordStore::new("sb");
    store.set_head("L1", "");
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(matches!(err, TreeError::EmptyLogs), "got {err:?}");
}

#[test]
fn get_logs_failure_is_a_fetch_failure() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    store.set_fail_logs(true);
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(
        matches!(
            err,
            TreeError::RecordFetchFailed { ref id, source: StoreError::Backend(_) } if id == "sb"
        ),
        "got {err:?}"
    );
}

#[test]
fn unloadable_heads_only_is_no_usable_heads() {
    let store = ScriptedRecordStore::new("sb");
    store.set_head("L1", "ghost");
    store.set_head("L2", "phantom");
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(matches!(err, TreeError::NoUsableHeads), "got {err:?}");
}

#[test]
fn unloadable_log_is_dropped_and_build_continues() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    store.put_corrupt("junk", "L0");
    let (tree, log_heads) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert_eq!(tree.heads(), vec!["B"]);
    assert!(!log_heads.contains_key("L0"));
}

#[test]
fn store_failure_mid_walk_aborts() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    store.fail_on("A");
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(
        matches!(err, TreeError::RecordFetchFailed { ref id, .. } if id == "A"),
        "got {err:?}"
    );
}

#[test]
fn corrupt_record_mid_walk_aborts() {
    let store = ScriptedRecordStore::new("sb");
    store
        .put(&ChangeFixture::snapshot("root").device("L1").build())
        .expect("put");
    store.put_corrupt("A", "L1");
    store
        .put(&ChangeFixture::delta("B").device("L1").prev(&["A"]).build())
        .expect("put");
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(
        matches!(err, TreeError::CorruptRecord { ref id, .. } if id == "A"),
        "got {err:?}"
    );
}

#[test]
fn partially_decoded_record_keeps_its_parents() {
    let store = ScriptedRecordStore::new("sb");
    store
        .put(&ChangeFixture::snapshot("root").device("L1").build())
        .expect("put");
    let record = Value::Map(vec![
        (
            Value::Text("previous_ids".into()),
            Value::Array(vec![Value::Text("root".into())]),
        ),
        (Value::Text("last_snapshot_id".into()), Value::Text("root".into())),
        (Value::Text("content".into()), Value::Text("not a list".into())),
    ]);
    let mut payload = Vec::new();
    ciborium::ser::into_writer(&record, &mut payload).expect("encode");
    store.put_raw(RecordEnvelope {
        id: "A".into(),
        account: "account".into(),
        device: "L1".into(),
        payload,
    });
    store
        .put(&ChangeFixture::delta("B").device("L1").prev(&["A"]).build())
        .expect("put");

    let (tree, _) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert_eq!(tree.ordered_ids("root"), vec!["root", "A", "B"]);
    let a = tree.get("A").expect("attached");
    assert!(a.content().is_empty());
    assert!(!a.has_meta());

    let (meta, _) = build_meta_tree(&store, &BuildOptions::default()).expect("meta build");
    assert!(!meta.contains("A"));
}

#[test]
fn pre_cancelled_build_touches_nothing() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    let options = BuildOptions::default();
    options.cancel.cancel();
    let err = build_tree(&store, &options).unwrap_err();
    assert!(matches!(err, TreeError::Cancelled), "got {err:?}");
    assert_eq!(store.logs_calls(), 0);
    assert_eq!(store.record_calls(), 0);
}

#[test]
fn cancellation_during_walk_stops_the_build() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    let options = BuildOptions::default();
    // Third fetch is "A", inside the reachability walk.
    store.cancel_after(3, options.cancel.clone());
    let err = build_tree(&store, &options).unwrap_err();
    assert!(matches!(err, TreeError::Cancelled), "got {err:?}");
    assert_eq!(store.record_calls(), 3);
}

#[test]
fn cancellation_is_not_swallowed_by_head_resolution() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    let options = BuildOptions::default();
    store.cancel_after(1, options.cancel.clone());
    let err = build_tree(&store, &options).unwrap_err();
    assert!(matches!(err, TreeError::Cancelled), "got {err:?}");
}

#[test]
fn slow_loads_do_not_fail_the_build() {
    let store = ScriptedRecordStore::new("sb");
    chain(&store);
    store.delay_on("A", Duration::from_millis(5));
    let options = BuildOptions::with_config(BuildConfig {
        slow_load_threshold_ms: 1,
        ..BuildConfig::default()
    });
    let (tree, _) = build_tree(&store, &options).expect("build");
    assert_eq!(tree.len(), 3);
}

#[test]
fn virtual_patch_conflict_surfaces() {
    let store = ScriptedRecordStore::new("sb");
    store
        .put_all(&[
            ChangeFixture::snapshot("p").device("L1").build(),
            ChangeFixture::snapshot("s1").device("L1").prev(&["p"]).blocks(3).build(),
            ChangeFixture::snapshot("q").device("L2").build(),
            ChangeFixture::snapshot("s2").device("L2").prev(&["q"]).blocks(3).build(),
        ])
        .expect("put");
    let err = build_tree(&store, &BuildOptions::default()).unwrap_err();
    assert!(
        matches!(err, TreeError::VirtualPatchConflict { ref change_id, .. } if change_id == "s1"),
        "got {err:?}"
    );
}

#[test]
fn configured_empty_threshold_changes_the_tie_break() {
    let store = ScriptedRecordStore::new("sb");
    store
        .put_all(&[
            ChangeFixture::snapshot("s1").device("L1").blocks(2).build(),
            ChangeFixture::snapshot("s2").device("L2").blocks(5).build(),
        ])
        .expect("put");

    let (default_tree, _) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert!(default_tree
        .root_id()
        .is_some_and(changetree_core::is_virtual_id));

    let options = BuildOptions::with_config(BuildConfig {
        empty_snapshot_max_blocks: 3,
        ..BuildConfig::default()
    });
    let (tree, _) = build_tree(&store, &options).expect("build");
    assert_eq!(tree.root_id(), Some("s2"));
    assert!(!tree.contains("s1"));
}
