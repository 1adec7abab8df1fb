// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! End-to-end builds over small literal change graphs.

use std::ops::ControlFlow;

use changetree_core::heads::resolve_heads;
use changetree_core::loader::ChangeLoader;
use changetree_core::{
    build_meta_tree, build_tree, decode_virtual_id, virtual_snapshot_id, AddMode, BuildOptions,
    RecordStore, Tree,
};
use changetree_dry_tests::{ChangeFixture, ScriptedRecordStore};

fn linear_store() -> ScriptedRecordStore {
    let store = ScriptedRecordStore::new("sb-linear");
    store
        .put_all(&[
            ChangeFixture::snapshot("root").device("L1").build(),
            ChangeFixture::delta("A").device("L1").prev(&["root"]).build(),
            ChangeFixture::delta("B").device("L1").prev(&["A"]).build(),
        ])
        .expect("put");
    store
}

#[test]
fn linear_chain() {
    let store = linear_store();
    let (tree, log_heads) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert_eq!(tree.root_id(), Some("root"));
    assert_eq!(tree.heads(), vec!["B"]);
    assert_eq!(tree.ordered_ids("root"), vec!["root", "A", "B"]);
    assert_eq!(log_heads.len(), 1);
    assert_eq!(log_heads["L1"].id, "B");
    assert_eq!(tree.last_snapshot_id(), "root");
}

#[test]
fn each_record_is_fetched_once() {
    let store = linear_store();
    build_tree(&store, &BuildOptions::default()).expect("build");
    for id in ["root", "A", "B"] {
        assert_eq!(store.fetch_count(id), 1, "{id} fetched more than once");
    }
    assert_eq!(store.logs_calls(), 1);
}

#[test]
fn fork_then_merge() {
    let store = ScriptedRecordStore::new("sb-merge");
    store
        .put_all(&[
            ChangeFixture::snapshot("root").device("L1").build(),
            ChangeFixture::delta("A").device("L1").prev(&["root"]).build(),
            ChangeFixture::delta("B2").device("L2").prev(&["A"]).build(),
            ChangeFixture::delta("B1").device("L1").prev(&["A"]).build(),
            ChangeFixture::delta("M").device("L1").prev(&["B1", "B2"]).build(),
        ])
        .expect("put");

    let (tree, _) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.heads(), vec!["M"]);
    assert_eq!(tree.ordered_ids("root"), vec!["root", "A", "B1", "B2", "M"]);

    let mut levels = Vec::new();
    tree.iterate_branching("root", |change, level| {
        levels.push((change.id.clone(), level));
        ControlFlow::Continue(())
    });
    let b1 = levels.iter().find(|(id, _)| id == "B1").map(|(_, l)| *l);
    let m = levels.iter().find(|(id, _)| id == "M").map(|(_, l)| *l);
    assert_eq!(b1, Some(2));
    assert_eq!(m, Some(1));
}

#[test]
fn disjoint_snapshots_join_under_virtual_root() {
    let store = ScriptedRecordStore::new("sb-split");
    store
        .put_all(&[
            ChangeFixture::snapshot("s1").device("L1").blocks(3).build(),
            ChangeFixture::snapshot("s2").device("L2").blocks(4).build(),
        ])
        .expect("put");

    let (tree, log_heads) = build_tree(&store, &BuildOptions::default()).expect("build");
    let virtual_id = virtual_snapshot_id("s2", "s1");
    assert_eq!(virtual_id, "_virtual:czErczI");
    assert_eq!(
        decode_virtual_id(&virtual_id),
        Some(("s1".to_owned(), "s2".to_owned()))
    );
    assert_eq!(tree.root_id(), Some(virtual_id.as_str()));
    assert_eq!(
        tree.ordered_ids(&virtual_id),
        vec![virtual_id.clone(), "s1".to_owned(), "s2".to_owned()]
    );
    for id in ["s1", "s2"] {
        assert_eq!(tree.get(id).expect("attached").previous_ids, vec![virtual_id.clone()]);
    }
    assert_eq!(log_heads["L2"].previous_ids, vec![virtual_id.clone()]);
    assert_eq!(tree.heads(), vec!["s1", "s2"]);
}

#[test]
fn root_snapshot_loses_to_non_root_snapshot() {
    let store = ScriptedRecordStore::new("sb-ladder");
    store
        .put_all(&[
            ChangeFixture::snapshot("old").device("L1").blocks(5).build(),
            ChangeFixture::snapshot("lost").device("L2").build(),
            ChangeFixture::snapshot("s2")
                .device("L2")
                .prev(&["lost"])
                .last("lost")
                .blocks(5)
                .build(),
        ])
        .expect("put");

    let (tree, _) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert_eq!(tree.root_id(), Some("s2"));
    assert!(!tree.contains("old"));
    assert_eq!(tree.unattached_len(), 0);
    assert_eq!(tree.len(), 1);
}

#[test]
fn metadata_projection_drops_non_meta() {
    let store = ScriptedRecordStore::new("sb-meta");
    store
        .put_all(&[
            ChangeFixture::snapshot("root").device("L1").build(),
            ChangeFixture::delta("A").device("L1").prev(&["root"]).details_set("name").build(),
            ChangeFixture::delta("B")
                .device("L1")
                .prev(&["A"])
                .meta_prev(&["A"])
                .text_update("b1")
                .build(),
            ChangeFixture::delta("C")
                .device("L1")
                .prev(&["B"])
                .meta_prev(&["A"])
                .relation_add("tag")
                .build(),
        ])
        .expect("put");

    let (meta, _) = build_meta_tree(&store, &BuildOptions::default()).expect("meta build");
    assert!(meta.only_meta());
    assert_eq!(meta.meta_heads(), vec!["C"]);
    assert_eq!(meta.heads(), vec!["C"]);
    assert_eq!(meta.ordered_ids("root"), vec!["root", "A", "C"]);
    assert!(!meta.contains("B"));
    assert_eq!(store.fetch_count("B"), 0);

    let (full, _) = build_tree(&store, &BuildOptions::default()).expect("full build");
    assert_eq!(full.len(), 4);
    assert_eq!(full.heads(), vec!["C"]);
    assert_eq!(full.meta_heads(), vec!["C"]);
}

#[test]
fn incremental_add_reports_append_and_rebuild() {
    let mut tree = Tree::new();
    let root = ChangeFixture::snapshot("root").build_arc();
    let a = ChangeFixture::delta("A").prev(&["root"]).build_arc();
    assert_eq!(tree.add([root, a]).expect("add"), AddMode::Rebuild);

    let b = ChangeFixture::delta("B").prev(&["A"]).build_arc();
    assert_eq!(tree.add([b]).expect("add"), AddMode::Append);

    let a2 = ChangeFixture::delta("A2").prev(&["root"]).build_arc();
    assert_eq!(tree.add([a2]).expect("add"), AddMode::Rebuild);
    assert_eq!(tree.heads(), vec!["A2", "B"]);
}

#[test]
fn subsumed_log_heads_are_not_explored() {
    let store = ScriptedRecordStore::new("sb-heads");
    store
        .put_all(&[
            ChangeFixture::snapshot("root").device("L2").build(),
            ChangeFixture::delta("h2").device("L2").prev(&["root"]).build(),
            ChangeFixture::snapshot("s1")
                .device("L1")
                .prev(&["h2"])
                .last("root")
                .log_head("L2", "h2")
                .build(),
        ])
        .expect("put");

    let logs = store.get_logs().expect("logs");
    let options = BuildOptions::default();
    let mut loader = ChangeLoader::new(&store, false, &options);
    assert_eq!(resolve_heads(&mut loader, &logs).expect("heads"), vec!["s1"]);

    let (tree, log_heads) = build_tree(&store, &options).expect("build");
    assert_eq!(tree.root_id(), Some("s1"));
    assert_eq!(tree.heads(), vec!["s1"]);
    assert_eq!(log_heads.keys().collect::<Vec<_>>(), vec!["L1", "L2"]);
}

#[test]
fn concurrent_heads_share_breakpoint() {
    let store = ScriptedRecordStore::new("sb-concurrent");
    store
        .put_all(&[
            ChangeFixture::snapshot("root").device("L1").build(),
            ChangeFixture::delta("a1").device("L1").prev(&["root"]).build(),
            ChangeFixture::delta("b1").device("L2").prev(&["root"]).build(),
            ChangeFixture::delta("b2").device("L2").prev(&["b1"]).build(),
        ])
        .expect("put");

    let (tree, _) = build_tree(&store, &BuildOptions::default()).expect("build");
    assert_eq!(tree.heads(), vec!["a1", "b2"]);
    assert_eq!(tree.ordered_ids("root"), vec!["root", "a1", "b1", "b2"]);
    assert_eq!(tree.last_snapshot_id(), "root");
}
