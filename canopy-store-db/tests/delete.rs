// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Single, batch, list and owner-wide deletes.

use canopy_store_db::{DataNode, Error, FetchDescendants, FragmentStore, Owner};

fn setup() -> (FragmentStore, Owner) {
    let mut store = FragmentStore::open_memory().unwrap();
    let dataspace = store.create_dataspace("bookstore").unwrap();
    let owner = store.create_owner(&dataspace, "shop-1").unwrap();
    store
        .store_data_nodes(
            &owner,
            &[
                DataNode::new("/bookstore")
                    .with_child(
                        DataNode::new("/bookstore/categories[@code='1']").with_child(
                            DataNode::new("/bookstore/categories[@code='1']/books[@title='Matilda']"),
                        ),
                    )
                    .with_child(DataNode::new("/bookstore/categories[@code='2']"))
                    .with_child(DataNode::new("/bookstore/staff")),
                DataNode::new("/warehouse"),
            ],
        )
        .unwrap();
    (store, owner)
}

fn exists(store: &FragmentStore, owner: &Owner, path: &str) -> bool {
    !store
        .get_data_nodes_for_paths(owner, [path], FetchDescendants::Omit)
        .unwrap()
        .is_empty()
}

#[test]
fn test_delete_removes_subtree() {
    let (mut store, owner) = setup();
    let summary = store
        .delete_data_node(&owner, "/bookstore/categories[@code=\"1\"]")
        .unwrap();
    assert_eq!(summary.subtrees_deleted, 1);
    assert!(!exists(&store, &owner, "/bookstore/categories[@code='1']"));
    assert!(!exists(
        &store,
        &owner,
        "/bookstore/categories[@code='1']/books[@title='Matilda']"
    ));
    assert!(exists(&store, &owner, "/bookstore/categories[@code='2']"));
}

#[test]
fn test_delete_missing_names_callers_path() {
    let (mut store, owner) = setup();
    let err = store
        .delete_data_node(&owner, "/bookstore/categories[@code=\"7\"]")
        .unwrap_err();
    assert!(matches!(err, Error::DataNodeNotFound { ref path, .. }
        if path == "/bookstore/categories[@code=\"7\"]"));
}

#[test]
fn test_batch_delete_is_all_or_nothing() {
    let (mut store, owner) = setup();
    let err = store
        .delete_data_nodes(
            &owner,
            ["/warehouse", "/bookstore/ghost", "nonsense", "/bookstore/staff"],
        )
        .unwrap_err();
    let Error::DataNodesNotFound { paths, .. } = err else {
        panic!("expected DataNodesNotFound, got {err:?}");
    };
    assert_eq!(
        paths.into_iter().collect::<Vec<_>>(),
        ["/bookstore/ghost", "nonsense"]
    );
    assert!(exists(&store, &owner, "/warehouse"));
    assert!(exists(&store, &owner, "/bookstore/staff"));

    let summary = store
        .delete_data_nodes(&owner, ["/warehouse", "/bookstore/staff"])
        .unwrap();
    assert_eq!(summary.subtrees_deleted, 2);
    assert!(!exists(&store, &owner, "/warehouse"));
}

#[test]
fn test_list_path_deletes_every_element() {
    let (mut store, owner) = setup();
    let summary = store
        .delete_data_node(&owner, "/bookstore/categories")
        .unwrap();
    assert_eq!(summary.subtrees_deleted, 2);
    let bookstore = store
        .get_data_nodes(&owner, "/bookstore", FetchDescendants::All)
        .unwrap();
    assert_eq!(bookstore[0].subtree_size(), 2);
}

#[test]
fn test_list_delete_requires_a_list() {
    let (mut store, owner) = setup();
    assert!(matches!(
        store.delete_list_data_node(&owner, "/bookstore/staff"),
        Err(Error::Validation(_))
    ));
    assert!(exists(&store, &owner, "/bookstore/staff"));

    store
        .delete_list_data_node(&owner, "/bookstore/categories[@code='2']")
        .unwrap();
    assert!(!exists(&store, &owner, "/bookstore/categories[@code='2']"));

    assert!(matches!(
        store.delete_list_data_node(&owner, "/bookstore/shelves"),
        Err(Error::DataNodeNotFound { .. })
    ));
}

#[test]
fn test_root_marker_deletes_everything() {
    let (mut store, owner) = setup();
    let summary = store.delete_data_nodes(&owner, ["/"]).unwrap();
    assert_eq!(summary.subtrees_deleted, 2);
    assert!(
        store
            .get_data_nodes_for_paths(&owner, ["/"], FetchDescendants::Omit)
            .unwrap()
            .is_empty()
    );
    assert!(matches!(
        store.get_data_nodes(&owner, "/", FetchDescendants::Omit),
        Err(Error::DataNodeNotFound { .. })
    ));
}

#[test]
fn test_delete_for_owners() {
    let (mut store, first) = setup();
    let dataspace = store.resolve_dataspace("bookstore").unwrap();
    let second = store.create_owner(&dataspace, "shop-2").unwrap();
    let third = store.create_owner(&dataspace, "shop-3").unwrap();
    for owner in [&second, &third] {
        store
            .store_data_node(owner, &DataNode::new("/bookstore"))
            .unwrap();
    }

    let summaries = store
        .delete_data_nodes_for_owners(&dataspace, ["shop-1", "shop-2", "shop-unknown"])
        .unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries["shop-1"].subtrees_deleted, 2);
    assert_eq!(summaries["shop-2"].subtrees_deleted, 1);

    assert!(!exists(&store, &first, "/bookstore"));
    assert!(!exists(&store, &second, "/bookstore"));
    assert!(exists(&store, &third, "/bookstore"));
    assert_eq!(store.list_owners(&dataspace).unwrap().len(), 3);
}

#[test]
fn test_deleting_owner_cascades() {
    let (store, owner) = setup();
    store.delete_owner(&owner).unwrap();
    let count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM fragment", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}
