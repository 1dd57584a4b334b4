// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Stores, adds, leaf updates, subtree updates and list replacement.

use std::collections::BTreeMap;

use canopy_store_db::{
    DataNode, DataNodeError, Error, FetchDescendants, FragmentStore, Leaves, Owner, WriteSummary,
};
use serde_json::json;

fn setup() -> (FragmentStore, Owner) {
    let mut store = FragmentStore::open_memory().unwrap();
    let dataspace = store.create_dataspace("bookstore").unwrap();
    let owner = store.create_owner(&dataspace, "shop-1").unwrap();
    store
        .store_data_node(
            &owner,
            &DataNode::new("/bookstore")
                .with_leaf("bookstore-name", "Easons")
                .with_child(category("1", "Children"))
                .with_child(category("2", "Thriller")),
        )
        .unwrap();
    (store, owner)
}

fn category(code: &str, name: &str) -> DataNode {
    DataNode::new(format!("/bookstore/categories[@code='{code}']"))
        .with_leaf("code", code)
        .with_leaf("name", name)
}

fn get(store: &FragmentStore, owner: &Owner, path: &str) -> DataNode {
    let mut nodes = store
        .get_data_nodes(owner, path, FetchDescendants::All)
        .unwrap();
    assert_eq!(nodes.len(), 1, "expected one node at {path}");
    nodes.remove(0)
}

fn leaves(pairs: &[(&str, serde_json::Value)]) -> Leaves {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

mod store {
    use super::*;

    #[test]
    fn test_duplicates_are_reported_and_others_kept() {
        let (mut store, owner) = setup();
        let err = store
            .store_data_nodes(
                &owner,
                &[
                    DataNode::new("/magazines"),
                    DataNode::new("/bookstore"),
                    DataNode::new("/newspapers"),
                ],
            )
            .unwrap_err();
        let Error::AlreadyExists { paths, .. } = err else {
            panic!("expected AlreadyExists, got {err:?}");
        };
        assert_eq!(paths.into_iter().collect::<Vec<_>>(), ["/bookstore"]);

        get(&store, &owner, "/magazines");
        get(&store, &owner, "/newspapers");
        assert_eq!(
            get(&store, &owner, "/bookstore").leaf("bookstore-name"),
            Some(&json!("Easons"))
        );
    }

    #[test]
    fn test_paths_are_stored_normalized() {
        let (mut store, owner) = setup();
        store
            .store_data_node(&owner, &DataNode::new("/shelf[@id=\"a\"]").with_leaf("id", "a"))
            .unwrap();
        assert_eq!(get(&store, &owner, "/shelf[@id='a']").path(), "/shelf[@id='a']");

        let err = store
            .store_data_node(&owner, &DataNode::new("/shelf[ @id = 'a' ]"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_invalid_tree_writes_nothing() {
        let (mut store, owner) = setup();
        let node = DataNode::new("/magazines").with_child(DataNode::new("/elsewhere/child"));
        assert!(matches!(
            store.store_data_node(&owner, &node),
            Err(Error::InvalidDataNode(DataNodeError::ChildOutsideParent { .. }))
        ));
        assert!(
            store
                .get_data_nodes_for_paths(&owner, ["/magazines"], FetchDescendants::Omit)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_root_marker_stores_children_as_top_level() {
        let (mut store, owner) = setup();
        let summary = store
            .store_data_node(
                &owner,
                &DataNode::new("/")
                    .with_child(DataNode::new("/magazines"))
                    .with_child(DataNode::new("/newspapers")),
            )
            .unwrap();
        assert_eq!(summary.fragments_inserted, 2);
        let roots = store
            .get_data_nodes(&owner, "/", FetchDescendants::Omit)
            .unwrap();
        assert_eq!(roots.len(), 3);
    }
}

mod add {
    use super::*;

    #[test]
    fn test_add_children() {
        let (mut store, owner) = setup();
        let summary = store
            .add_child_data_nodes(
                &owner,
                "/bookstore/categories[@code=\"1\"]",
                &[DataNode::new("/bookstore/categories[@code='1']/books[@title='Matilda']")
                    .with_leaf("title", "Matilda")],
            )
            .unwrap();
        assert_eq!(summary.fragments_inserted, 1);
        assert_eq!(
            get(&store, &owner, "/bookstore/categories[@code='1']").subtree_size(),
            2
        );
    }

    #[test]
    fn test_add_under_missing_parent() {
        let (mut store, owner) = setup();
        let err = store
            .add_child_data_nodes(&owner, "/warehouse", &[DataNode::new("/warehouse/shelf")])
            .unwrap_err();
        assert!(matches!(err, Error::DataNodeNotFound { ref path, .. } if path == "/warehouse"));
    }

    #[test]
    fn test_add_child_outside_parent() {
        let (mut store, owner) = setup();
        let err = store
            .add_child_data_nodes(&owner, "/bookstore", &[DataNode::new("/warehouse/shelf")])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDataNode(DataNodeError::ChildOutsideParent { .. })
        ));
    }

    #[test]
    fn test_add_top_level_node() {
        let (mut store, owner) = setup();
        store
            .add_child_data_nodes(&owner, "/", &[DataNode::new("/warehouse")])
            .unwrap();
        get(&store, &owner, "/warehouse");
    }

    #[test]
    fn test_add_list_elements() {
        let (mut store, owner) = setup();
        store
            .add_list_elements(&owner, "/bookstore", &[category("3", "Poetry")])
            .unwrap();
        let categories = store
            .get_data_nodes(&owner, "/bookstore/categories", FetchDescendants::Omit)
            .unwrap();
        assert_eq!(categories.len(), 3);

        assert!(matches!(
            store.add_list_elements(&owner, "/bookstore", &[DataNode::new("/bookstore/staff")]),
            Err(Error::Validation(_))
        ));

        let err = store
            .add_list_elements(&owner, "/bookstore", &[category("1", "Again")])
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { ref paths, .. }
            if paths.contains("/bookstore/categories[@code='1']")));
    }
}

mod update {
    use super::*;

    #[test]
    fn test_update_leaves_merges() {
        let (mut store, owner) = setup();
        let summary = store
            .update_data_leaves(
                &owner,
                "/bookstore/categories[@code='1']",
                leaves(&[("name", json!("Kids")), ("shelf", json!(4))]),
            )
            .unwrap();
        assert_eq!(summary.attributes_rewritten, 1);

        let node = get(&store, &owner, "/bookstore/categories[@code='1']");
        assert_eq!(node.leaf("code"), Some(&json!("1")));
        assert_eq!(node.leaf("name"), Some(&json!("Kids")));
        assert_eq!(node.leaf("shelf"), Some(&json!(4)));
    }

    #[test]
    fn test_unchanged_leaves_write_nothing() {
        let (mut store, owner) = setup();
        let summary = store
            .update_data_leaves(
                &owner,
                "/bookstore",
                leaves(&[("bookstore-name", json!("Easons"))]),
            )
            .unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn test_batch_update_skips_missing_paths() {
        let (mut store, owner) = setup();
        let updates = BTreeMap::from([
            ("/bookstore".to_string(), leaves(&[("bookstore-name", json!("Hodges"))])),
            ("/warehouse".to_string(), leaves(&[("x", json!(1))])),
            ("not a path".to_string(), leaves(&[("x", json!(1))])),
            (
                "/bookstore/categories[@code=\"2\"]".to_string(),
                leaves(&[("name", json!("Crime"))]),
            ),
        ]);
        let summary = store.batch_update_data_leaves(&owner, &updates).unwrap();
        assert_eq!(summary.attributes_rewritten, 2);
        assert_eq!(
            get(&store, &owner, "/bookstore/categories[@code='2']").leaf("name"),
            Some(&json!("Crime"))
        );
    }

    #[test]
    fn test_single_update_rejects_bad_path() {
        let (mut store, owner) = setup();
        assert!(matches!(
            store.update_data_leaves(&owner, "bookstore", Leaves::new()),
            Err(Error::Path(_))
        ));
    }

    #[test]
    fn test_update_descendants_reconciles_and_is_idempotent() {
        let (mut store, owner) = setup();
        let wanted = DataNode::new("/bookstore")
            .with_leaf("bookstore-name", "Easons")
            .with_child(category("1", "Kids"))
            .with_child(
                category("3", "Poetry").with_child(
                    DataNode::new("/bookstore/categories[@code='3']/books[@title='Odes']")
                        .with_leaf("title", "Odes"),
                ),
            );

        let summary = store
            .update_data_nodes_and_descendants(&owner, std::slice::from_ref(&wanted))
            .unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                attributes_rewritten: 1,
                fragments_inserted: 2,
                subtrees_deleted: 1,
            }
        );
        assert_eq!(get(&store, &owner, "/bookstore"), wanted);

        let again = store
            .update_data_nodes_and_descendants(&owner, &[wanted])
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_update_descendants_skips_missing_nodes() {
        let (mut store, owner) = setup();
        let summary = store
            .update_data_nodes_and_descendants(
                &owner,
                &[
                    DataNode::new("/warehouse").with_leaf("x", 1),
                    DataNode::new("/bookstore").with_leaf("bookstore-name", "Hodges"),
                ],
            )
            .unwrap();
        assert_eq!(summary.attributes_rewritten, 1);
        assert_eq!(summary.subtrees_deleted, 2);
        assert!(!get(&store, &owner, "/bookstore").has_children());
    }
}

mod replace_list {
    use super::*;

    #[test]
    fn test_replace_list_content() {
        let (mut store, owner) = setup();
        store
            .add_child_data_nodes(
                &owner,
                "/bookstore/categories[@code='2']",
                &[DataNode::new("/bookstore/categories[@code='2']/books[@title='Good Omens']")
                    .with_leaf("title", "Good Omens")],
            )
            .unwrap();

        let summary = store
            .replace_list_content(
                &owner,
                "/bookstore",
                &[category("2", "Crime"), category("3", "Poetry")],
            )
            .unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                attributes_rewritten: 1,
                fragments_inserted: 1,
                subtrees_deleted: 2,
            }
        );

        let categories = store
            .get_data_nodes(&owner, "/bookstore/categories", FetchDescendants::All)
            .unwrap();
        assert_eq!(categories, vec![category("2", "Crime"), category("3", "Poetry")]);
    }

    #[test]
    fn test_other_children_are_kept() {
        let (mut store, owner) = setup();
        store
            .add_child_data_nodes(&owner, "/bookstore", &[DataNode::new("/bookstore/staff")])
            .unwrap();
        store
            .replace_list_content(&owner, "/bookstore", &[category("9", "Maps")])
            .unwrap();
        let bookstore = get(&store, &owner, "/bookstore");
        let children: Vec<_> = bookstore.children().map(DataNode::path).collect();
        assert_eq!(children, ["/bookstore/categories[@code='9']", "/bookstore/staff"]);
    }

    #[test]
    fn test_rejects_empty_and_mixed_lists() {
        let (mut store, owner) = setup();
        assert!(matches!(
            store.replace_list_content(&owner, "/bookstore", &[]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.replace_list_content(
                &owner,
                "/bookstore",
                &[category("1", "x"), DataNode::new("/bookstore/shelves[@id='1']")],
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.replace_list_content(&owner, "/bookstore", &[DataNode::new("/bookstore/staff")]),
            Err(Error::Validation(_))
        ));
        assert_eq!(
            store
                .get_data_nodes(&owner, "/bookstore/categories", FetchDescendants::Omit)
                .unwrap()
                .len(),
            2
        );
    }
}

mod concurrency {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use canopy_store_db::OpenMode;
    use tempfile::TempDir;

    static WRITER_BLOCKED: AtomicBool = AtomicBool::new(false);

    /// Busy handler of the writer: report that it is waiting on the rival's
    /// write lock, then keep retrying.
    fn signal_and_retry(attempt: i32) -> bool {
        WRITER_BLOCKED.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        attempt < 2000
    }

    #[test]
    fn test_rows_changed_by_another_connection_are_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("canopy.sqlite");
        let mut writer = FragmentStore::open(&path, OpenMode::Create).unwrap();
        let dataspace = writer.create_dataspace("bookstore").unwrap();
        let owner = writer.create_owner(&dataspace, "shop-1").unwrap();
        writer
            .store_data_node(
                &owner,
                &DataNode::new("/bookstore")
                    .with_child(category("1", "Children"))
                    .with_child(category("2", "Thriller"))
                    .with_child(category("3", "Poetry")),
            )
            .unwrap();

        // The rival changes two of the rows the writer is about to update and
        // holds its transaction open until the writer has read them.
        let rival = FragmentStore::open(&path, OpenMode::ReadWrite).unwrap();
        rival
            .connection()
            .execute_batch(
                r#"
                BEGIN IMMEDIATE;
                UPDATE fragment SET attributes = json_set(attributes, '$.name', 'Rival')
                WHERE path IN ('/bookstore/categories[@code=''1'']',
                               '/bookstore/categories[@code=''3'']');
                "#,
            )
            .unwrap();
        let rival = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !WRITER_BLOCKED.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            rival.connection().execute_batch("COMMIT").unwrap();
            rival
        });

        writer
            .connection()
            .busy_handler(Some(signal_and_retry))
            .unwrap();
        let updates: BTreeMap<String, Leaves> = ["1", "2", "3"]
            .into_iter()
            .map(|code| {
                (
                    format!("/bookstore/categories[@code='{code}']"),
                    leaves(&[("name", json!("Writer"))]),
                )
            })
            .collect();
        let err = writer
            .batch_update_data_leaves(&owner, &updates)
            .unwrap_err();
        drop(rival.join().unwrap());

        let Error::Concurrency { paths, .. } = err else {
            panic!("expected a concurrency error, got {err:?}");
        };
        assert_eq!(
            paths.into_iter().collect::<Vec<_>>(),
            [
                "/bookstore/categories[@code='1']",
                "/bookstore/categories[@code='3']"
            ]
        );

        let name = |code: &str| {
            get(&writer, &owner, &format!("/bookstore/categories[@code='{code}']"))
                .leaf("name")
                .cloned()
        };
        assert_eq!(name("1"), Some(json!("Rival")));
        assert_eq!(name("2"), Some(json!("Writer")));
        assert_eq!(name("3"), Some(json!("Rival")));
    }
}
