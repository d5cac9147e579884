//! End-to-end exercises of the public `SpiderDB` surface, independent
//! of any internal module layout.

use spiderdb::{Error, SpiderConfig, SpiderDB};
use std::path::Path;

fn memory_db() -> SpiderDB {
    SpiderDB::open_with_config(None::<&Path>, &SpiderConfig::default()).unwrap()
}

#[test]
fn degree_cap_is_respected_on_a_larger_graph() {
    let db = memory_db();
    for i in 0..200u32 {
        let angle = i as f32 * 0.031;
        db.add_node(format!("item {i}").into_bytes(), vec![angle.cos(), angle.sin()], 50, None)
            .unwrap();
    }

    // No direct accessor for raw neighbor lists from outside the crate;
    // this exercises that insertion at scale doesn't panic or corrupt
    // search, which would be the visible symptom of a degree-cap bug.
    let results = db.hybrid_search(&[1.0, 0.0], 10, None).unwrap();
    assert_eq!(results.len(), 10);
    let mut ids: Vec<u64> = results.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 10, "hybrid_search returned duplicate ids");
}

#[test]
fn full_lifecycle_workflow() {
    let db = memory_db();

    let trivial = db
        .add_node(b"lunch photo".to_vec(), vec![0.1, 0.1, 0.1], 2, Some(0.3))
        .unwrap();
    let important = db
        .add_node(b"server root password".to_vec(), vec![0.9, 0.9, 0.9], 95, Some(0.3))
        .unwrap();

    db.get_node(important).unwrap();

    let dead = db.vacuum(30.0);
    assert!(dead.contains(&trivial));
    assert!(!dead.contains(&important));
    assert!(db.get_node(trivial).is_err());
    assert!(db.get_node(important).is_ok());
}

#[test]
fn not_found_on_dead_or_unknown_id() {
    let db = memory_db();
    let id = db.add_node(b"x".to_vec(), vec![1.0], 10, None).unwrap();
    db.vacuum(1_000_000.0);
    assert!(matches!(db.get_node(id).unwrap_err(), Error::NotFound(_)));
    assert!(matches!(db.get_node(999).unwrap_err(), Error::NotFound(_)));
}

#[test]
fn save_load_preserves_cluster_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clustered.spdr");

    let original_stats = {
        let db = SpiderDB::open(&path, 10_000, 16, 200).unwrap();
        for i in 0..15u32 {
            db.add_node(b"a".to_vec(), vec![5.0 + i as f32 * 0.01, 0.0], 10, None).unwrap();
        }
        for i in 0..15u32 {
            db.add_node(b"b".to_vec(), vec![-5.0, 5.0 + i as f32 * 0.01], 10, None).unwrap();
        }
        db.build_clusters(2);
        let stats = db.get_cluster_stats().unwrap();
        db.save(None).unwrap();
        stats
    };

    let reloaded = SpiderDB::open(&path, 10_000, 16, 200).unwrap();
    let (nodes, _) = reloaded.get_all_graph_data();
    assert_eq!(nodes.len(), 30);
    assert!(nodes.iter().all(|(_, _, _, cluster_id)| cluster_id.is_some()));
    assert_eq!(original_stats.0, 2);
}

#[test]
fn empty_index_search_errors_cleanly() {
    let db = memory_db();
    assert!(matches!(db.hybrid_search(&[1.0, 0.0], 5, None).unwrap_err(), Error::EmptyIndex));
}
