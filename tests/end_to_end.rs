//! End-to-end scenarios spanning more than one subsystem at once: HNSW
//! recall (spec §8 scenario 5), temporal decay (scenario 6), and the
//! checkpoint/verify/health surface a full embedder actually drives.

use nornicdb::{Config, GraphStore};

fn store(dir: &std::path::Path) -> GraphStore {
    GraphStore::open(dir, Config::fast()).unwrap()
}

#[test]
fn hnsw_basic_recall_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::fast();
    config.hnsw_dimensions = 3;
    let store = GraphStore::open(dir.path(), config).unwrap();

    let vectors = [
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
        vec![0.6, 0.8, 0.0],
        vec![0.7, 0.7, 0.14],
    ];
    let mut ids = Vec::new();
    for v in &vectors {
        let mut txn = store.begin();
        let id = txn
            .create_node(vec!["Vector".into()], vec![], Some(v.clone()))
            .unwrap();
        txn.commit().unwrap();
        ids.push(id);
    }

    let results = store.hnsw().search(&[0.6, 0.8, 0.0], 2, -1.0, None).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, ids[3]);
    assert!(results[0].1 > 0.999);
    assert!(results[1].1 >= 0.9);
}

#[test]
fn temporal_decay_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut txn = store.begin();
    let hot = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    let cold = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    txn.commit().unwrap();

    let base = 1_700_000_000_000i64;
    for i in 0..20 {
        store.temporal().record_access(&hot, base + i * 1_000);
    }
    store.temporal().record_access(&cold, base);

    let hot_modifier = store.temporal().decay_modifier(&hot, base + 20_000);
    let seven_days_ms = 7 * 24 * 3_600 * 1_000;
    let cold_modifier = store.temporal().decay_modifier(&cold, base + seven_days_ms);

    assert!(hot_modifier < 1.0, "hot node modifier was {hot_modifier}");
    assert!(cold_modifier > 1.0, "cold node modifier was {cold_modifier}");
}

#[test]
fn checkpoint_verify_and_health_check_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut txn = store.begin();
    let a = txn.create_node(vec!["Person".into()], vec![], None).unwrap();
    let b = txn.create_node(vec!["Person".into()], vec![], None).unwrap();
    txn.create_edge(a, b, "KNOWS".into(), vec![]).unwrap();
    let events = txn.commit().unwrap();
    store.record_commit_events(&events);

    let report = store.verify_integrity(Default::default());
    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);

    let sequence = store.checkpoint().unwrap();
    assert!(sequence >= 1);

    let health = store.health_check().unwrap();
    assert!(health.is_healthy());

    let metrics = store.metrics();
    assert_eq!(metrics.nodes_created, 2);
    assert_eq!(metrics.edges_created, 1);
    assert_eq!(metrics.txn_success_rate(), 1.0);
}
