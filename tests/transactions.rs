//! Transaction semantics (spec §8 scenarios 1-3, idempotence laws).

use nornicdb::{Config, GraphStore, NornicError, PropertyValue};

fn store(dir: &std::path::Path) -> GraphStore {
    GraphStore::open(dir, Config::fast()).unwrap()
}

#[test]
fn basic_create_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut txn = store.begin();
    let id = txn
        .create_node(
            vec!["Person".into()],
            vec![
                ("name".into(), PropertyValue::String("Alice".into())),
                ("age".into(), PropertyValue::Int(30)),
            ],
            None,
        )
        .unwrap();
    txn.commit().unwrap();

    let node = store.storage().get_node(&id).unwrap();
    assert_eq!(node.properties.get("name"), Some(&PropertyValue::String("Alice".into())));
    assert_eq!(node.properties.get("age"), Some(&PropertyValue::Int(30)));

    let people = store.storage().nodes_by_label("Person");
    assert!(people.iter().any(|n| n.id == id));
}

#[test]
fn transactional_rollback_leaves_prior_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut setup = store.begin();
    let x = setup
        .create_node(
            vec!["Node".into()],
            vec![("age".into(), PropertyValue::Int(30))],
            None,
        )
        .unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin();
    let y = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    txn.update_node(
        x.clone(),
        vec!["Node".into()],
        vec![("age".into(), PropertyValue::Int(31))],
        None,
    )
    .unwrap();
    txn.rollback().unwrap();

    let x_after = store.storage().get_node(&x).unwrap();
    assert_eq!(x_after.properties.get("age"), Some(&PropertyValue::Int(30)));
    assert!(store.storage().get_node(&y).is_err());
}

#[test]
fn unique_constraint_rejects_conflicting_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.schema().add_unique_constraint("Person", "email");

    let mut setup = store.begin();
    setup
        .create_node(
            vec!["Person".into()],
            vec![("email".into(), PropertyValue::String("a@x".into()))],
            None,
        )
        .unwrap();
    setup.commit().unwrap();

    let mut txn = store.begin();
    txn.create_node(
        vec!["Person".into()],
        vec![("email".into(), PropertyValue::String("a@x".into()))],
        None,
    )
    .unwrap();
    let err = txn.commit().unwrap_err();
    assert!(matches!(err, NornicError::ConstraintViolation { .. }));
    assert_eq!(store.storage().nodes_by_label("Person").len(), 1);
}

#[test]
fn update_node_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut txn = store.begin();
    let id = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    txn.commit().unwrap();

    let props = vec![("k".into(), PropertyValue::String("v".into()))];
    for _ in 0..2 {
        let mut txn = store.begin();
        txn.update_node(id.clone(), vec!["Node".into()], props.clone(), None)
            .unwrap();
        txn.commit().unwrap();
    }

    let node = store.storage().get_node(&id).unwrap();
    assert_eq!(node.properties.get("k"), Some(&PropertyValue::String("v".into())));
}

#[test]
fn delete_node_then_read_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut txn = store.begin();
    let id = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    txn.commit().unwrap();

    let mut txn = store.begin();
    txn.delete_node(id.clone()).unwrap();
    txn.commit().unwrap();

    assert!(matches!(
        store.storage().get_node(&id).unwrap_err(),
        NornicError::NotFound(_)
    ));
}

#[test]
fn delete_node_cascades_its_edges() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());

    let mut txn = store.begin();
    let a = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    let b = txn.create_node(vec!["Node".into()], vec![], None).unwrap();
    let edge = txn.create_edge(a.clone(), b.clone(), "LINK".into(), vec![]).unwrap();
    txn.commit().unwrap();

    let mut txn = store.begin();
    txn.delete_node(a).unwrap();
    txn.commit().unwrap();

    assert!(store.storage().get_edge(&edge).is_err());
}
