//! Several registrars sharing one node object.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use libregistrar::annotation;
use libregistrar::store::MemoryNodeStore;
use libregistrar::{ANNOTATION_KEY, DriverIdentity, NodeAnnotationReconciler, RetryPolicy};

const NODE: &str = "worker-0";

fn patient() -> RetryPolicy {
    RetryPolicy {
        attempts: 50,
        initial_backoff: Duration::from_micros(100),
        max_backoff: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

fn drivers(store: &MemoryNodeStore) -> BTreeMap<String, String> {
    annotation::decode(store.annotation(NODE, ANNOTATION_KEY).as_deref()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrars_keep_every_entry() {
    let store = Arc::new(MemoryNodeStore::new());
    store.insert_node(
        NODE,
        Some(BTreeMap::from([("team".to_owned(), "storage".to_owned())])),
    );

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let reconciler = NodeAnnotationReconciler::new(Arc::clone(&store)).with_retry(patient());
            tokio::spawn(async move {
                reconciler
                    .register(NODE, &DriverIdentity::new(format!("driver-{i}"), format!("id-{i}")))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let expected: BTreeMap<_, _> = (0..6)
        .map(|i| (format!("driver-{i}"), format!("id-{i}")))
        .collect();
    assert_eq!(drivers(&store), expected);
    assert_eq!(store.annotation(NODE, "team").as_deref(), Some("storage"));
    assert_eq!(store.writes(), 6);
}

#[tokio::test]
async fn removal_leaves_co_tenants() {
    let store = Arc::new(MemoryNodeStore::new());
    store.insert_node(NODE, None);
    let a = NodeAnnotationReconciler::new(Arc::clone(&store));
    let b = NodeAnnotationReconciler::new(Arc::clone(&store));

    a.register(NODE, &DriverIdentity::new("driverA", "nodeX")).await.unwrap();
    b.register(NODE, &DriverIdentity::new("driverB", "nodeY")).await.unwrap();
    a.unregister(NODE, "driverA").await.unwrap();

    assert_eq!(
        drivers(&store),
        BTreeMap::from([("driverB".to_owned(), "nodeY".to_owned())])
    );
}

#[tokio::test]
async fn node_id_change_is_rewritten() {
    let store = Arc::new(MemoryNodeStore::new());
    store.insert_node(
        NODE,
        Some(BTreeMap::from([(
            ANNOTATION_KEY.to_owned(),
            r#"{"driverA":"stale-id"}"#.to_owned(),
        )])),
    );
    let reconciler = NodeAnnotationReconciler::new(Arc::clone(&store));

    reconciler
        .register(NODE, &DriverIdentity::new("driverA", "fresh-id"))
        .await
        .unwrap();

    assert_eq!(
        store.annotation(NODE, ANNOTATION_KEY).as_deref(),
        Some(r#"{"driverA":"fresh-id"}"#)
    );
}
