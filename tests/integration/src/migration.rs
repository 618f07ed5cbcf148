//! Integration tests for slot migration (`ASK`) handling.

use slotline_cluster::{key_slot, ClusterClient};

use crate::helpers::MockCluster;

#[tokio::test]
async fn ask_is_followed_once_without_refresh() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();
    let before = cluster.topology_queries();

    // "migrating" sits in the middle third; move it toward the last node
    let slot = key_slot(b"migrating");
    assert_eq!(cluster.owner_of("migrating"), cluster.primary(1));
    cluster.set_ask(slot, cluster.primary(2));

    client.set("migrating", "v1").await.unwrap();
    assert_eq!(cluster.served(), vec![cluster.primary(2)]);

    // ASK never changes the view
    assert_eq!(cluster.topology_queries(), before);
    assert_eq!(client.view().epoch(), 1);
    assert_eq!(
        client.view().owner_of(slot),
        Some(&MockCluster::node_id(cluster.primary(1)))
    );
}

#[tokio::test]
async fn every_request_during_migration_asks_again() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    let slot = key_slot(b"migrating");
    cluster.set_ask(slot, cluster.primary(2));

    client.set("migrating", "v1").await.unwrap();
    assert_eq!(
        client.get("migrating").await.unwrap().as_deref(),
        Some(&b"v1"[..])
    );
    // the old owner redirected both
    assert_eq!(cluster.served(), vec![cluster.primary(2), cluster.primary(2)]);
}

#[tokio::test]
async fn migration_completes_with_moved() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    let slot = key_slot(b"migrating");
    cluster.set_ask(slot, cluster.primary(2));
    client.set("migrating", "v1").await.unwrap();

    // the whole middle range now belongs to the last node
    cluster.reassign(1, cluster.primary(2));
    client.set("migrating", "v2").await.unwrap();

    assert_eq!(
        client.view().owner_of(slot),
        Some(&MockCluster::node_id(cluster.primary(2)))
    );
    assert_eq!(
        client.get("migrating").await.unwrap().as_deref(),
        Some(&b"v2"[..])
    );
}
