//! Integration tests for node failures: replica reads, write failures and
//! recovery.

use slotline_cluster::{ClusterClient, ClusterError};

use crate::helpers::MockCluster;

#[tokio::test]
async fn reads_fall_back_to_replica() {
    let cluster = MockCluster::start(3, true).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    // "profile" lives in the last third
    cluster.insert("profile", "cached");
    assert_eq!(cluster.owner_of("profile"), cluster.primary(2));
    cluster.set_down(cluster.primary(2), true);

    assert_eq!(
        client.get("profile").await.unwrap().as_deref(),
        Some(&b"cached"[..])
    );
    assert_eq!(cluster.served(), vec![cluster.replica(2)]);
}

#[tokio::test]
async fn writes_fail_when_primary_is_down() {
    let cluster = MockCluster::start(3, true).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    let primary = cluster.primary(2);
    cluster.set_down(primary, true);

    let err = client.set("profile", "new").await.unwrap_err();
    assert_eq!(err, ClusterError::NodeUnreachable(MockCluster::node_id(primary)));
    // replicas never take writes
    assert!(cluster.served().is_empty());
}

#[tokio::test]
async fn recovered_primary_serves_again() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    let primary = cluster.primary(2);
    cluster.set_down(primary, true);
    assert!(client.set("profile", "v1").await.is_err());

    cluster.set_down(primary, false);
    // a refresh lists the node again, which brings it back up
    client.refresh().await.unwrap();
    client.set("profile", "v2").await.unwrap();
    assert_eq!(
        client.get("profile").await.unwrap().as_deref(),
        Some(&b"v2"[..])
    );
}

#[tokio::test]
async fn other_slots_keep_working_while_a_node_is_down() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    cluster.set_down(cluster.primary(2), true);

    // burst:0 and burst:1 live on the first two nodes
    client.set("burst:0", "a").await.unwrap();
    client.set("burst:1", "b").await.unwrap();
    assert_eq!(
        cluster.served(),
        vec![cluster.primary(0), cluster.primary(1)]
    );
}
