//! Integration tests for key routing over real TCP connections.

use slotline_cluster::{key_slot, ClusterClient};

use crate::helpers::MockCluster;

#[tokio::test]
async fn set_then_get_across_primaries() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    for i in 0..6 {
        let key = format!("burst:{i}");
        client.set(key.clone(), format!("value-{i}")).await.unwrap();
        assert_eq!(
            cluster.served().last().copied(),
            Some(cluster.owner_of(&key)),
            "{key} written to the wrong node"
        );
    }
    for i in 0..6 {
        let value = client.get(format!("burst:{i}")).await.unwrap();
        assert_eq!(value.as_deref(), Some(format!("value-{i}").as_bytes()));
    }

    // every primary took part
    let served = cluster.served();
    for i in 0..3 {
        assert!(served.contains(&cluster.primary(i)));
    }
    client.shutdown();
}

#[tokio::test]
async fn repeated_gets_are_stable() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    client.set("greeting", "hello").await.unwrap();
    for _ in 0..5 {
        assert_eq!(
            client.get("greeting").await.unwrap().as_deref(),
            Some(&b"hello"[..])
        );
    }
}

#[tokio::test]
async fn missing_key_is_none() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();
    assert_eq!(client.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn hash_tags_share_a_node() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    assert_eq!(key_slot(b"user:{42}:name"), key_slot(b"user:{42}:email"));
    client.set("user:{42}:name", "ada").await.unwrap();
    client.set("user:{42}:email", "ada@example.com").await.unwrap();

    let served = cluster.served();
    assert_eq!(served.len(), 2);
    assert_eq!(served[0], served[1]);
}

#[tokio::test]
async fn bootstrap_reads_topology_once() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();

    assert_eq!(cluster.topology_queries(), 1);
    let view = client.view();
    assert_eq!(view.epoch(), 1);
    assert_eq!(view.nodes().count(), 3);
    assert_eq!(
        view.owner_of(key_slot(b"foo")),
        Some(&MockCluster::node_id(cluster.owner_of("foo")))
    );
}

#[tokio::test]
async fn stale_view_costs_one_refresh() {
    let cluster = MockCluster::start(3, false).await;
    let client = ClusterClient::connect(cluster.config()).await.unwrap();
    let before = cluster.topology_queries();

    // burst:0 hashes into the first third of the slot space
    cluster.insert("burst:0", "moved");
    cluster.reassign(0, cluster.primary(1));

    assert_eq!(
        client.get("burst:0").await.unwrap().as_deref(),
        Some(&b"moved"[..])
    );
    assert_eq!(cluster.topology_queries(), before + 1);
    assert_eq!(client.view().epoch(), 2);

    // the refreshed view routes straight to the new owner
    client.get("burst:0").await.unwrap();
    assert_eq!(cluster.served().last().copied(), Some(cluster.primary(1)));
    assert_eq!(cluster.topology_queries(), before + 1);
}

#[tokio::test]
async fn unreachable_seeds_fail_to_connect() {
    let cluster = MockCluster::start(1, false).await;
    cluster.set_down(cluster.primary(0), true);

    let err = ClusterClient::connect(cluster.config()).await.unwrap_err();
    assert_eq!(err.kind(), "ClusterUnreachable");
}
