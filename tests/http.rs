//! HTTP Transport Integration Tests
//!
//! Two members served by axum on ephemeral ports, talking through
//! `HttpTransport`. Covers the join handshake, forwarding with error
//! reconstruction, the introspection endpoints, and the client API.

use dmap_cluster::client::ClusterClient;
use dmap_cluster::config::Config;
use dmap_cluster::dmap::WriteOption;
use dmap_cluster::error::DMapError;
use dmap_cluster::node::ClusterNode;
use dmap_cluster::routing::RoutingTable;
use dmap_cluster::stats::Stats;
use dmap_cluster::storage::EngineRegistry;
use dmap_cluster::transport::handlers::app;
use dmap_cluster::transport::http::HttpTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn spawn_member() -> (ClusterNode, SocketAddr, Arc<HttpTransport>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = Config {
        bind: addr,
        ..Config::default()
    };
    config.routing.replica_count = 2;

    let transport = Arc::new(HttpTransport::new(Duration::from_secs(2)));
    let node = ClusterNode::start(&config, EngineRegistry::with_defaults(), transport.clone())
        .unwrap();

    let app = app(node.service.clone(), node.locks.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (node, addr, transport)
}

/// Starts two members and joins the second through the first.
async fn two_members() -> (ClusterNode, ClusterNode) {
    let (a, a_addr, _) = spawn_member().await;
    let (b, _, b_transport) = spawn_member().await;

    let members = b_transport
        .join(a_addr, &b.membership.local_node)
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
    b.membership.merge(members);

    for _ in 0..200 {
        let ready = [&a, &b].iter().all(|node| {
            node.router
                .snapshot()
                .map(|table| {
                    table.partitions.iter().all(|p| p.backups.len() == 1)
                })
                .unwrap_or(false)
        });
        if ready {
            return (a, b);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("members never saw each other");
}

#[tokio::test]
async fn test_join_and_forward_over_http() {
    let (a, b) = two_members().await;

    // Every key has both members as owners, so writes through either member
    // are visible through the other.
    for i in 0..20 {
        let key = format!("book_{}", i);
        b.dmap("books").unwrap().put(&key, "dune", &[]).await.unwrap();
        assert_eq!(a.dmap("books").unwrap().get(&key).await.unwrap(), "dune");
    }
    assert_eq!(a.service.stats(false).entries, 20);
    assert_eq!(b.service.stats(false).entries, 20);
}

#[tokio::test]
async fn test_errors_survive_the_wire() {
    let (a, b) = two_members().await;

    // Find a key whose primary is `a`, so `b` has to forward.
    let key = (0..)
        .map(|i| format!("key_{}", i))
        .find(|key| {
            let partition = b.router.resolve_partition(key);
            b.router
                .owners_of(partition)
                .map(|owners| owners.is_primary(a.membership.local_id()))
                .unwrap_or(false)
        })
        .unwrap();

    let map = b.dmap("m").unwrap();
    assert!(matches!(map.get(&key).await, Err(DMapError::KeyNotFound)));

    map.put(&key, "first", &[WriteOption::Nx]).await.unwrap();
    assert!(matches!(
        map.put(&key, "second", &[WriteOption::Nx]).await,
        Err(DMapError::KeyFound)
    ));

    map.put(&key, "text", &[]).await.unwrap();
    assert!(matches!(
        map.incr(&key, 1).await,
        Err(DMapError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_locks_over_http() {
    let (a, b) = two_members().await;
    let hour = Duration::from_secs(3600);

    let ctx = a.locks.lock("jobs", "nightly", hour).await.unwrap();
    assert!(matches!(
        b.locks.lock("jobs", "nightly", hour).await,
        Err(DMapError::LockNotAcquired)
    ));

    b.locks.unlock(&ctx).await.unwrap();
    assert!(matches!(
        a.locks.unlock(&ctx).await,
        Err(DMapError::NoSuchLock)
    ));
}

#[tokio::test]
async fn test_destroy_over_http() {
    let (a, b) = two_members().await;
    let map = a.dmap("doomed").unwrap();
    for i in 0..10 {
        map.put(&format!("key_{}", i), "v", &[]).await.unwrap();
    }

    b.dmap("doomed").unwrap().destroy().await.unwrap();

    assert_eq!(a.service.stats(false).entries, 0);
    assert_eq!(b.service.stats(false).entries, 0);
}

#[tokio::test]
async fn test_introspection_endpoints() {
    let (a, _b) = two_members().await;
    let base = format!("http://{}", a.membership.local_id());
    let client = reqwest::Client::new();

    let table: Option<RoutingTable> = client
        .get(format!("{}/cluster/routing", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(table.unwrap().len(), 271);

    let stats: Stats = client
        .get(format!("{}/stats?runtime=true", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats.runtime.is_some());

    let stats: Stats = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats.runtime.is_none());

    let members: Vec<dmap_cluster::membership::Node> = client
        .get(format!("{}/cluster/members", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
}

// ============================================================
// CLIENT TESTS
// ============================================================

fn client_for(node: &ClusterNode) -> ClusterClient {
    ClusterClient::new(vec![node.membership.local_node.addr], Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_client_ping() {
    let (a, b) = two_members().await;
    let client = client_for(&a);

    client.ping(b.membership.local_node.addr).await.unwrap();
    let echoed = client
        .ping_with_message(b.membership.local_node.addr, "dmaps all the way down")
        .await
        .unwrap();
    assert_eq!(echoed, "dmaps all the way down");
}

#[tokio::test]
async fn test_client_entry_operations() {
    let (a, b) = two_members().await;
    let map = client_for(&a).dmap("mydmap").unwrap();

    // put / get / delete
    map.put("mykey", "myvalue", &[]).await.unwrap();
    assert_eq!(map.get("mykey").await.unwrap(), "myvalue");
    assert_eq!(
        b.dmap("mydmap").unwrap().get("mykey").await.unwrap(),
        "myvalue"
    );
    map.delete("mykey").await.unwrap();
    assert!(matches!(map.get("mykey").await, Err(DMapError::KeyNotFound)));

    // get_put
    assert_eq!(map.get_put("swap", "one").await.unwrap(), None);
    assert_eq!(
        map.get_put("swap", "two").await.unwrap().unwrap(),
        "one"
    );

    // expire
    map.put("short", "v", &[]).await.unwrap();
    map.expire("short", Duration::from_millis(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(matches!(map.get("short").await, Err(DMapError::KeyNotFound)));

    // destroy
    map.destroy().await.unwrap();
    assert!(matches!(map.get("swap").await, Err(DMapError::KeyNotFound)));
}

#[tokio::test]
async fn test_client_counters() {
    let (a, _b) = two_members().await;
    let map = client_for(&a).dmap("counters").unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let map = map.clone();
        handles.push(tokio::spawn(async move { map.incr("visits", 1).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(map.incr("visits", 1).await.unwrap(), 21);

    map.put("stock", "11", &[]).await.unwrap();
    for _ in 0..10 {
        map.decr("stock", 1).await.unwrap();
    }
    assert_eq!(map.decr("stock", 1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_client_locks() {
    let (a, b) = two_members().await;
    let map = client_for(&a).dmap("mydmap").unwrap();
    let other = client_for(&b).dmap("mydmap").unwrap();

    let ctx = map.lock("lock.foo.key", Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        other.lock("lock.foo.key", Duration::from_millis(1)).await,
        Err(DMapError::LockNotAcquired)
    ));
    map.unlock(&ctx).await.unwrap();
    assert!(matches!(map.unlock(&ctx).await, Err(DMapError::NoSuchLock)));

    // A short lock extended by a lease outlives its original ttl.
    let mut ctx = map
        .lock_with_timeout("lock.foo.key", Duration::from_millis(50), Duration::from_secs(1))
        .await
        .unwrap();
    map.lease(&mut ctx, Duration::from_secs(3600)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        other.lock("lock.foo.key", Duration::from_millis(1)).await,
        Err(DMapError::LockNotAcquired)
    ));
    other.unlock(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_client_introspection_and_seed_failover() {
    let (a, _b) = two_members().await;

    // An address nobody listens on, listed first.
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = ClusterClient::new(
        vec![dead, a.membership.local_node.addr],
        Duration::from_secs(5),
    )
    .unwrap();

    assert_eq!(client.routing_table().await.unwrap().len(), 271);
    assert_eq!(client.members().await.unwrap().len(), 2);
    assert!(client.stats(true).await.unwrap().runtime.is_some());

    client.dmap("m").unwrap().put("k", "v", &[]).await.unwrap();
    assert_eq!(client.dmap("m").unwrap().get("k").await.unwrap(), "v");
}

#[tokio::test]
async fn test_client_reserved_names_are_refused() {
    let (a, _b) = two_members().await;
    let client = client_for(&a);

    assert!(matches!(
        client.dmap("__lock__.orders"),
        Err(DMapError::InvalidArgument(_))
    ));
    assert!(matches!(client.dmap(""), Err(DMapError::InvalidArgument(_))));

    // The member refuses them too when the request is built by hand.
    let request = dmap_cluster::dmap::Request::Delete {
        dmap: "__lock__.orders".to_string(),
        key: "order_1".to_string(),
    };
    let status = reqwest::Client::new()
        .post(format!("http://{}/dmap", a.membership.local_id()))
        .json(&request)
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}
