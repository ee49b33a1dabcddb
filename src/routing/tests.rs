//! Routing Module Tests
//!
//! ## Test Scopes
//! - **Partitioner**: deterministic hashing, range and spread of keys.
//! - **Ring**: owner selection is distinct, stable and bounded by member count.
//! - **Router**: readiness, table completeness, rebuilds and teardown.

#[cfg(test)]
mod tests {
    use crate::config::RoutingConfig;
    use crate::error::DMapError;
    use crate::membership::{MembershipService, Node, NodeId};
    use crate::routing::ring::HashRing;
    use crate::routing::{Partitioner, Router, RoutingTable};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn ids(ports: &[u16]) -> Vec<NodeId> {
        ports.iter().map(|p| NodeId::from_addr(addr(*p))).collect()
    }

    fn routing_config(partition_count: u32, replica_count: usize) -> RoutingConfig {
        RoutingConfig {
            partition_count,
            replica_count,
            ..RoutingConfig::default()
        }
    }

    // ============================================================
    // PARTITIONER TESTS
    // ============================================================

    #[test]
    fn test_partition_is_within_range() {
        let partitioner = Partitioner::new(271);

        for i in 0..1000 {
            let key = format!("test_key_{}", i);
            let partition = partitioner.get_partition(&key);
            assert!(
                partition < partitioner.num_partitions(),
                "Partition {} should be < {}",
                partition,
                partitioner.num_partitions()
            );
        }
    }

    #[test]
    fn test_partition_distribution() {
        let partitioner = Partitioner::new(271);
        let mut partition_counts = std::collections::HashMap::new();

        for i in 0..10000 {
            let key = format!("book_{}", i);
            *partition_counts
                .entry(partitioner.get_partition(&key))
                .or_insert(0) += 1;
        }

        // ~37 keys per partition on average; nearly every partition should be hit.
        assert!(
            partition_counts.len() > 250,
            "Should have more than 250 distinct partitions used, got: {}",
            partition_counts.len()
        );
    }

    // ============================================================
    // RING TESTS
    // ============================================================

    #[test]
    fn test_ring_owners_are_distinct() {
        let ring = HashRing::new(&ids(&[1, 2, 3, 4]), 64);

        for partition in 0..100 {
            let owners = ring.owners(partition, 3);
            assert_eq!(owners.len(), 3);
            let unique: HashSet<_> = owners.iter().collect();
            assert_eq!(unique.len(), 3, "owners of {} repeat a member", partition);
        }
    }

    #[test]
    fn test_ring_caps_owner_count_at_member_count() {
        let ring = HashRing::new(&ids(&[1, 2]), 16);
        assert_eq!(ring.owners(7, 5).len(), 2);
    }

    #[test]
    fn test_ring_ignores_member_order_and_duplicates() {
        let a = HashRing::new(&ids(&[3, 1, 2, 2]), 32);
        let b = HashRing::new(&ids(&[1, 2, 3]), 32);

        for partition in 0..50 {
            assert_eq!(a.owners(partition, 2), b.owners(partition, 2));
        }
    }

    #[test]
    fn test_ring_join_moves_only_some_partitions() {
        let before = HashRing::new(&ids(&[1, 2, 3]), 64);
        let after = HashRing::new(&ids(&[1, 2, 3, 4]), 64);

        let moved = (0..271)
            .filter(|p| before.owners(*p, 1) != after.owners(*p, 1))
            .count();

        assert!(moved > 0, "a new member should take some partitions");
        assert!(moved < 200, "too many partitions moved: {}", moved);
    }

    // ============================================================
    // TABLE TESTS
    // ============================================================

    #[test]
    fn test_table_backups_exclude_primary() {
        let ring = HashRing::new(&ids(&[1, 2, 3]), 64);
        let table = RoutingTable::build(1, 64, &ring, 2).unwrap();

        for owners in &table.partitions {
            assert_eq!(owners.backups.len(), 1);
            assert!(!owners.backups.contains(&owners.primary));
        }
    }

    #[test]
    fn test_table_build_needs_members() {
        let ring = HashRing::new(&[], 64);
        assert!(RoutingTable::build(1, 64, &ring, 1).is_none());
    }

    // ============================================================
    // ROUTER TESTS
    // ============================================================

    #[test]
    fn test_router_not_ready_before_build() {
        let router = Router::new(&routing_config(16, 1));

        assert!(!router.is_ready());
        assert_eq!(router.version(), 0);
        assert!(matches!(
            router.owners_of(0),
            Err(DMapError::RoutingNotReady)
        ));
        assert!(matches!(router.snapshot(), Err(DMapError::RoutingNotReady)));
    }

    #[tokio::test]
    async fn test_snapshot_covers_every_partition() {
        let membership = MembershipService::new(addr(3320));
        membership.join(Node::new(addr(3321)));
        membership.join(Node::new(addr(3322)));

        let router = Router::new(&routing_config(271, 2));
        router.rebuild(&membership);

        let table = router.snapshot().unwrap();
        assert_eq!(table.len(), 271);

        let ids: HashSet<u32> = table.partitions.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), 271);
        assert!(ids.iter().all(|id| *id < 271));
        for (position, owners) in table.partitions.iter().enumerate() {
            assert_eq!(owners.id as usize, position);
        }
    }

    #[tokio::test]
    async fn test_single_member_owns_everything() {
        let membership = MembershipService::new(addr(3320));
        let router = Router::new(&routing_config(64, 3));
        router.rebuild(&membership);

        let table = router.snapshot().unwrap();
        let local = membership.local_id();
        assert_eq!(table.primary_partitions(local).len(), 64);
        assert!(table.backup_partitions(local).is_empty());
    }

    #[tokio::test]
    async fn test_owners_of_rejects_out_of_range() {
        let membership = MembershipService::new(addr(3320));
        let router = Router::new(&routing_config(8, 1));
        router.rebuild(&membership);

        assert!(router.owners_of(7).is_ok());
        assert!(matches!(
            router.owners_of(8),
            Err(DMapError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_old_snapshot_survives_rebuild() {
        let membership = MembershipService::new(addr(3320));
        let router = Router::new(&routing_config(32, 1));
        router.rebuild(&membership);

        let old = router.snapshot().unwrap();
        membership.join(Node::new(addr(3321)));
        router.rebuild(&membership);
        let new = router.snapshot().unwrap();

        assert!(new.version > old.version);
        assert_eq!(old.len(), 32);
        assert!(
            old.partitions
                .iter()
                .all(|p| p.primary == *membership.local_id())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rebuilds_publish_complete_tables() {
        let membership = MembershipService::new(addr(3320));
        let router = Router::new(&routing_config(128, 2));
        router.rebuild(&membership);

        let mut handles = Vec::new();
        for port in 3321..3329 {
            let membership = membership.clone();
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                membership.join(Node::new(addr(port)));
                router.rebuild(&membership);
                let table = router.snapshot().unwrap();
                assert_eq!(table.len(), 128);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // After all callers return, the table reflects the final view.
        let table = router.snapshot().unwrap();
        let owners: HashSet<NodeId> = table
            .partitions
            .iter()
            .flat_map(|p| std::iter::once(p.primary.clone()).chain(p.backups.clone()))
            .collect();
        assert_eq!(owners.len(), 9);
    }

    #[tokio::test]
    async fn test_rebuilder_follows_membership() {
        let membership = MembershipService::new(addr(3320));
        let router = Router::new(&routing_config(32, 1));
        let handle = router.spawn_rebuilder(membership.clone());

        wait_for(|| router.is_ready()).await;
        let first = router.version();

        membership.join(Node::new(addr(3321)));
        wait_for(|| router.version() > first).await;

        let table = router.snapshot().unwrap();
        let peer = NodeId::from_addr(addr(3321));
        assert!(!table.primary_partitions(&peer).is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn test_teardown_discards_table() {
        let membership = MembershipService::new(addr(3320));
        let router = Router::new(&routing_config(16, 1));
        router.rebuild(&membership);
        assert!(router.is_ready());

        router.teardown();
        assert!(matches!(
            router.owners_of(0),
            Err(DMapError::RoutingNotReady)
        ));
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }
}
