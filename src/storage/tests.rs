//! Storage Module Tests
//!
//! Validates key placement and the sharded store built on top of it.
//!
//! ## Test Scopes
//! - **HashRing**: determinism, wrap-around, balance, collisions and minimal key movement.
//! - **MemoryNode**: the in-process node client contract (incr, delete, scan globs).
//! - **ShardManager**: routing, membership guards and data migration on add / remove.
//! - **RemoteNode**: the HTTP client against a storage node served on a local port.

#[cfg(test)]
mod tests {
    use crate::error::ShardError;
    use crate::storage::client::{NodeClient, NodeConnector, SchemeConnector, glob_to_regex};
    use crate::storage::manager::ShardManager;
    use crate::storage::memory::{MemoryNode, MemoryRegistry};
    use crate::storage::remote::RemoteNode;
    use crate::storage::ring::HashRing;
    use crate::storage::types::NodeId;

    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|name| NodeId::from(*name)).collect()
    }

    fn sample_keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("page_{}", i)).collect()
    }

    async fn manager_with(
        names: &[&str],
        virtual_nodes: usize,
    ) -> (Arc<MemoryRegistry>, Arc<ShardManager>) {
        let registry = MemoryRegistry::new();
        let connector: Arc<dyn NodeConnector> = Arc::new(SchemeConnector::new(registry.clone()));
        let manager = ShardManager::connect(ids(names), virtual_nodes, connector)
            .await
            .unwrap();
        (registry, manager)
    }

    async fn seed(manager: &ShardManager, keys: &[String]) -> HashMap<String, i64> {
        let mut expected = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            let amount = (i as i64 % 7) + 1;
            manager.increment(key, amount).await.unwrap();
            expected.insert(key.clone(), amount);
        }
        expected
    }

    // ============================================================
    // HASH RING TESTS
    // ============================================================

    #[test]
    fn test_ring_locate_is_deterministic() {
        let ring = HashRing::with_nodes(ids(&["memory://a", "memory://b", "memory://c"]), 100);
        let same = HashRing::with_nodes(ids(&["memory://a", "memory://b", "memory://c"]), 100);

        for key in sample_keys(500) {
            let first = ring.locate(&key).cloned();
            assert_eq!(first, ring.locate(&key).cloned(), "Repeated lookups must agree");
            assert_eq!(first, same.locate(&key).cloned(), "Equal rings must agree");
        }
    }

    #[test]
    fn test_ring_empty_locates_nothing() {
        let ring = HashRing::new(100);
        assert!(ring.is_empty());
        assert!(ring.locate("home").is_none());
    }

    #[test]
    fn test_ring_successor_with_wrap_around() {
        let a = NodeId::from("memory://a");
        let b = NodeId::from("memory://b");
        let ring = HashRing::with_nodes(vec![a.clone(), b.clone()], 1);

        let pa = HashRing::hash("memory://a#0");
        let pb = HashRing::hash("memory://b#0");
        let (low, high) = if pa < pb { ((pa, &a), (pb, &b)) } else { ((pb, &b), (pa, &a)) };

        for key in sample_keys(300) {
            let h = HashRing::hash(&key);
            let expected = if h < low.0 {
                low.1
            } else if h < high.0 {
                high.1
            } else {
                // At or past the highest position: wrap to the lowest.
                low.1
            };
            assert_eq!(ring.locate(&key), Some(expected), "key {} (hash {})", key, h);
        }
    }

    #[test]
    fn test_ring_places_virtual_nodes() {
        let mut ring = HashRing::new(100);
        let a = NodeId::from("memory://a");

        let placed = ring.add(&a);
        assert_eq!(placed, ring.positions_of(&a));
        assert!(placed > 0 && placed <= 100);
        assert!(ring.contains(&a));
    }

    #[test]
    fn test_ring_add_is_idempotent() {
        let mut ring = HashRing::with_nodes(ids(&["memory://a", "memory://b"]), 100);
        let before = ring.len();

        let placed = ring.add(&NodeId::from("memory://a"));

        assert_eq!(placed, 0, "Re-adding a node must not take new positions");
        assert_eq!(ring.len(), before);
    }

    #[test]
    fn test_ring_collision_keeps_first_owner() {
        // Both ids hash their only virtual node to 2595072689.
        let first = NodeId::from("memory://n94118");
        let second = NodeId::from("memory://n106502");
        assert_eq!(HashRing::hash("memory://n94118#0"), 2595072689);
        assert_eq!(HashRing::hash("memory://n106502#0"), 2595072689);

        let mut ring = HashRing::new(1);
        assert_eq!(ring.add(&first), 1);
        assert_eq!(ring.add(&second), 0, "Colliding virtual node must be dropped");

        assert_eq!(ring.len(), 1);
        assert_eq!(ring.nodes(), vec![first.clone()]);
        assert_eq!(ring.locate("anything"), Some(&first));
        assert!(!ring.contains(&second));

        // Order decides the winner.
        let mut reversed = HashRing::new(1);
        reversed.add(&second);
        reversed.add(&first);
        assert_eq!(reversed.locate("anything"), Some(&second));
    }

    #[test]
    fn test_ring_remove_drops_only_that_node() {
        let a = NodeId::from("memory://a");
        let b = NodeId::from("memory://b");
        let mut ring = HashRing::with_nodes(vec![a.clone(), b.clone()], 100);
        let b_positions = ring.positions_of(&b);

        let removed = ring.remove(&a);

        assert!(removed > 0);
        assert!(!ring.contains(&a));
        assert_eq!(ring.positions_of(&b), b_positions);
        for key in sample_keys(200) {
            assert_eq!(ring.locate(&key), Some(&b));
        }
    }

    #[test]
    fn test_ring_distribution_is_balanced() {
        let nodes = ids(&["memory://a", "memory://b", "memory://c"]);
        let ring = HashRing::with_nodes(nodes.clone(), 100);

        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        let total = 30_000;
        for key in sample_keys(total) {
            *counts.entry(ring.locate(&key).unwrap().clone()).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 3, "Every node should own some keys");
        for node in &nodes {
            let share = counts[node] as f64 / total as f64;
            assert!(
                (share - 1.0 / 3.0).abs() < 0.15,
                "Node {} got share {:.3}, expected about 0.333",
                node,
                share
            );
        }
    }

    #[test]
    fn test_ring_add_moves_keys_only_to_new_node() {
        let mut ring = HashRing::with_nodes(ids(&["memory://a", "memory://b", "memory://c"]), 100);
        let before = ring.clone();
        let d = NodeId::from("memory://d");
        ring.add(&d);

        let mut moved = 0;
        for key in sample_keys(5_000) {
            let old_owner = before.locate(&key).unwrap();
            let new_owner = ring.locate(&key).unwrap();
            if old_owner != new_owner {
                assert_eq!(new_owner, &d, "Key {} moved between old nodes", key);
                moved += 1;
            }
        }
        assert!(moved > 0, "The new node should take over some keys");
    }

    // ============================================================
    // MEMORY NODE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_memory_node_incr_get_delete() {
        let node = MemoryNode::new(NodeId::from("memory://a"));

        assert_eq!(node.get("home").await.unwrap(), None);
        assert_eq!(node.incr_by("home", 3).await.unwrap(), 3);
        assert_eq!(node.incr_by("home", 2).await.unwrap(), 5);
        assert_eq!(node.get("home").await.unwrap(), Some(5));

        node.set("home", 42).await.unwrap();
        assert_eq!(node.get("home").await.unwrap(), Some(42));

        assert!(node.delete("home").await.unwrap());
        assert!(!node.delete("home").await.unwrap());
        assert_eq!(node.get("home").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_node_scan_glob() {
        let node = MemoryNode::new(NodeId::from("memory://a"));
        for key in ["page_1", "page_22", "user_1", "page.x"] {
            node.set(key, 1).await.unwrap();
        }

        let mut all = node.scan_keys("*").await.unwrap();
        all.sort();
        assert_eq!(all, vec!["page.x", "page_1", "page_22", "user_1"]);

        let mut pages = node.scan_keys("page_*").await.unwrap();
        pages.sort();
        assert_eq!(pages, vec!["page_1", "page_22"]);

        assert_eq!(node.scan_keys("page_?").await.unwrap(), vec!["page_1"]);
        // '.' is literal, not a regex wildcard.
        assert_eq!(node.scan_keys("page.?").await.unwrap(), vec!["page.x"]);
    }

    #[test]
    fn test_glob_escapes_regex_syntax() {
        let re = glob_to_regex("a+b(*)").unwrap();
        assert!(re.is_match("a+b(anything)"));
        assert!(!re.is_match("aab(x)"));
    }

    #[tokio::test]
    async fn test_memory_node_offline_is_unreachable() {
        let node = MemoryNode::new(NodeId::from("memory://a"));
        node.set_offline(true);

        let err = node.get("home").await.unwrap_err();
        assert!(matches!(err, ShardError::NodeUnreachable { .. }));
        assert!(err.is_unavailable());

        node.set_offline(false);
        assert_eq!(node.get("home").await.unwrap(), None);
    }

    #[test]
    fn test_registry_returns_same_store() {
        let registry = MemoryRegistry::new();
        let id = NodeId::from("memory://a");

        registry.open(&id).store_local("home", 9);

        assert_eq!(registry.open(&id).get_local("home"), Some(9));
        assert!(registry.get(&NodeId::from("memory://b")).is_none());
    }

    // ============================================================
    // SHARD MANAGER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_manager_get_absent_is_none() {
        let (_registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;

        assert_eq!(manager.get("never-seen").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manager_increment_routes_to_owner() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;

        assert_eq!(manager.increment("home", 2).await.unwrap(), 2);
        assert_eq!(manager.increment("home", 3).await.unwrap(), 5);
        assert_eq!(manager.get("home").await.unwrap(), Some(5));

        let owner = manager.locate_node("home").unwrap();
        let other = if owner.as_str() == "memory://a" { "memory://b" } else { "memory://a" };
        assert_eq!(registry.open(&owner).get_local("home"), Some(5));
        assert_eq!(registry.open(&NodeId::from(other)).get_local("home"), None);
    }

    #[tokio::test]
    async fn test_manager_without_nodes_fails() {
        let connector: Arc<dyn NodeConnector> = Arc::new(SchemeConnector::default());

        let empty = ShardManager::new(100, connector.clone());
        assert_eq!(empty.get("home").await.unwrap_err(), ShardError::NoNodesAvailable);
        assert_eq!(
            empty.increment("home", 1).await.unwrap_err(),
            ShardError::NoNodesAvailable
        );
        assert_eq!(empty.locate_node("home").unwrap_err(), ShardError::NoNodesAvailable);

        let result = ShardManager::connect(vec![], 100, connector).await;
        assert!(matches!(result, Err(ShardError::NoNodesAvailable)));
    }

    #[tokio::test]
    async fn test_manager_rejects_unknown_scheme() {
        let connector: Arc<dyn NodeConnector> = Arc::new(SchemeConnector::default());
        let result = ShardManager::connect(ids(&["redis://cache:6379"]), 100, connector).await;

        assert!(matches!(result, Err(ShardError::UnsupportedNode(_))));
    }

    #[tokio::test]
    async fn test_manager_unreachable_node_propagates() {
        let (registry, manager) = manager_with(&["memory://a"], 100).await;
        registry.open(&NodeId::from("memory://a")).set_offline(true);

        let err = manager.get("home").await.unwrap_err();
        assert!(matches!(err, ShardError::NodeUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_remove_last_node_is_rejected() {
        let (registry, manager) = manager_with(&["memory://a"], 100).await;
        manager.increment("home", 4).await.unwrap();

        let err = manager.remove_node(&NodeId::from("memory://a")).await.unwrap_err();

        assert_eq!(err, ShardError::LastNodeRemoval(NodeId::from("memory://a")));
        assert_eq!(manager.node_ids(), ids(&["memory://a"]));
        assert_eq!(manager.get("home").await.unwrap(), Some(4));
        assert_eq!(registry.open(&NodeId::from("memory://a")).get_local("home"), Some(4));
    }

    #[tokio::test]
    async fn test_remove_unknown_node_is_rejected() {
        let (_registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;

        let err = manager.remove_node(&NodeId::from("memory://zzz")).await.unwrap_err();

        assert_eq!(err, ShardError::UnknownNode(NodeId::from("memory://zzz")));
        assert_eq!(manager.node_count(), 2);
    }

    #[tokio::test]
    async fn test_add_existing_node_is_noop() {
        let (_registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        let ring_before = manager.ring_snapshot();

        let report = manager.add_node(NodeId::from("memory://a")).await.unwrap();

        assert_eq!(report.moved, 0);
        assert!(report.is_clean());
        assert_eq!(manager.node_count(), 2);
        assert_eq!(manager.ring_snapshot().len(), ring_before.len());
    }

    #[tokio::test]
    async fn test_add_node_moves_only_keys_it_now_owns() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        let keys = sample_keys(300);
        let expected = seed(&manager, &keys).await;
        let owners_before: HashMap<String, NodeId> = keys
            .iter()
            .map(|key| (key.clone(), manager.locate_node(key).unwrap()))
            .collect();

        let c = NodeId::from("memory://c");
        let report = manager.add_node(c.clone()).await.unwrap();

        assert!(report.is_clean());
        let mut owned_by_c = 0;
        for key in &keys {
            let owner = manager.locate_node(key).unwrap();
            if owner == c {
                owned_by_c += 1;
            } else {
                assert_eq!(owner, owners_before[key], "Key {} changed owner needlessly", key);
            }
            assert_eq!(manager.get(key).await.unwrap(), Some(expected[key]), "key {}", key);
            // Exactly one copy remains.
            let copies = ["memory://a", "memory://b", "memory://c"]
                .iter()
                .filter(|n| registry.open(&NodeId::from(**n)).get_local(key).is_some())
                .count();
            assert_eq!(copies, 1, "Key {} should live on exactly one node", key);
        }

        assert!(owned_by_c > 0);
        assert_eq!(report.moved, owned_by_c);
        assert_eq!(registry.open(&c).local_entry_count(), owned_by_c);
    }

    #[tokio::test]
    async fn test_add_then_remove_keeps_every_value() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        let keys = sample_keys(300);
        let expected = seed(&manager, &keys).await;

        let x = NodeId::from("memory://x");
        manager.add_node(x.clone()).await.unwrap();
        let report = manager.remove_node(&x).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(manager.node_ids(), ids(&["memory://a", "memory://b"]));
        assert_eq!(registry.open(&x).local_entry_count(), 0);
        for key in &keys {
            assert_eq!(manager.get(key).await.unwrap(), Some(expected[key]), "key {}", key);
        }
    }

    #[tokio::test]
    async fn test_add_node_keeps_data_already_on_it() {
        let registry = MemoryRegistry::new();
        let connector: Arc<dyn NodeConnector> = Arc::new(SchemeConnector::new(registry.clone()));
        let manager = ShardManager::connect(ids(&["memory://a"]), 100, connector)
            .await
            .unwrap();
        let c = NodeId::from("memory://c");

        // A key the two-node ring gives to c.
        let future_ring = HashRing::with_nodes(ids(&["memory://a", "memory://c"]), 100);
        let key = sample_keys(1_000)
            .into_iter()
            .find(|key| future_ring.locate(key) == Some(&c))
            .unwrap();

        manager.increment(&key, 5).await.unwrap();
        registry.open(&c).store_local(&key, 99);

        let report = manager.add_node(c.clone()).await.unwrap();

        assert_eq!(report.moved, 0, "Keys already on the new node are not migrated");
        assert_eq!(registry.open(&c).get_local(&key), Some(99));
        assert_eq!(registry.open(&NodeId::from("memory://a")).get_local(&key), Some(5));
        assert_eq!(manager.get(&key).await.unwrap(), Some(99));
    }

    #[tokio::test]
    async fn test_add_node_fails_cleanly_when_member_unreachable() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        registry.open(&NodeId::from("memory://b")).set_offline(true);

        let result = manager.add_node(NodeId::from("memory://c")).await;

        assert!(matches!(result, Err(ShardError::NodeUnreachable { .. })));
        assert_eq!(manager.node_ids(), ids(&["memory://a", "memory://b"]));
    }

    #[tokio::test]
    async fn test_remove_node_restores_ring_when_scan_fails() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        let before = manager.ring_snapshot();
        registry.open(&NodeId::from("memory://b")).set_offline(true);

        let result = manager.remove_node(&NodeId::from("memory://b")).await;

        assert!(matches!(result, Err(ShardError::NodeUnreachable { .. })));
        assert_eq!(manager.node_count(), 2);
        for key in sample_keys(200) {
            assert_eq!(manager.locate_node(&key).ok().as_ref(), before.locate(&key));
        }
    }

    // A node whose deletes always fail, to force half-finished moves.
    struct StickyNode {
        inner: MemoryNode,
    }

    #[async_trait]
    impl NodeClient for StickyNode {
        async fn get(&self, key: &str) -> crate::error::ShardResult<Option<i64>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: i64) -> crate::error::ShardResult<()> {
            self.inner.set(key, value).await
        }
        async fn delete(&self, _key: &str) -> crate::error::ShardResult<bool> {
            Err(ShardError::unreachable(self.inner.id(), "delete refused"))
        }
        async fn incr_by(&self, key: &str, amount: i64) -> crate::error::ShardResult<i64> {
            self.inner.incr_by(key, amount).await
        }
        async fn scan_keys(&self, pattern: &str) -> crate::error::ShardResult<Vec<String>> {
            self.inner.scan_keys(pattern).await
        }
    }

    struct StickyConnector {
        memory: SchemeConnector,
        sticky: Arc<StickyNode>,
    }

    #[async_trait]
    impl NodeConnector for StickyConnector {
        async fn connect(&self, node: &NodeId) -> crate::error::ShardResult<Arc<dyn NodeClient>> {
            if node == self.sticky.inner.id() {
                let sticky: Arc<dyn NodeClient> = self.sticky.clone();
                return Ok(sticky);
            }
            self.memory.connect(node).await
        }
    }

    #[tokio::test]
    async fn test_remove_node_reports_partial_failures() {
        let registry = MemoryRegistry::new();
        let sticky = Arc::new(StickyNode {
            inner: MemoryNode::new(NodeId::from("memory://sticky")),
        });
        let connector: Arc<dyn NodeConnector> = Arc::new(StickyConnector {
            memory: SchemeConnector::new(registry.clone()),
            sticky: sticky.clone(),
        });
        let manager = ShardManager::connect(ids(&["memory://a", "memory://sticky"]), 100, connector)
            .await
            .unwrap();

        let keys = sample_keys(200);
        let expected = seed(&manager, &keys).await;
        let on_sticky: Vec<&String> = keys
            .iter()
            .filter(|key| sticky.inner.get_local(key).is_some())
            .collect();
        assert!(!on_sticky.is_empty());

        let report = manager
            .remove_node(&NodeId::from("memory://sticky"))
            .await
            .unwrap();

        assert_eq!(report.moved, 0);
        assert_eq!(report.failures.len(), on_sticky.len());
        assert!(
            report
                .failures
                .iter()
                .all(|e| matches!(e, ShardError::MigrationPartialFailure { .. }))
        );
        // Copy happened before the failed delete: duplicated, never lost.
        for key in on_sticky {
            assert_eq!(manager.get(key).await.unwrap(), Some(expected[key]));
            assert_eq!(sticky.inner.get_local(key), Some(expected[key]));
        }
        assert_eq!(manager.node_ids(), ids(&["memory://a"]));
    }

    #[tokio::test]
    async fn test_duplicate_left_by_partial_move_is_not_added_twice() {
        // ARRANGE: a single node whose deletes always fail
        let registry = MemoryRegistry::new();
        let sticky = Arc::new(StickyNode {
            inner: MemoryNode::new(NodeId::from("memory://sticky")),
        });
        let connector: Arc<dyn NodeConnector> = Arc::new(StickyConnector {
            memory: SchemeConnector::new(registry.clone()),
            sticky: sticky.clone(),
        });
        let manager = ShardManager::connect(ids(&["memory://sticky"]), 100, connector)
            .await
            .unwrap();
        let keys = sample_keys(200);
        let expected = seed(&manager, &keys).await;

        // ACT: every move onto x leaves a copy behind on sticky
        let x = NodeId::from("memory://x");
        let added = manager.add_node(x.clone()).await.unwrap();
        assert!(!added.failures.is_empty());
        let duplicates = added.failures.len();

        // ACT: moving them back meets the leftover copies
        let removed = manager.remove_node(&x).await.unwrap();

        // ASSERT: no key is counted twice
        assert_eq!(removed.moved, 0);
        assert_eq!(removed.failures.len(), duplicates);
        assert!(removed.stranded.is_empty());
        assert_eq!(registry.open(&x).local_entry_count(), 0);
        for key in &keys {
            assert_eq!(manager.get(key).await.unwrap(), Some(expected[key]), "key {}", key);
        }
    }

    #[tokio::test]
    async fn test_duplicate_merge_keeps_larger_value() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        let a = NodeId::from("memory://a");
        let b = NodeId::from("memory://b");
        let keys = sample_keys(100);
        seed(&manager, &keys).await;

        // Stale smaller copies on b of every key a holds.
        let on_a: Vec<String> = keys
            .iter()
            .filter(|key| registry.open(&a).get_local(key).is_some())
            .cloned()
            .collect();
        assert!(!on_a.is_empty());
        for key in &on_a {
            registry.open(&b).store_local(key, -1);
        }

        let report = manager.remove_node(&a).await.unwrap();

        assert_eq!(report.failures.len(), on_a.len());
        for key in &on_a {
            let value = registry.open(&b).get_local(key).unwrap();
            assert!(value > 0, "Key {} kept the stale copy", key);
            assert_eq!(registry.open(&a).get_local(key), None);
        }
    }

    #[tokio::test]
    async fn test_remove_node_reports_stranded_keys() {
        let (registry, manager) = manager_with(&["memory://a", "memory://b"], 100).await;
        let a = NodeId::from("memory://a");
        let keys = sample_keys(100);
        let expected = seed(&manager, &keys).await;
        let mut on_a: Vec<String> = keys
            .iter()
            .filter(|key| registry.open(&a).get_local(key).is_some())
            .cloned()
            .collect();
        on_a.sort();
        registry.open(&NodeId::from("memory://b")).set_offline(true);

        let report = manager.remove_node(&a).await.unwrap();

        let mut stranded = report.stranded.clone();
        stranded.sort();
        assert_eq!(stranded, on_a);
        assert_eq!(report.moved, 0);
        assert_eq!(manager.node_ids(), ids(&["memory://b"]));
        // The values are still on the removed node, untouched.
        for key in &on_a {
            assert_eq!(registry.open(&a).get_local(key), Some(expected[key]));
        }
    }

    // ============================================================
    // STORAGE NODE HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_node_handlers_incr_then_get() {
        use crate::storage::handlers::{handle_get, handle_incr};
        use crate::storage::protocol::IncrRequest;
        use axum::Json;
        use axum::extract::{Extension, Path};
        use axum::http::StatusCode;

        let node = Arc::new(MemoryNode::new(NodeId::from("http://127.0.0.1:7001")));

        let (status, Json(missing)) =
            handle_get(Extension(node.clone()), Path("home".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing.value, None);

        let (status, Json(body)) = handle_incr(
            Extension(node.clone()),
            Json(IncrRequest {
                key: "home".to_string(),
                amount: 3,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.value, 3);

        let (status, Json(found)) = handle_get(Extension(node.clone()), Path("home".to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found.value, Some(3));

        node.set_offline(true);
        let (status, _) = handle_get(Extension(node), Path("home".to_string())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    // ============================================================
    // REMOTE NODE TESTS
    // ============================================================

    async fn serve_on_local_port(app: axum::Router) -> NodeId {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        NodeId::new(format!("http://{}", addr))
    }

    fn remote(id: NodeId) -> RemoteNode {
        RemoteNode::new(id, reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_remote_node_against_storage_node() {
        use crate::storage::handlers::node_router;

        let backing = Arc::new(MemoryNode::new(NodeId::from("memory://backing")));
        let id = serve_on_local_port(node_router(backing.clone())).await;
        let node = remote(id);

        node.ping().await.unwrap();
        assert_eq!(node.get("home").await.unwrap(), None);
        assert_eq!(node.incr_by("home", 3).await.unwrap(), 3);
        assert_eq!(node.incr_by("home", 2).await.unwrap(), 5);
        node.set("about us", 7).await.unwrap();
        assert_eq!(node.get("home").await.unwrap(), Some(5));
        assert_eq!(node.get("about us").await.unwrap(), Some(7));

        let mut keys = node.scan_keys("*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["about us", "home"]);
        assert_eq!(node.scan_keys("ho?e").await.unwrap(), vec!["home"]);

        assert!(node.delete("home").await.unwrap());
        assert_eq!(backing.get_local("home"), None);
    }

    #[tokio::test]
    async fn test_remote_incr_is_sent_once_when_reply_is_late() {
        use crate::storage::protocol::{ENDPOINT_INCR, IncrRequest, IncrResponse};
        use axum::{Extension, Json, routing::post};

        // Applies the increment, then answers after the client gave up.
        async fn slow_incr(
            Extension(calls): Extension<Arc<AtomicUsize>>,
            Json(req): Json<IncrRequest>,
        ) -> Json<IncrResponse> {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1500)).await;
            Json(IncrResponse { value: req.amount })
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let app = axum::Router::new()
            .route(ENDPOINT_INCR, post(slow_incr))
            .layer(Extension(calls.clone()));
        let node = remote(serve_on_local_port(app).await);

        let err = node.incr_by("home", 4).await.unwrap_err();

        assert!(matches!(err, ShardError::NodeUnreachable { .. }));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Increment must not be resent");
    }

    #[tokio::test]
    async fn test_remote_incr_retries_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let node = remote(NodeId::new(format!("http://{}", addr)));

        let err = node.incr_by("home", 1).await.unwrap_err();

        assert!(matches!(err, ShardError::NodeUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_remote_scan_retries_after_timeout() {
        use crate::storage::protocol::{ENDPOINT_SCAN, ScanResponse};
        use axum::{Extension, Json, routing::get};

        // The first request stalls past the client timeout.
        async fn flaky_scan(Extension(calls): Extension<Arc<AtomicUsize>>) -> Json<ScanResponse> {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Json(ScanResponse {
                keys: vec!["home".to_string()],
            })
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let app = axum::Router::new()
            .route(ENDPOINT_SCAN, get(flaky_scan))
            .layer(Extension(calls.clone()));
        let node = remote(serve_on_local_port(app).await);

        let keys = node.scan_keys("*").await.unwrap();

        assert_eq!(keys, vec!["home"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
