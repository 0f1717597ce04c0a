mod common;

use common::strategies::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;
use tasklane::cache::{CacheEntry, ConsistentHashRing, ExpiringMap};

const VIRTUAL_NODES: usize = 100;

proptest! {
    /// Property: a fixed ring always routes a key to the same node
    #[test]
    fn ring_routing_is_deterministic(
        nodes in node_names_strategy(6),
        key in cache_key_strategy(),
    ) {
        let ring = ConsistentHashRing::with_nodes(VIRTUAL_NODES, nodes.clone());
        let first = ring.get_node(&key).unwrap();
        prop_assert!(nodes.contains(&first));
        for _ in 0..50 {
            prop_assert_eq!(ring.get_node(&key).unwrap(), first.clone());
        }

        // Insertion order does not matter
        let reversed = ConsistentHashRing::with_nodes(VIRTUAL_NODES, nodes.iter().rev().cloned());
        prop_assert_eq!(reversed.get_node(&key).unwrap(), first);
    }

    /// Property: adding a node only moves keys onto that node, and about its fair share of them
    #[test]
    fn adding_a_node_disrupts_minimally(nodes in node_names_strategy(8)) {
        let total_keys: usize = 1_000;
        let keys: Vec<String> = (0..total_keys).map(|i| format!("key:{i}")).collect();

        let mut ring = ConsistentHashRing::with_nodes(VIRTUAL_NODES, nodes.clone());
        let before: HashMap<&String, String> = keys
            .iter()
            .map(|key| (key, ring.get_node(key).unwrap()))
            .collect();

        prop_assert!(ring.add_node("node-added"));
        let moved: Vec<&String> = keys
            .iter()
            .filter(|key| ring.get_node(key).unwrap() != before[key])
            .collect();

        for key in &moved {
            prop_assert_eq!(ring.get_node(key).unwrap(), "node-added".to_string());
        }
        let fair_share = total_keys.div_ceil(nodes.len() + 1);
        prop_assert!(
            moved.len() <= fair_share + fair_share / 2 + 20,
            "moved {} keys, fair share {}",
            moved.len(),
            fair_share
        );
    }

    /// Property: values read back before their TTL are unchanged
    #[test]
    fn expiring_map_round_trips_live_values(
        keys in cache_keys_strategy(32),
        value in json_value_strategy(),
    ) {
        let map: ExpiringMap<serde_json::Value> = ExpiringMap::new(64, Duration::from_secs(60));
        for key in &keys {
            map.set(key.clone(), value.clone(), Duration::from_secs(60));
        }
        for key in &keys {
            prop_assert_eq!(map.get(key), Some(value.clone()));
        }
        prop_assert_eq!(map.len(), keys.len());
    }

    /// Property: tag invalidation removes exactly the entries sharing a tag
    #[test]
    fn tag_invalidation_removes_exactly_intersecting_entries(
        tagged in prop::collection::vec(tag_set_strategy(), 1..20),
        target in tag_set_strategy(),
    ) {
        let map: ExpiringMap<usize> = ExpiringMap::new(64, Duration::from_secs(60));
        for (i, tags) in tagged.iter().enumerate() {
            map.set_entry(
                CacheEntry::new(format!("entry:{i}"), i, Duration::from_secs(60))
                    .with_tags(tags.clone()),
            );
        }

        let mut removed = map.remove_where(|entry| entry.has_any_tag(&target));
        removed.sort();
        let mut expected: Vec<String> = tagged
            .iter()
            .enumerate()
            .filter(|(_, tags)| tags.iter().any(|tag| target.contains(tag)))
            .map(|(i, _)| format!("entry:{i}"))
            .collect();
        expected.sort();
        prop_assert_eq!(removed, expected);

        for (i, tags) in tagged.iter().enumerate() {
            let survives = !tags.iter().any(|tag| target.contains(tag));
            prop_assert_eq!(map.get(&format!("entry:{i}")).is_some(), survives);
        }
    }
}

#[test]
fn test_named_ring_scenario_is_stable() {
    let ring = ConsistentHashRing::with_nodes(VIRTUAL_NODES, ["cache-a", "cache-b", "cache-c"]);
    let node = ring.get_node("user:42").unwrap();
    assert!((0..1_000).all(|_| ring.get_node("user:42").unwrap() == node));
    assert_eq!(ring.position_count(), 300);
}
