use proptest::prelude::*;

/// Cache keys shaped like the ones callers use (`user:42`, `order:abc`)
pub fn cache_key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}:[a-z0-9]{1,12}"
}

/// Distinct sets of cache keys
pub fn cache_keys_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(cache_key_strategy(), 1..max)
        .prop_map(|keys| keys.into_iter().collect())
}

/// Distinct node names for a ring of 1..=max members
pub fn node_names_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("node-[a-z0-9]{1,6}", 1..=max)
        .prop_map(|nodes| nodes.into_iter().collect())
}

/// Small tag sets drawn from a fixed vocabulary so intersections are common
pub fn tag_set_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(
        prop_oneof![
            Just("user:42".to_string()),
            Just("order".to_string()),
            Just("invoice".to_string()),
            Just("kind:summary".to_string()),
        ],
        0..3,
    )
    .prop_map(|tags| tags.into_iter().collect())
}

/// JSON values usable as cached payloads
pub fn json_value_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        Just(serde_json::json!({"key": "value"})),
        any::<i64>().prop_map(|n| serde_json::json!({ "number": n })),
        "[a-zA-Z0-9 ]{0,32}".prop_map(|s| serde_json::json!({ "text": s })),
        Just(serde_json::json!({"nested": {"data": [1, 2, 3]}})),
    ]
}
