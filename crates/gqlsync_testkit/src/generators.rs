//! Property-based test generators using proptest.

use crate::fixtures::Post;
use gqlsync_cache::{CacheKey, FieldValue, Record};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for post IDs.
pub fn post_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,8}").expect("Invalid regex")
}

/// Strategy for post titles, including non-ASCII text.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 äöü漢]{0,24}").expect("Invalid regex")
}

/// Strategy for posts.
pub fn post_strategy() -> impl Strategy<Value = Post> {
    (post_id_strategy(), title_strategy()).prop_map(|(id, title)| Post::new(id, title))
}

/// Strategy for lists of posts with distinct IDs.
pub fn posts_strategy(max: usize) -> impl Strategy<Value = Vec<Post>> {
    prop::collection::btree_map(post_id_strategy(), title_strategy(), 0..=max)
        .prop_map(|posts| posts.into_iter().map(|(id, title)| Post::new(id, title)).collect())
}

/// Strategy for JSON leaf values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,12}".prop_map(Value::from),
    ]
}

/// Strategy for record field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for field values, nesting lists and references.
pub fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    let leaf = prop_oneof![
        scalar_strategy().prop_map(FieldValue::Scalar),
        post_id_strategy().prop_map(|id| FieldValue::Reference(CacheKey::entity("Post", &id))),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(FieldValue::List)
    })
}

/// Strategy for records under entity keys.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        post_id_strategy(),
        prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 0..6),
    )
        .prop_map(|(id, fields)| Record::with_fields(CacheKey::entity("Post", &id), fields))
}
