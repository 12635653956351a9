//! Property-based test generators using proptest.

use crate::entities::Tag;
use crate::fixtures::OWNER;
use proptest::prelude::*;

/// A local operation on a small pool of tags, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOp {
    /// Create the tag at this index.
    Create(usize),
    /// Rename the tag at this index.
    Rename(usize, String),
    /// Delete the tag at this index.
    Delete(usize),
    /// Run a sync pass.
    Sync,
}

/// Strategy for tag names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for unconfirmed tags of [`OWNER`].
pub fn tag_strategy() -> impl Strategy<Value = Tag> {
    ("[a-f0-9]{8}", name_strategy()).prop_map(|(uuid, name)| Tag::with_uuid(&uuid, OWNER, &name))
}

/// Strategy for operation sequences over a pool of `pool` tags.
pub fn local_ops_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<LocalOp>> {
    let op = prop_oneof![
        3 => (0..pool).prop_map(LocalOp::Create),
        3 => (0..pool, name_strategy()).prop_map(|(i, name)| LocalOp::Rename(i, name)),
        2 => (0..pool).prop_map(LocalOp::Delete),
        2 => Just(LocalOp::Sync),
    ];
    prop::collection::vec(op, 1..max_len)
}

/// Uuid of the tag at `index` in an operation pool.
pub fn pool_uuid(index: usize) -> String {
    format!("pool-{index}")
}
