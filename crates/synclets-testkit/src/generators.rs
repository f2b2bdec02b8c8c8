//! Proptest generators for property-based testing.

use proptest::prelude::*;

use synclets_core::{Address, Value, UNDEFINED_SENTINEL};

/// Generate an id from a small alphabet so writes collide often.
pub fn id() -> impl Strategy<Value = String> {
    "[a-d]{1,2}".prop_map(String::from)
}

/// Generate a leaf address of exactly `depth` ids.
pub fn leaf_address(depth: usize) -> impl Strategy<Value = Address> {
    prop::collection::vec(id(), depth).prop_map(Address::new)
}

/// Generate a value that passes validation. Never the tombstone.
pub fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<String>()
            .prop_filter("reserved sentinel", |s| s != UNDEFINED_SENTINEL)
            .prop_map(Value::String),
        (-1.0e12f64..1.0e12).prop_map(Value::Number),
        any::<bool>().prop_map(Value::Boolean),
        Just(Value::Null),
    ]
}

/// A local operation on one replica.
#[derive(Debug, Clone)]
pub struct Write {
    pub replica: usize,
    pub address: Address,
    /// `None` deletes.
    pub value: Option<Value>,
}

/// Generate a write against one of `replicas` replicas.
pub fn write(replicas: usize, depth: usize) -> impl Strategy<Value = Write> {
    (
        0..replicas,
        leaf_address(depth),
        prop_oneof![4 => value().prop_map(Some), 1 => Just(None)],
    )
        .prop_map(|(replica, address, value)| Write {
            replica,
            address,
            value,
        })
}

/// Generate up to `max` writes.
pub fn writes(replicas: usize, depth: usize, max: usize) -> impl Strategy<Value = Vec<Write>> {
    prop::collection::vec(write(replicas, depth), 0..=max)
}
