//! Strong type definitions for Synclets.
//!
//! Addresses, timestamps and values are newtypes or closed enums so that a
//! timestamp can never be passed where a value id is expected.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::content_hash;
use crate::error::{CoreError, Result};

/// A 32-bit summary of all descendant leaf timestamps of an ancestor node.
pub type Hash = u32;

/// Reserved string standing for "no value" on the wire.
///
/// A tombstoned leaf is serialized as this string so that `null` stays a
/// regular, distinguishable value.
pub const UNDEFINED_SENTINEL: &str = "\u{FFFC}";

/// Path of string ids locating a node in the tree. The empty address is the root.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(Vec<String>);

impl Address {
    /// The root address.
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build an address from a sequence of ids.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ids.into_iter().map(Into::into).collect())
    }

    /// The ids making up this address.
    pub fn ids(&self) -> &[String] {
        &self.0
    }

    /// Number of ids (the depth of the addressed node).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root address.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Address of the child `id` of this node.
    pub fn child(&self, id: impl Into<String>) -> Self {
        let mut ids = self.0.clone();
        ids.push(id.into());
        Self(ids)
    }

    /// Address of the parent node, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Every strict ancestor, from the root down to the parent.
    pub fn ancestors(&self) -> impl Iterator<Item = Address> + '_ {
        (0..self.0.len()).map(move |len| Self(self.0[..len].to_vec()))
    }

    /// Whether `other` is an immediate child of this address.
    pub fn is_parent_of(&self, other: &Address) -> bool {
        other.0.len() == self.0.len() + 1 && other.0.starts_with(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl From<Vec<String>> for Address {
    fn from(ids: Vec<String>) -> Self {
        Self(ids)
    }
}

impl From<&[&str]> for Address {
    fn from(ids: &[&str]) -> Self {
        Self::new(ids.iter().copied())
    }
}

/// An HLC-encoded timestamp.
///
/// Ordering is plain string ordering, which for well-formed timestamps equals
/// chronological ordering. The empty timestamp sorts below every real one and
/// stands for "never written".
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// The empty timestamp.
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// Wrap an already-encoded timestamp string.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Whether this is the empty timestamp.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Contribution of this timestamp to every ancestor hash.
    pub fn content_hash(&self) -> Hash {
        content_hash(&self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The payload held by a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
    /// Logical deletion. The leaf keeps its timestamp.
    Tombstone,
}

impl Value {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    /// Reject values that cannot survive a round trip over the wire.
    pub fn validate(&self) -> Result<()> {
        match self {
            Value::String(s) if s == UNDEFINED_SENTINEL => Err(CoreError::InvalidValue(
                "string collides with the reserved undefined sentinel".into(),
            )),
            Value::Number(n) if !n.is_finite() => {
                Err(CoreError::InvalidValue(format!("non-finite number {n}")))
            }
            _ => Ok(()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Null => serializer.serialize_unit(),
            Value::Tombstone => serializer.serialize_str(UNDEFINED_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number, boolean or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        if v == UNDEFINED_SENTINEL {
            Ok(Value::Tombstone)
        } else {
            Ok(Value::String(v.to_owned()))
        }
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        if v == UNDEFINED_SENTINEL {
            Ok(Value::Tombstone)
        } else {
            Ok(Value::String(v))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Boolean(v))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_ancestors() {
        let address = Address::new(["t", "r", "c"]);
        let ancestors: Vec<Address> = address.ancestors().collect();
        assert_eq!(
            ancestors,
            vec![Address::root(), Address::new(["t"]), Address::new(["t", "r"])]
        );
        assert!(Address::root().ancestors().next().is_none());
    }

    #[test]
    fn test_address_parent_child() {
        let parent = Address::new(["a"]);
        let child = parent.child("b");
        assert!(parent.is_parent_of(&child));
        assert!(!child.is_parent_of(&parent));
        assert!(!Address::root().is_parent_of(&child));
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(Address::root().parent(), None);
        assert_eq!(child.to_string(), "/a/b");
    }

    #[test]
    fn test_value_json_distinguishes_null_and_tombstone() {
        let values = vec![
            Value::Null,
            Value::Tombstone,
            Value::from("x"),
            Value::from(1.5),
            Value::from(true),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, "[null,\"\u{FFFC}\",\"x\",1.5,true]");
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_integer_json_reads_as_number() {
        let value: Value = serde_json::from_str("42").unwrap();
        assert_eq!(value, Value::Number(42.0));
    }

    #[test]
    fn test_value_validation() {
        assert!(Value::from("ok").validate().is_ok());
        assert!(Value::from(UNDEFINED_SENTINEL).validate().is_err());
        assert!(Value::Number(f64::NAN).validate().is_err());
        assert!(Value::Number(f64::INFINITY).validate().is_err());
        assert!(Value::Tombstone.validate().is_ok());
    }

    #[test]
    fn test_empty_timestamp_sorts_first() {
        let real = Timestamp::from_encoded("-----------0----");
        assert!(Timestamp::empty() < real);
        assert!(Timestamp::empty().is_empty());
    }
}
