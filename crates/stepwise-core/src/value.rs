//! Typed property values and detached property snapshots.

use crate::error::CoreError;
use std::fmt;

/// Element type of a property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `bool`.
    Bool,
    /// `i32`.
    Int,
    /// `f64`.
    Float,
    /// UTF-8 string.
    Str,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int32"),
            Self::Float => write!(f, "double"),
            Self::Str => write!(f, "string"),
        }
    }
}

/// A single property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// Double precision float.
    Float(f64),
    /// String value.
    Str(String),
}

impl Value {
    /// The element type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Str(_) => ValueType::Str,
        }
    }

    /// The zero value of `ty`.
    pub fn zero(ty: ValueType) -> Self {
        match ty {
            ValueType::Bool => Self::Bool(false),
            ValueType::Int => Self::Int(0),
            ValueType::Float => Self::Float(0.0),
            ValueType::Str => Self::Str(String::new()),
        }
    }

    /// Convert to `ty`.
    ///
    /// Int and float convert into each other (float to int truncates);
    /// every other mismatch is [`CoreError::InvalidType`].
    pub fn convert_to(&self, ty: ValueType) -> Result<Value, CoreError> {
        match (self, ty) {
            (v, t) if v.value_type() == t => Ok(v.clone()),
            (Self::Int(i), ValueType::Float) => Ok(Self::Float(f64::from(*i))),
            (Self::Float(x), ValueType::Int) => Ok(Self::Int(*x as i32)),
            _ => Err(CoreError::InvalidType),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Extraction of a Rust value from a [`Value`], with int/float conversion.
pub trait FromValue: Sized {
    /// Extract, or fail with [`CoreError::InvalidType`].
    fn from_value(v: &Value) -> Result<Self, CoreError>;
}

impl FromValue for bool {
    fn from_value(v: &Value) -> Result<Self, CoreError> {
        match v {
            Value::Bool(b) => Ok(*b),
            _ => Err(CoreError::InvalidType),
        }
    }
}

impl FromValue for i32 {
    fn from_value(v: &Value) -> Result<Self, CoreError> {
        match v.convert_to(ValueType::Int)? {
            Value::Int(i) => Ok(i),
            _ => Err(CoreError::InvalidType),
        }
    }
}

impl FromValue for f64 {
    fn from_value(v: &Value) -> Result<Self, CoreError> {
        match v.convert_to(ValueType::Float)? {
            Value::Float(x) => Ok(x),
            _ => Err(CoreError::InvalidType),
        }
    }
}

impl FromValue for String {
    fn from_value(v: &Value) -> Result<Self, CoreError> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(CoreError::InvalidType),
        }
    }
}

/// A detached copy of a property node and its subtree.
///
/// Used for remote transfer, mirroring and listener callbacks. A node
/// with more than one value is an array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyData {
    /// Node name (last path segment).
    pub name: String,
    /// Values; empty for a node that was never assigned.
    pub values: Vec<Value>,
    /// Child nodes in insertion order.
    pub children: Vec<PropertyData>,
}

impl PropertyData {
    /// A node with no value and no children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: set a scalar value.
    pub fn with_value(mut self, v: impl Into<Value>) -> Self {
        self.values = vec![v.into()];
        self
    }

    /// Builder: append a child.
    pub fn with_child(mut self, child: PropertyData) -> Self {
        self.children.push(child);
        self
    }

    /// Element type, derived from the first value.
    pub fn value_type(&self) -> Option<ValueType> {
        self.values.first().map(Value::value_type)
    }

    /// Whether the node holds more than one value.
    pub fn is_array(&self) -> bool {
        self.values.len() > 1
    }

    /// Typed value at `index`.
    ///
    /// `InvalidArgument` past the end, `InvalidType` on mismatch.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, CoreError> {
        let v = self.values.get(index).ok_or(CoreError::InvalidArgument)?;
        T::from_value(v)
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<&PropertyData> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Descendant by dot-separated path relative to this node. The empty
    /// path is the node itself.
    pub fn find(&self, relative_path: &str) -> Option<&PropertyData> {
        if relative_path.is_empty() {
            return Some(self);
        }
        relative_path
            .split('.')
            .try_fold(self, |node, seg| node.child(seg))
    }
}

/// Payload passed to property listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChange {
    /// Absolute path of the node that changed.
    pub path: String,
    /// Path of the changed node relative to the listener's node; empty
    /// when they are the same node.
    pub relative_path: String,
    /// Snapshot of the changed node after the change (before, for deletes).
    pub property: PropertyData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn int_and_float_convert() {
        let d = PropertyData::new("x").with_value(3);
        assert_eq!(d.get::<f64>(0), Ok(3.0));
        let d = PropertyData::new("x").with_value(2.9);
        assert_eq!(d.get::<i32>(0), Ok(2));
    }

    #[test]
    fn mismatches_are_invalid_type() {
        let d = PropertyData::new("x").with_value("text");
        assert_eq!(d.get::<bool>(0), Err(CoreError::InvalidType));
        assert_eq!(d.get::<i32>(0), Err(CoreError::InvalidType));
        assert_eq!(d.get::<String>(1), Err(CoreError::InvalidArgument));
    }

    #[test]
    fn find_walks_children() {
        let tree = PropertyData::new("Root").with_child(
            PropertyData::new("A").with_child(PropertyData::new("B").with_value(true)),
        );
        assert_eq!(tree.find("A.B").and_then(|n| n.get::<bool>(0).ok()), Some(true));
        assert_eq!(tree.find("").map(|n| n.name.as_str()), Some("Root"));
        assert!(tree.find("A.C").is_none());
    }

    proptest! {
        #[test]
        fn int_survives_float_round_trip(i in any::<i32>()) {
            let f = Value::Int(i).convert_to(ValueType::Float).unwrap();
            prop_assert_eq!(f.convert_to(ValueType::Int).unwrap(), Value::Int(i));
        }
    }
}
