//! Dynamic values and the semantic types that describe them
//!
//! Codecs work on [`Value`] trees so that one codec implementation can serve
//! every concrete Rust type of the same shape. Concrete types bridge into this
//! model through [`WireType`], which the declaration macros implement for
//! structs and enums and which is implemented here for primitives and the
//! standard containers.

use crate::error::CodecError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

/// Protocol identifier of wire-visible models, templates and events
pub type ProtocolId = i64;

/// Semantic type used as the codec cache key
///
/// Generic arguments are part of the descriptor, so `List(Int)` and
/// `List(Long)` resolve to different codecs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    List(Box<TypeDescriptor>),
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Pair(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Optional(Box<TypeDescriptor>),
    /// A declared struct, enum or custom-coded type, looked up by name
    Named(&'static str),
    Resource,
    Command,
}

impl TypeDescriptor {
    pub fn list(element: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(element))
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Map(Box::new(key), Box::new(value))
    }

    pub fn pair(first: TypeDescriptor, second: TypeDescriptor) -> Self {
        TypeDescriptor::Pair(Box::new(first), Box::new(second))
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Optional(Box::new(inner))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::List(element) => write!(f, "List<{}>", element),
            TypeDescriptor::Map(key, value) => write!(f, "Map<{}, {}>", key, value),
            TypeDescriptor::Pair(first, second) => write!(f, "Pair<{}, {}>", first, second),
            TypeDescriptor::Optional(inner) => write!(f, "Optional<{}>", inner),
            TypeDescriptor::Named(name) => f.write_str(name),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Pair(Box<Value>, Box<Value>),
    Optional(Option<Box<Value>>),
    /// Field values in declaration order
    Struct(Vec<Value>),
    /// Representation of an enum variant
    Enum(i64),
    /// Identifier of a resource reference
    Resource(i64),
    /// Tagged body of a polymorphic command
    Command(u8, Box<Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "Bool",
            Value::Byte(_) => "Byte",
            Value::Short(_) => "Short",
            Value::Int(_) => "Int",
            Value::Long(_) => "Long",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Pair(_, _) => "Pair",
            Value::Optional(_) => "Optional",
            Value::Struct(_) => "Struct",
            Value::Enum(_) => "Enum",
            Value::Resource(_) => "Resource",
            Value::Command(_, _) => "Command",
        }
    }

    pub fn mismatch(&self, expected: &'static str) -> CodecError {
        CodecError::ValueMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Unpacks a struct value, checking the field count
    pub fn into_fields(self, expected: usize) -> Result<Vec<Value>, CodecError> {
        match self {
            Value::Struct(fields) if fields.len() == expected => Ok(fields),
            Value::Struct(fields) => Err(CodecError::LengthMismatch {
                what: "struct fields",
                left: fields.len(),
                right: expected,
            }),
            other => Err(other.mismatch("Struct")),
        }
    }

    /// Collects every resource identifier reachable from this value
    pub fn collect_resources(&self, out: &mut Vec<i64>) {
        match self {
            Value::Resource(id) => out.push(*id),
            Value::List(items) | Value::Struct(items) => {
                items.iter().for_each(|item| item.collect_resources(out))
            }
            Value::Map(entries) => entries.iter().for_each(|(key, value)| {
                key.collect_resources(out);
                value.collect_resources(out);
            }),
            Value::Pair(first, second) => {
                first.collect_resources(out);
                second.collect_resources(out);
            }
            Value::Optional(Some(inner)) | Value::Command(_, inner) => {
                inner.collect_resources(out)
            }
            _ => {}
        }
    }
}

/// Bridge between a concrete Rust type and the dynamic codec model
pub trait WireType: Sized {
    fn descriptor() -> TypeDescriptor;
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, CodecError>;
}

macro_rules! primitive_wire_type {
    ($ty:ty, $variant:ident) => {
        impl WireType for $ty {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::$variant
            }

            fn to_value(&self) -> Value {
                Value::$variant(self.clone())
            }

            fn from_value(value: Value) -> Result<Self, CodecError> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(other.mismatch(stringify!($variant))),
                }
            }
        }
    };
}

primitive_wire_type!(bool, Bool);
primitive_wire_type!(i8, Byte);
primitive_wire_type!(i16, Short);
primitive_wire_type!(i32, Int);
primitive_wire_type!(i64, Long);
primitive_wire_type!(f32, Float);
primitive_wire_type!(f64, Double);
primitive_wire_type!(String, String);

impl<T: WireType> WireType for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::list(T::descriptor())
    }

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(WireType::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(other.mismatch("List")),
        }
    }
}

impl<T: WireType> WireType for Option<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::optional(T::descriptor())
    }

    fn to_value(&self) -> Value {
        Value::Optional(self.as_ref().map(|inner| Box::new(inner.to_value())))
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Optional(inner) => inner.map(|inner| T::from_value(*inner)).transpose(),
            other => Err(other.mismatch("Optional")),
        }
    }
}

impl<A: WireType, B: WireType> WireType for (A, B) {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::pair(A::descriptor(), B::descriptor())
    }

    fn to_value(&self) -> Value {
        Value::Pair(Box::new(self.0.to_value()), Box::new(self.1.to_value()))
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Pair(first, second) => Ok((A::from_value(*first)?, B::from_value(*second)?)),
            other => Err(other.mismatch("Pair")),
        }
    }
}

fn map_entries<K: WireType, V: WireType>(value: Value) -> Result<Vec<(K, V)>, CodecError> {
    match value {
        Value::Map(entries) => entries
            .into_iter()
            .map(|(key, value)| Ok((K::from_value(key)?, V::from_value(value)?)))
            .collect(),
        other => Err(other.mismatch("Map")),
    }
}

impl<K: WireType + Ord, V: WireType> WireType for BTreeMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(K::descriptor(), V::descriptor())
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(key, value)| (key.to_value(), value.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(map_entries(value)?.into_iter().collect())
    }
}

// Iteration order of a HashMap is unspecified, so its encoding is not
// byte-stable; use BTreeMap where bytes are compared.
impl<K: WireType + Eq + Hash, V: WireType> WireType for HashMap<K, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::map(K::descriptor(), V::descriptor())
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(key, value)| (key.to_value(), value.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        Ok(map_entries(value)?.into_iter().collect())
    }
}
