//! Declaration macros for wire-visible types
//!
//! `wire_struct!` and `wire_enum!` declare the Rust type together with its
//! schema and its [`WireType`](crate::value::WireType) bridge, so a type's
//! wire shape is written exactly once.
//!
//! ```
//! use shared::{wire_enum, wire_struct};
//!
//! wire_enum! {
//!     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//!     pub enum Team: i8 {
//!         Red = 0,
//!         Blue = 1,
//!     }
//! }
//!
//! wire_struct! {
//!     #[derive(Debug, Clone, PartialEq)]
//!     pub struct Spawn: declared {
//!         pub team: Team,
//!         pub slot: i32,
//!     }
//! }
//! ```

use crate::error::CodecError;
use crate::value::{Value, WireType};

#[doc(hidden)]
pub fn next_field<T: WireType>(
    fields: &mut impl Iterator<Item = Value>,
) -> Result<T, CodecError> {
    let value = fields.next().ok_or(CodecError::UnexpectedEof {
        needed: 1,
        remaining: 0,
    })?;
    T::from_value(value)
}

/// Declares a struct whose fields are written in name order, or in source
/// order when the name is followed by `: declared`
#[macro_export]
macro_rules! wire_struct {
    (@order) => {
        $crate::codec::FieldOrder::Sorted
    };
    (@order declared) => {
        $crate::codec::FieldOrder::Declared
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident $(: $order:ident)? {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::codec::WireStruct for $name {
            fn schema() -> $crate::codec::StructSchema {
                $crate::codec::StructSchema::new(
                    stringify!($name),
                    $crate::wire_struct!(@order $($order)?),
                    vec![
                        $(
                            $crate::codec::FieldSchema::new(
                                stringify!($field),
                                <$ty as $crate::value::WireType>::descriptor(),
                            ),
                        )*
                    ],
                )
            }
        }

        impl $crate::value::WireType for $name {
            fn descriptor() -> $crate::value::TypeDescriptor {
                $crate::value::TypeDescriptor::Named(stringify!($name))
            }

            fn to_value(&self) -> $crate::value::Value {
                $crate::value::Value::Struct(vec![
                    $( $crate::value::WireType::to_value(&self.$field), )*
                ])
            }

            #[allow(unused_mut, unused_variables)]
            fn from_value(
                value: $crate::value::Value,
            ) -> ::std::result::Result<Self, $crate::error::CodecError> {
                let names: &[&str] = &[$(stringify!($field)),*];
                let mut fields = value.into_fields(names.len())?.into_iter();
                Ok(Self {
                    $( $field: $crate::macros::next_field::<$ty>(&mut fields)?, )*
                })
            }
        }
    };
}

/// Declares a fieldless enum carried on the wire as its integer
/// representation
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant = $value,
            )*
        }

        impl $crate::codec::WireEnum for $name {
            fn schema() -> $crate::codec::EnumSchema {
                $crate::codec::EnumSchema {
                    name: stringify!($name),
                    repr: <$repr as $crate::value::WireType>::descriptor(),
                    variants: vec![
                        $( (stringify!($variant), $name::$variant as i64), )*
                    ],
                }
            }
        }

        impl $crate::value::WireType for $name {
            fn descriptor() -> $crate::value::TypeDescriptor {
                $crate::value::TypeDescriptor::Named(stringify!($name))
            }

            fn to_value(&self) -> $crate::value::Value {
                let repr = match self {
                    $( $name::$variant => $name::$variant as i64, )*
                };
                $crate::value::Value::Enum(repr)
            }

            fn from_value(
                value: $crate::value::Value,
            ) -> ::std::result::Result<Self, $crate::error::CodecError> {
                let repr = match value {
                    $crate::value::Value::Enum(repr) => repr,
                    other => return Err(other.mismatch("Enum")),
                };
                $(
                    if repr == $name::$variant as i64 {
                        return Ok($name::$variant);
                    }
                )*
                Err($crate::error::CodecError::UnknownVariant {
                    name: stringify!($name),
                    repr,
                })
            }
        }
    };
}
