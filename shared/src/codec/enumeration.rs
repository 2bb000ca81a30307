use super::{Codec, CodecFactory, CodecRegistry};
use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value, WireType};
use std::collections::HashMap;
use std::sync::Arc;

/// Closed variant set with a declared scalar representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSchema {
    pub name: &'static str,
    pub repr: TypeDescriptor,
    pub variants: Vec<(&'static str, i64)>,
}

/// Implemented by `wire_enum!` types
pub trait WireEnum: WireType {
    fn schema() -> EnumSchema;
}

#[derive(Debug, Clone, Copy)]
enum Repr {
    Byte,
    Short,
    Int,
    Long,
}

impl Repr {
    fn of(descriptor: &TypeDescriptor) -> Option<Self> {
        match descriptor {
            TypeDescriptor::Byte => Some(Repr::Byte),
            TypeDescriptor::Short => Some(Repr::Short),
            TypeDescriptor::Int => Some(Repr::Int),
            TypeDescriptor::Long => Some(Repr::Long),
            _ => None,
        }
    }
}

/// Writes only the representation; decode rejects values outside the table
#[derive(Debug)]
pub struct EnumCodec {
    name: &'static str,
    repr: Repr,
    variants: HashMap<i64, &'static str>,
}

impl EnumCodec {
    fn check(&self, repr: i64) -> Result<i64, CodecError> {
        if self.variants.contains_key(&repr) {
            Ok(repr)
        } else {
            Err(CodecError::UnknownVariant {
                name: self.name,
                repr,
            })
        }
    }
}

impl Codec for EnumCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::Enum(repr) = value else {
            return Err(value.mismatch("Enum"));
        };
        let repr = self.check(*repr)?;
        match self.repr {
            Repr::Byte => buffer.write_i8(repr as i8),
            Repr::Short => buffer.write_i16(repr as i16),
            Repr::Int => buffer.write_i32(repr as i32),
            Repr::Long => buffer.write_i64(repr),
        }
        Ok(())
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let repr = match self.repr {
            Repr::Byte => i64::from(buffer.read_i8()?),
            Repr::Short => i64::from(buffer.read_i16()?),
            Repr::Int => i64::from(buffer.read_i32()?),
            Repr::Long => buffer.read_i64()?,
        };
        Ok(Value::Enum(self.check(repr)?))
    }
}

pub struct EnumFactory;

impl CodecFactory for EnumFactory {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        let TypeDescriptor::Named(name) = descriptor else {
            return None;
        };
        let schema = registry.enum_schema(name)?;

        let Some(repr) = Repr::of(&schema.repr) else {
            return Some(Err(CodecError::NoCodec {
                descriptor: format!("{} (representation {})", schema.name, schema.repr),
            }));
        };

        let codec: Arc<dyn Codec> = Arc::new(EnumCodec {
            name: schema.name,
            repr,
            variants: schema
                .variants
                .iter()
                .map(|(variant, repr)| (*repr, *variant))
                .collect(),
        });
        Some(Ok(codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire_enum;

    wire_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Rank: i32 {
            Recruit = 1,
            Private = 2,
            General = 30,
        }
    }

    fn registry() -> CodecRegistry {
        let mut registry = CodecRegistry::new();
        registry.register_wire_enum::<Rank>().unwrap();
        registry
    }

    #[test]
    fn test_only_representation_is_written() {
        let registry = registry();
        let mut buffer = ProtocolBuffer::new();
        registry.encode(&mut buffer, &Rank::General).unwrap();
        assert_eq!(buffer.as_bytes(), &[0, 0, 0, 30]);
    }

    #[test]
    fn test_unknown_representation_is_fatal() {
        let registry = registry();
        let mut buffer = ProtocolBuffer::from_bytes(vec![0, 0, 0, 3]);
        assert_eq!(
            registry.decode::<Rank>(&mut buffer),
            Err(CodecError::UnknownVariant {
                name: "Rank",
                repr: 3
            })
        );
    }

    #[test]
    fn test_non_integer_representation_is_rejected() {
        let mut registry = CodecRegistry::new();
        registry
            .register_enum(EnumSchema {
                name: "Broken",
                repr: TypeDescriptor::String,
                variants: vec![("A", 0)],
            })
            .unwrap();
        assert!(matches!(
            registry.resolve(&TypeDescriptor::Named("Broken")),
            Err(CodecError::NoCodec { .. })
        ));
    }
}
