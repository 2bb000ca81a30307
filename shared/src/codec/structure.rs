//! Struct encoding
//!
//! A struct is its fields, concatenated without tags or lengths. The order in
//! which fields hit the wire is a property of the type: by default fields are
//! sorted by name so the layout does not depend on how the declaration
//! happens to be written; types declared with `declared` order keep source
//! order. Either way the order is part of the wire contract.

use super::{Codec, CodecFactory, CodecRegistry};
use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value, WireType};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    Sorted,
    Declared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub descriptor: TypeDescriptor,
}

impl FieldSchema {
    pub fn new(name: &'static str, descriptor: TypeDescriptor) -> Self {
        Self { name, descriptor }
    }
}

/// Field list of a declared struct; fields are kept in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructSchema {
    pub name: &'static str,
    pub order: FieldOrder,
    pub fields: Vec<FieldSchema>,
}

impl StructSchema {
    pub fn new(name: &'static str, order: FieldOrder, fields: Vec<FieldSchema>) -> Self {
        Self {
            name,
            order,
            fields,
        }
    }

    /// Declaration indices in the order fields are written
    pub fn wire_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.fields.len()).collect();
        if self.order == FieldOrder::Sorted {
            order.sort_by_key(|&index| self.fields[index].name);
        }
        order
    }
}

/// Implemented by `wire_struct!` types
pub trait WireStruct: WireType {
    fn schema() -> StructSchema;
}

#[derive(Debug)]
pub struct StructCodec {
    name: &'static str,
    field_count: usize,
    /// (declaration index, codec) in wire order
    fields: Vec<(usize, Arc<dyn Codec>)>,
}

impl Codec for StructCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::Struct(values) = value else {
            return Err(value.mismatch("Struct"));
        };
        if values.len() != self.field_count {
            return Err(CodecError::LengthMismatch {
                what: self.name,
                left: values.len(),
                right: self.field_count,
            });
        }
        for (index, codec) in &self.fields {
            codec.encode(buffer, &values[*index])?;
        }
        Ok(())
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let mut slots: Vec<Option<Value>> = vec![None; self.field_count];
        for (index, codec) in &self.fields {
            slots[*index] = Some(codec.decode(buffer)?);
        }
        let values: Option<Vec<Value>> = slots.into_iter().collect();
        values.map(Value::Struct).ok_or(CodecError::LengthMismatch {
            what: self.name,
            left: self.fields.len(),
            right: self.field_count,
        })
    }
}

pub struct StructFactory;

impl CodecFactory for StructFactory {
    fn name(&self) -> &'static str {
        "struct"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        let TypeDescriptor::Named(name) = descriptor else {
            return None;
        };
        let schema = registry.struct_schema(name)?;

        let fields = schema
            .wire_order()
            .into_iter()
            .map(|index| {
                registry
                    .resolve(&schema.fields[index].descriptor)
                    .map(|codec| (index, codec))
            })
            .collect::<Result<Vec<_>, _>>();

        Some(fields.map(|fields| {
            let codec: Arc<dyn Codec> = Arc::new(StructCodec {
                name: schema.name,
                field_count: schema.fields.len(),
                fields,
            });
            codec
        }))
    }
}
