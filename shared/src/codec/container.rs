//! List, map, pair and optional encodings
//!
//! Lists and maps carry a varint element count; decode loops exactly that
//! many times. Pairs have no prefix. Optionals carry one presence byte where
//! zero means absent and any other value means present.

use super::{Codec, CodecFactory, CodecRegistry};
use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value};
use std::sync::Arc;

#[derive(Debug)]
pub struct ListCodec {
    element: Arc<dyn Codec>,
}

impl Codec for ListCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::List(items) = value else {
            return Err(value.mismatch("List"));
        };
        buffer.write_length(items.len())?;
        items
            .iter()
            .try_for_each(|item| self.element.encode(buffer, item))
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let count = buffer.read_length()?;
        // the count comes from the peer, so cap the preallocation
        let mut items = Vec::with_capacity(count.min(buffer.remaining()));
        for _ in 0..count {
            items.push(self.element.decode(buffer)?);
        }
        Ok(Value::List(items))
    }
}

pub struct ListFactory;

impl CodecFactory for ListFactory {
    fn name(&self) -> &'static str {
        "list"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        let TypeDescriptor::List(element) = descriptor else {
            return None;
        };
        Some(registry.resolve(element).map(|element| {
            let codec: Arc<dyn Codec> = Arc::new(ListCodec { element });
            codec
        }))
    }
}

#[derive(Debug)]
pub struct MapCodec {
    key: Arc<dyn Codec>,
    value: Arc<dyn Codec>,
}

impl Codec for MapCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::Map(entries) = value else {
            return Err(value.mismatch("Map"));
        };
        buffer.write_length(entries.len())?;
        for (key, value) in entries {
            self.key.encode(buffer, key)?;
            self.value.encode(buffer, value)?;
        }
        Ok(())
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let count = buffer.read_length()?;
        let mut entries = Vec::with_capacity(count.min(buffer.remaining()));
        for _ in 0..count {
            let key = self.key.decode(buffer)?;
            let value = self.value.decode(buffer)?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

pub struct MapFactory;

impl CodecFactory for MapFactory {
    fn name(&self) -> &'static str {
        "map"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        let TypeDescriptor::Map(key, value) = descriptor else {
            return None;
        };
        Some(registry.resolve(key).and_then(|key| {
            let codec: Arc<dyn Codec> = Arc::new(MapCodec {
                key,
                value: registry.resolve(value)?,
            });
            Ok(codec)
        }))
    }
}

#[derive(Debug)]
pub struct PairCodec {
    first: Arc<dyn Codec>,
    second: Arc<dyn Codec>,
}

impl Codec for PairCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::Pair(first, second) = value else {
            return Err(value.mismatch("Pair"));
        };
        self.first.encode(buffer, first)?;
        self.second.encode(buffer, second)
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let first = self.first.decode(buffer)?;
        let second = self.second.decode(buffer)?;
        Ok(Value::Pair(Box::new(first), Box::new(second)))
    }
}

pub struct PairFactory;

impl CodecFactory for PairFactory {
    fn name(&self) -> &'static str {
        "pair"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        let TypeDescriptor::Pair(first, second) = descriptor else {
            return None;
        };
        Some(registry.resolve(first).and_then(|first| {
            let codec: Arc<dyn Codec> = Arc::new(PairCodec {
                first,
                second: registry.resolve(second)?,
            });
            Ok(codec)
        }))
    }
}

#[derive(Debug)]
pub struct OptionalCodec {
    inner: Arc<dyn Codec>,
}

impl Codec for OptionalCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Optional(None) => {
                buffer.write_u8(0);
                Ok(())
            }
            Value::Optional(Some(inner)) => {
                buffer.write_u8(1);
                self.inner.encode(buffer, inner)
            }
            other => Err(other.mismatch("Optional")),
        }
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        if buffer.read_u8()? == 0 {
            return Ok(Value::Optional(None));
        }
        Ok(Value::Optional(Some(Box::new(self.inner.decode(buffer)?))))
    }
}

pub struct OptionalFactory;

impl CodecFactory for OptionalFactory {
    fn name(&self) -> &'static str {
        "optional"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        let TypeDescriptor::Optional(inner) = descriptor else {
            return None;
        };
        Some(registry.resolve(inner).map(|inner| {
            let codec: Arc<dyn Codec> = Arc::new(OptionalCodec { inner });
            codec
        }))
    }
}
