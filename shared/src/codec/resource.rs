use super::{Codec, CodecFactory, CodecRegistry};
use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value};
use std::sync::Arc;

/// Writes a resource's numeric id; resources only ever leave the server, so
/// decoding is refused
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceCodec;

impl Codec for ResourceCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        match value {
            Value::Resource(id) => {
                buffer.write_i64(*id);
                Ok(())
            }
            other => Err(other.mismatch("Resource")),
        }
    }

    fn decode(&self, _buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        Err(CodecError::UnsupportedDecode("resource reference"))
    }
}

pub struct ResourceFactory;

impl CodecFactory for ResourceFactory {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn create(
        &self,
        _registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        match descriptor {
            TypeDescriptor::Resource => Some(Ok(Arc::new(ResourceCodec))),
            _ => None,
        }
    }
}
