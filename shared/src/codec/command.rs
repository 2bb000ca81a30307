use super::{Codec, CodecFactory, CodecRegistry};
use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value};
use std::sync::Arc;

/// `[discriminant byte][variant body]`; an unknown discriminant cannot be
/// skipped, so it is fatal for the connection
#[derive(Debug)]
pub struct CommandCodec {
    variants: Vec<(u8, Arc<dyn Codec>)>,
}

impl CommandCodec {
    fn variant(&self, tag: u8) -> Result<&Arc<dyn Codec>, CodecError> {
        self.variants
            .iter()
            .find(|(candidate, _)| *candidate == tag)
            .map(|(_, codec)| codec)
            .ok_or(CodecError::UnknownCommand(tag))
    }
}

impl Codec for CommandCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::Command(tag, body) = value else {
            return Err(value.mismatch("Command"));
        };
        let codec = self.variant(*tag)?;
        buffer.write_u8(*tag);
        codec.encode(buffer, body)
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let tag = buffer.read_u8()?;
        let body = self.variant(tag)?.decode(buffer)?;
        Ok(Value::Command(tag, Box::new(body)))
    }
}

/// Builds the control command codec from a fixed (discriminant, type) table
pub struct CommandFactory {
    table: &'static [(u8, &'static str)],
}

impl CommandFactory {
    pub fn new(table: &'static [(u8, &'static str)]) -> Self {
        Self { table }
    }
}

impl CodecFactory for CommandFactory {
    fn name(&self) -> &'static str {
        "command"
    }

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>> {
        if *descriptor != TypeDescriptor::Command {
            return None;
        }

        let variants = self
            .table
            .iter()
            .map(|(tag, name)| {
                registry
                    .resolve(&TypeDescriptor::Named(name))
                    .map(|codec| (*tag, codec))
            })
            .collect::<Result<Vec<_>, _>>();

        Some(variants.map(|variants| {
            let codec: Arc<dyn Codec> = Arc::new(CommandCodec { variants });
            codec
        }))
    }
}
