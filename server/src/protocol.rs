//! Protocol registration
//!
//! Every wire-visible type (models, templates, events and the plain structs
//! nested in them) is declared once on a [`ProtocolBuilder`]. Building the
//! protocol checks that protocol ids are unique and resolves every codec, so
//! configuration errors stop the server before it accepts a connection.

use crate::dispatcher::{receive_event, DispatchContext};
use crate::error::{DispatchError, ProtocolError};
use crate::event::{ClientEvent, ServerEvent};
use crate::object::{GameObject, Model, ModelValue, ObjectId};
use crate::template::Template;
use crate::utils::short_type_name;
use futures::future::BoxFuture;
use log::info;
use shared::{
    CodecError, CodecRegistry, ControlCommand, ProtocolBuffer, ProtocolId, SpaceFrame,
    TypeDescriptor, Value, WireEnum, WireStruct, WireType,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Decodes one server event body and dispatches it
pub type ReceiveFn = fn(
    DispatchContext,
    Arc<GameObject>,
    Vec<u8>,
) -> BoxFuture<'static, Result<usize, DispatchError>>;

#[derive(Clone, Copy)]
pub struct ServerEventEntry {
    pub name: &'static str,
    pub receive: ReceiveFn,
}

pub struct ProtocolBuilder {
    registry: CodecRegistry,
    names: HashMap<ProtocolId, &'static str>,
    models: HashMap<ProtocolId, TypeDescriptor>,
    server_events: HashMap<ProtocolId, ServerEventEntry>,
    descriptors: Vec<TypeDescriptor>,
}

impl ProtocolBuilder {
    pub fn new() -> Self {
        Self {
            registry: CodecRegistry::new(),
            names: HashMap::new(),
            models: HashMap::new(),
            server_events: HashMap::new(),
            descriptors: Vec::new(),
        }
    }

    fn claim(&mut self, id: ProtocolId, name: &'static str) -> Result<(), ProtocolError> {
        match self.names.get(&id) {
            Some(first) if *first == name => Ok(()),
            Some(first) => Err(ProtocolError::DuplicateId {
                id,
                first,
                second: name,
            }),
            None => {
                self.names.insert(id, name);
                Ok(())
            }
        }
    }

    /// A struct used inside other wire types
    pub fn wire_struct<T: WireStruct>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.registry.register_wire_struct::<T>()?;
        self.descriptors.push(T::descriptor());
        Ok(self)
    }

    pub fn wire_enum<T: WireEnum>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.registry.register_wire_enum::<T>()?;
        self.descriptors.push(T::descriptor());
        Ok(self)
    }

    pub fn model<M: Model>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.claim(M::MODEL_ID, short_type_name::<M>())?;
        self.models.insert(M::MODEL_ID, M::descriptor());
        self.wire_struct::<M>()
    }

    pub fn template<T: Template>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.claim(T::TEMPLATE_ID, T::NAME)?;
        Ok(self)
    }

    pub fn client_event<E: ClientEvent>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.claim(E::EVENT_ID, short_type_name::<E>())?;
        self.wire_struct::<E>()
    }

    pub fn server_event<E: ServerEvent>(&mut self) -> Result<&mut Self, ProtocolError> {
        self.claim(E::EVENT_ID, short_type_name::<E>())?;
        self.server_events.insert(
            E::EVENT_ID,
            ServerEventEntry {
                name: short_type_name::<E>(),
                receive: receive_event::<E>,
            },
        );
        self.wire_struct::<E>()
    }

    /// Resolves every declared codec
    pub fn build(self) -> Result<Protocol, ProtocolError> {
        for descriptor in &self.descriptors {
            self.registry.resolve(descriptor)?;
        }
        self.registry.resolve(&ControlCommand::descriptor())?;
        info!(
            "Protocol built: {} ids, {} codecs",
            self.names.len(),
            self.registry.cached_count()
        );
        Ok(Protocol {
            registry: self.registry,
            names: self.names,
            models: self.models,
            server_events: self.server_events,
        })
    }
}

impl Default for ProtocolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Protocol {
    registry: CodecRegistry,
    names: HashMap<ProtocolId, &'static str>,
    models: HashMap<ProtocolId, TypeDescriptor>,
    server_events: HashMap<ProtocolId, ServerEventEntry>,
}

impl Protocol {
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn name_of(&self, id: ProtocolId) -> Option<&'static str> {
        self.names.get(&id).copied()
    }

    pub fn server_event(&self, id: ProtocolId) -> Option<ServerEventEntry> {
        self.server_events.get(&id).copied()
    }

    pub fn encode<T: WireType>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut buffer = ProtocolBuffer::new();
        self.registry.encode(&mut buffer, value)?;
        Ok(buffer.into_bytes())
    }

    /// Decodes a complete payload; leftover bytes are an error
    pub fn decode<T: WireType>(&self, bytes: Vec<u8>) -> Result<T, CodecError> {
        let mut buffer = ProtocolBuffer::from_bytes(bytes);
        let value = self.registry.decode(&mut buffer)?;
        buffer.expect_end()?;
        Ok(value)
    }

    pub fn event_frame<E: ClientEvent>(
        &self,
        event: &E,
        object: ObjectId,
    ) -> Result<Vec<u8>, CodecError> {
        SpaceFrame::Event {
            event_id: E::EVENT_ID,
            object_id: object,
            body: self.encode(event)?,
        }
        .encode()
    }

    pub fn share_frame(
        &self,
        object: &GameObject,
        models: &[ModelValue],
    ) -> Result<Vec<u8>, CodecError> {
        let mut buffer = ProtocolBuffer::new();
        buffer.write_length(models.len())?;
        for model in models {
            buffer.write_i64(model.id);
            self.registry
                .encode_value(&model.descriptor, &mut buffer, &model.value)?;
        }
        SpaceFrame::ObjectShare {
            object_id: object.id(),
            template_id: object.template_id(),
            models: buffer.into_bytes(),
        }
        .encode()
    }

    /// Reads the model section of an ObjectShare frame
    pub fn decode_models(&self, section: Vec<u8>) -> Result<Vec<(ProtocolId, Value)>, CodecError> {
        let mut buffer = ProtocolBuffer::from_bytes(section);
        let count = buffer.read_length()?;
        let mut models = Vec::with_capacity(count.min(buffer.remaining()));
        for _ in 0..count {
            let id = buffer.read_i64()?;
            let descriptor = self.models.get(&id).ok_or_else(|| CodecError::NoCodec {
                descriptor: format!("model {}", id),
            })?;
            models.push((id, self.registry.resolve(descriptor)?.decode(&mut buffer)?));
        }
        buffer.expect_end()?;
        Ok(models)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("ids", &self.names.len())
            .field("server_events", &self.server_events.len())
            .field("registry", &self.registry)
            .finish()
    }
}
