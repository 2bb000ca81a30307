//! Codec registry and the factories that derive codecs from type descriptors
//!
//! Resolution order for a [`TypeDescriptor`]:
//!
//! 1. codecs registered for the exact descriptor (primitives, hand-written
//!    codecs such as the hash request property map);
//! 2. previously resolved codecs from the cache;
//! 3. the factory chain, in fixed priority order: struct, enum, optional,
//!    list, map, pair, resource, command. The first factory that applies
//!    builds the codec, resolving nested codecs through the registry.
//!
//! A descriptor no factory accepts is a configuration error. The protocol is
//! expected to resolve every declared type once at startup so such errors
//! never reach a live connection.

mod command;
mod container;
mod enumeration;
mod primitive;
mod resource;
mod structure;

pub use command::{CommandCodec, CommandFactory};
pub use container::{
    ListCodec, ListFactory, MapCodec, MapFactory, OptionalCodec, OptionalFactory, PairCodec,
    PairFactory,
};
pub use enumeration::{EnumCodec, EnumFactory, EnumSchema, WireEnum};
pub use primitive::{
    BoolCodec, ByteCodec, DoubleCodec, FloatCodec, IntCodec, LongCodec, ShortCodec, StringCodec,
};
pub use resource::{ResourceCodec, ResourceFactory};
pub use structure::{FieldOrder, FieldSchema, StructCodec, StructFactory, StructSchema, WireStruct};

use crate::buffer::ProtocolBuffer;
use crate::command as control;
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value, WireType};
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Encode/decode pair for one semantic type
pub trait Codec: Send + Sync + fmt::Debug {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError>;
    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError>;
}

/// One encoding rule of the factory chain
///
/// Returns `None` when the rule does not apply to the descriptor.
pub trait CodecFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(
        &self,
        registry: &CodecRegistry,
        descriptor: &TypeDescriptor,
    ) -> Option<Result<Arc<dyn Codec>, CodecError>>;
}

pub struct CodecRegistry {
    exact: HashMap<TypeDescriptor, Arc<dyn Codec>>,
    structs: HashMap<&'static str, StructSchema>,
    enums: HashMap<&'static str, EnumSchema>,
    factories: Vec<Box<dyn CodecFactory>>,
    cache: RwLock<HashMap<TypeDescriptor, Arc<dyn Codec>>>,
}

impl CodecRegistry {
    /// Creates a registry with primitive codecs, the standard factory chain
    /// and the control channel commands
    pub fn new() -> Self {
        let mut registry = Self {
            exact: HashMap::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            factories: vec![
                Box::new(StructFactory),
                Box::new(EnumFactory),
                Box::new(OptionalFactory),
                Box::new(ListFactory),
                Box::new(MapFactory),
                Box::new(PairFactory),
                Box::new(ResourceFactory),
                Box::new(CommandFactory::new(control::COMMAND_TABLE)),
            ],
            cache: RwLock::new(HashMap::new()),
        };

        registry.register_codec(TypeDescriptor::Bool, Arc::new(BoolCodec));
        registry.register_codec(TypeDescriptor::Byte, Arc::new(ByteCodec));
        registry.register_codec(TypeDescriptor::Short, Arc::new(ShortCodec));
        registry.register_codec(TypeDescriptor::Int, Arc::new(IntCodec));
        registry.register_codec(TypeDescriptor::Long, Arc::new(LongCodec));
        registry.register_codec(TypeDescriptor::Float, Arc::new(FloatCodec));
        registry.register_codec(TypeDescriptor::Double, Arc::new(DoubleCodec));
        registry.register_codec(TypeDescriptor::String, Arc::new(StringCodec));

        control::register_control_commands(&mut registry);
        registry
    }

    /// Registers a codec for one exact descriptor, taking precedence over
    /// every factory
    pub fn register_codec(&mut self, descriptor: TypeDescriptor, codec: Arc<dyn Codec>) {
        self.exact.insert(descriptor, codec);
    }

    pub fn register_struct(&mut self, schema: StructSchema) -> Result<(), CodecError> {
        if self.structs.contains_key(schema.name) || self.enums.contains_key(schema.name) {
            return Err(CodecError::DuplicateSchema { name: schema.name });
        }
        self.structs.insert(schema.name, schema);
        Ok(())
    }

    pub fn register_enum(&mut self, schema: EnumSchema) -> Result<(), CodecError> {
        if self.structs.contains_key(schema.name) || self.enums.contains_key(schema.name) {
            return Err(CodecError::DuplicateSchema { name: schema.name });
        }
        self.enums.insert(schema.name, schema);
        Ok(())
    }

    /// Registers the schema of a declared struct, ignoring repeats of the
    /// same type
    pub fn register_wire_struct<T: WireStruct>(&mut self) -> Result<(), CodecError> {
        let schema = T::schema();
        match self.structs.get(schema.name) {
            Some(existing) if *existing == schema => Ok(()),
            _ => self.register_struct(schema),
        }
    }

    pub fn register_wire_enum<T: WireEnum>(&mut self) -> Result<(), CodecError> {
        let schema = T::schema();
        match self.enums.get(schema.name) {
            Some(existing) if *existing == schema => Ok(()),
            _ => self.register_enum(schema),
        }
    }

    /// Schemas reserved by the crate itself; their names cannot be reused
    pub(crate) fn register_builtin_struct(&mut self, schema: StructSchema) {
        self.structs.insert(schema.name, schema);
    }

    pub fn struct_schema(&self, name: &str) -> Option<&StructSchema> {
        self.structs.get(name)
    }

    pub fn enum_schema(&self, name: &str) -> Option<&EnumSchema> {
        self.enums.get(name)
    }

    pub fn factory_names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|factory| factory.name()).collect()
    }

    /// Number of codecs derived by factories so far
    pub fn cached_count(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns the codec for a descriptor, deriving and caching it on first use
    pub fn resolve(&self, descriptor: &TypeDescriptor) -> Result<Arc<dyn Codec>, CodecError> {
        if let Some(codec) = self.exact.get(descriptor) {
            return Ok(Arc::clone(codec));
        }

        if let Some(codec) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(descriptor)
        {
            return Ok(Arc::clone(codec));
        }

        for factory in &self.factories {
            if let Some(created) = factory.create(self, descriptor) {
                let codec = created?;
                debug!("Resolved {} via {} factory", descriptor, factory.name());
                let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
                return Ok(Arc::clone(
                    cache.entry(descriptor.clone()).or_insert(codec),
                ));
            }
        }

        Err(CodecError::NoCodec {
            descriptor: descriptor.to_string(),
        })
    }

    pub fn encode_value(
        &self,
        descriptor: &TypeDescriptor,
        buffer: &mut ProtocolBuffer,
        value: &Value,
    ) -> Result<(), CodecError> {
        self.resolve(descriptor)?.encode(buffer, value)
    }

    pub fn encode<T: WireType>(
        &self,
        buffer: &mut ProtocolBuffer,
        value: &T,
    ) -> Result<(), CodecError> {
        self.encode_value(&T::descriptor(), buffer, &value.to_value())
    }

    pub fn decode<T: WireType>(&self, buffer: &mut ProtocolBuffer) -> Result<T, CodecError> {
        let value = self.resolve(&T::descriptor())?.decode(buffer)?;
        T::from_value(value)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("structs", &self.structs.len())
            .field("enums", &self.enums.len())
            .field("cached", &self.cached_count())
            .finish()
    }
}
