//! # Shared Wire Protocol
//!
//! Everything both ends of a connection must agree on byte for byte.
//!
//! ## Layers
//!
//! ### Buffer (`buffer`)
//! [`ProtocolBuffer`] is the forward cursor every codec reads from and writes
//! to. It owns the primitive encodings: strict booleans, big-endian numbers,
//! LEB128 varints for counts and UTF-8 strings with a varint length.
//!
//! ### Values and wire types (`value`)
//! Codecs operate on dynamic [`Value`] trees. Concrete Rust types bridge into
//! them through [`WireType`], whose [`TypeDescriptor`] is the key the codec
//! registry resolves and caches by.
//!
//! ### Codecs (`codec`)
//! [`CodecRegistry`] derives codecs from descriptors through a fixed chain of
//! factories (struct, enum, optional, list, map, pair, resource, command),
//! caching each resolved descriptor. Struct and enum shapes are declared with
//! [`wire_struct!`] and [`wire_enum!`].
//!
//! ### Control commands (`command`)
//! The handshake vocabulary of the control channel: hash request and response,
//! space open and space init.
//!
//! ### Space frames (`frame`)
//! The four frame kinds of a space connection: events, object shares and the
//! dependency load handshake.
//!
//! ### Resources (`resource`)
//! Resource references travel as bare ids; [`ResourceCatalog`] maps names to
//! references on the server.

pub mod buffer;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
#[doc(hidden)]
pub mod macros;
pub mod resource;
pub mod value;

pub use buffer::ProtocolBuffer;
pub use codec::{
    Codec, CodecFactory, CodecRegistry, EnumSchema, FieldOrder, FieldSchema, StructSchema,
    WireEnum, WireStruct,
};
pub use command::{ControlCommand, HashRequest, HashResponse, InitSpace, OpenSpace};
pub use error::CodecError;
pub use frame::SpaceFrame;
pub use resource::{JsonResourceCatalog, ResourceCatalog, ResourceRef};
pub use value::{ProtocolId, TypeDescriptor, Value, WireType};
