//! Control channel commands
//!
//! Every control frame is one polymorphic command: a discriminant byte from
//! [`COMMAND_TABLE`] followed by the command body. The table is fixed; a
//! discriminant outside it is a protocol error.

use crate::buffer::ProtocolBuffer;
use crate::codec::{Codec, CodecRegistry, WireStruct};
use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value, WireType};
use crate::wire_struct;
use std::sync::Arc;

pub const HASH_REQUEST: u8 = 1;
pub const HASH_RESPONSE: u8 = 2;
pub const INIT_SPACE: u8 = 3;
pub const OPEN_SPACE: u8 = 32;

/// Discriminant to command type
pub const COMMAND_TABLE: &[(u8, &str)] = &[
    (HASH_REQUEST, "HashRequest"),
    (HASH_RESPONSE, "HashResponse"),
    (OPEN_SPACE, "OpenSpace"),
    (INIT_SPACE, "InitSpace"),
];

/// Client hello; the properties keep the order the client sent them in
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HashRequest {
    pub properties: Vec<(String, String)>,
}

impl HashRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }
}

impl WireType for HashRequest {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Named("HashRequest")
    }

    fn to_value(&self) -> Value {
        Value::Map(
            self.properties
                .iter()
                .map(|(key, value)| (key.to_value(), value.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Map(entries) = value else {
            return Err(value.mismatch("Map"));
        };
        let properties = entries
            .into_iter()
            .map(|(key, value)| Ok((String::from_value(key)?, String::from_value(value)?)))
            .collect::<Result<_, CodecError>>()?;
        Ok(Self { properties })
    }
}

/// Writes the property map as two parallel lists, every key and then every
/// value
#[derive(Debug, Clone, Copy, Default)]
pub struct HashRequestCodec;

impl Codec for HashRequestCodec {
    fn encode(&self, buffer: &mut ProtocolBuffer, value: &Value) -> Result<(), CodecError> {
        let Value::Map(entries) = value else {
            return Err(value.mismatch("Map"));
        };

        buffer.write_length(entries.len())?;
        for (key, _) in entries {
            match key {
                Value::String(key) => buffer.write_string(key)?,
                other => return Err(other.mismatch("String")),
            }
        }

        buffer.write_length(entries.len())?;
        for (_, value) in entries {
            match value {
                Value::String(value) => buffer.write_string(value)?,
                other => return Err(other.mismatch("String")),
            }
        }
        Ok(())
    }

    fn decode(&self, buffer: &mut ProtocolBuffer) -> Result<Value, CodecError> {
        let keys = read_strings(buffer)?;
        let values = read_strings(buffer)?;
        if keys.len() != values.len() {
            return Err(CodecError::LengthMismatch {
                what: "hash request properties",
                left: keys.len(),
                right: values.len(),
            });
        }
        Ok(Value::Map(
            keys.into_iter()
                .zip(values)
                .map(|(key, value)| (Value::String(key), Value::String(value)))
                .collect(),
        ))
    }
}

fn read_strings(buffer: &mut ProtocolBuffer) -> Result<Vec<String>, CodecError> {
    let count = buffer.read_length()?;
    let mut strings = Vec::with_capacity(count.min(buffer.remaining()));
    for _ in 0..count {
        strings.push(buffer.read_string()?);
    }
    Ok(strings)
}

wire_struct! {
    /// Session hash issued to the client plus the negotiated encryption flag
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HashResponse: declared {
        pub hash: String,
        pub encryption_enabled: bool,
    }
}

wire_struct! {
    /// Asks the client to open a new connection for a space
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenSpace {
        pub space_id: i64,
    }
}

wire_struct! {
    /// First frame of a space connection, binding it to a session
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct InitSpace: declared {
        pub hash: String,
        pub space_id: i64,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    HashRequest(HashRequest),
    HashResponse(HashResponse),
    OpenSpace(OpenSpace),
    InitSpace(InitSpace),
}

impl ControlCommand {
    pub fn discriminant(&self) -> u8 {
        match self {
            ControlCommand::HashRequest(_) => HASH_REQUEST,
            ControlCommand::HashResponse(_) => HASH_RESPONSE,
            ControlCommand::OpenSpace(_) => OPEN_SPACE,
            ControlCommand::InitSpace(_) => INIT_SPACE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::HashRequest(_) => "HashRequest",
            ControlCommand::HashResponse(_) => "HashResponse",
            ControlCommand::OpenSpace(_) => "OpenSpace",
            ControlCommand::InitSpace(_) => "InitSpace",
        }
    }
}

impl WireType for ControlCommand {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Command
    }

    fn to_value(&self) -> Value {
        let body = match self {
            ControlCommand::HashRequest(command) => command.to_value(),
            ControlCommand::HashResponse(command) => command.to_value(),
            ControlCommand::OpenSpace(command) => command.to_value(),
            ControlCommand::InitSpace(command) => command.to_value(),
        };
        Value::Command(self.discriminant(), Box::new(body))
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Command(tag, body) = value else {
            return Err(value.mismatch("Command"));
        };
        match tag {
            HASH_REQUEST => Ok(ControlCommand::HashRequest(HashRequest::from_value(*body)?)),
            HASH_RESPONSE => Ok(ControlCommand::HashResponse(HashResponse::from_value(*body)?)),
            OPEN_SPACE => Ok(ControlCommand::OpenSpace(OpenSpace::from_value(*body)?)),
            INIT_SPACE => Ok(ControlCommand::InitSpace(InitSpace::from_value(*body)?)),
            other => Err(CodecError::UnknownCommand(other)),
        }
    }
}

/// Installs the command bodies every registry needs before the command
/// factory can resolve [`TypeDescriptor::Command`]
pub(crate) fn register_control_commands(registry: &mut CodecRegistry) {
    registry.register_codec(HashRequest::descriptor(), Arc::new(HashRequestCodec));
    registry.register_builtin_struct(HashResponse::schema());
    registry.register_builtin_struct(OpenSpace::schema());
    registry.register_builtin_struct(InitSpace::schema());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(command: &ControlCommand) -> Vec<u8> {
        let registry = CodecRegistry::new();
        let mut buffer = ProtocolBuffer::new();
        registry.encode(&mut buffer, command).unwrap();
        buffer.into_bytes()
    }

    fn decode(bytes: Vec<u8>) -> Result<ControlCommand, CodecError> {
        let registry = CodecRegistry::new();
        let mut buffer = ProtocolBuffer::from_bytes(bytes);
        registry.decode(&mut buffer)
    }

    #[test]
    fn test_hash_request_bytes() {
        let request = HashRequest::new().with("locale", "ru").with("debug", "true");
        let bytes = encode(&ControlCommand::HashRequest(request.clone()));

        let mut expected = vec![HASH_REQUEST, 2, 6];
        expected.extend_from_slice(b"locale");
        expected.push(5);
        expected.extend_from_slice(b"debug");
        expected.extend_from_slice(&[2, 2]);
        expected.extend_from_slice(b"ru");
        expected.push(4);
        expected.extend_from_slice(b"true");
        assert_eq!(bytes, expected);

        assert_eq!(decode(bytes), Ok(ControlCommand::HashRequest(request)));
    }

    #[test]
    fn test_empty_hash_request() {
        let bytes = encode(&ControlCommand::HashRequest(HashRequest::new()));
        assert_eq!(bytes, vec![HASH_REQUEST, 0, 0]);
    }

    #[test]
    fn test_hash_request_lookup() {
        let request = HashRequest::new().with("locale", "en");
        assert_eq!(request.get("locale"), Some("en"));
        assert_eq!(request.get("debug"), None);
    }

    #[test]
    fn test_hash_request_length_mismatch() {
        // two keys, one value
        let bytes = vec![HASH_REQUEST, 2, 1, b'a', 1, b'b', 1, 1, b'x'];
        assert_eq!(
            decode(bytes),
            Err(CodecError::LengthMismatch {
                what: "hash request properties",
                left: 2,
                right: 1
            })
        );
    }

    #[test]
    fn test_hash_response_declared_order() {
        let bytes = encode(&ControlCommand::HashResponse(HashResponse {
            hash: "ab".to_string(),
            encryption_enabled: true,
        }));
        assert_eq!(bytes, vec![HASH_RESPONSE, 2, b'a', b'b', 1]);
    }

    #[test]
    fn test_open_space_bytes() {
        let bytes = encode(&ControlCommand::OpenSpace(OpenSpace { space_id: 258 }));
        assert_eq!(bytes, vec![OPEN_SPACE, 0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_init_space_roundtrip() {
        let command = ControlCommand::InitSpace(InitSpace {
            hash: "cafe".to_string(),
            space_id: 7,
        });
        let bytes = encode(&command);
        assert_eq!(&bytes[..6], &[INIT_SPACE, 4, b'c', b'a', b'f', b'e']);
        assert_eq!(decode(bytes), Ok(command));
    }

    #[test]
    fn test_unknown_discriminant() {
        assert_eq!(decode(vec![99, 0, 0]), Err(CodecError::UnknownCommand(99)));
    }

    #[test]
    fn test_command_names_are_reserved() {
        let mut registry = CodecRegistry::new();
        assert_eq!(
            registry.register_struct(crate::codec::StructSchema::new(
                "OpenSpace",
                crate::codec::FieldOrder::Sorted,
                vec![]
            )),
            Err(CodecError::DuplicateSchema { name: "OpenSpace" })
        );
    }
}
