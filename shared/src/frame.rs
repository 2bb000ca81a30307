//! Space channel frames
//!
//! Every payload on a space connection starts with a kind byte:
//!
//! | kind | frame              | direction       | body |
//! |------|--------------------|-----------------|------|
//! | 1    | Event              | both            | i64 event id, i64 object id, event body |
//! | 2    | ObjectShare        | server → client | i64 object id, i64 template id, varint model count, (i64 model id, model body)* |
//! | 3    | LoadDependencies   | server → client | i32 callback id, class id list, resource id list |
//! | 4    | DependenciesLoaded | client → server | i32 callback id |
//!
//! Event and model bodies are only meaningful against the protocol's
//! declared types, so this layer carries them as raw bytes.

use crate::buffer::ProtocolBuffer;
use crate::error::CodecError;
use crate::value::ProtocolId;

pub const EVENT: u8 = 1;
pub const OBJECT_SHARE: u8 = 2;
pub const LOAD_DEPENDENCIES: u8 = 3;
pub const DEPENDENCIES_LOADED: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceFrame {
    Event {
        event_id: ProtocolId,
        object_id: i64,
        body: Vec<u8>,
    },
    /// `models` is the encoded model section: varint count, then each model
    ObjectShare {
        object_id: i64,
        template_id: ProtocolId,
        models: Vec<u8>,
    },
    LoadDependencies {
        callback_id: i32,
        classes: Vec<ProtocolId>,
        resources: Vec<i64>,
    },
    DependenciesLoaded {
        callback_id: i32,
    },
}

impl SpaceFrame {
    pub fn kind(&self) -> u8 {
        match self {
            SpaceFrame::Event { .. } => EVENT,
            SpaceFrame::ObjectShare { .. } => OBJECT_SHARE,
            SpaceFrame::LoadDependencies { .. } => LOAD_DEPENDENCIES,
            SpaceFrame::DependenciesLoaded { .. } => DEPENDENCIES_LOADED,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buffer = ProtocolBuffer::new();
        buffer.write_u8(self.kind());
        match self {
            SpaceFrame::Event {
                event_id,
                object_id,
                body,
            } => {
                buffer.write_i64(*event_id);
                buffer.write_i64(*object_id);
                buffer.write_bytes(body);
            }
            SpaceFrame::ObjectShare {
                object_id,
                template_id,
                models,
            } => {
                buffer.write_i64(*object_id);
                buffer.write_i64(*template_id);
                buffer.write_bytes(models);
            }
            SpaceFrame::LoadDependencies {
                callback_id,
                classes,
                resources,
            } => {
                buffer.write_i32(*callback_id);
                write_ids(&mut buffer, classes)?;
                write_ids(&mut buffer, resources)?;
            }
            SpaceFrame::DependenciesLoaded { callback_id } => buffer.write_i32(*callback_id),
        }
        Ok(buffer.into_bytes())
    }

    pub fn decode(payload: Vec<u8>) -> Result<Self, CodecError> {
        let mut buffer = ProtocolBuffer::from_bytes(payload);
        let frame = match buffer.read_u8()? {
            EVENT => SpaceFrame::Event {
                event_id: buffer.read_i64()?,
                object_id: buffer.read_i64()?,
                body: buffer.read_rest(),
            },
            OBJECT_SHARE => SpaceFrame::ObjectShare {
                object_id: buffer.read_i64()?,
                template_id: buffer.read_i64()?,
                models: buffer.read_rest(),
            },
            LOAD_DEPENDENCIES => SpaceFrame::LoadDependencies {
                callback_id: buffer.read_i32()?,
                classes: read_ids(&mut buffer)?,
                resources: read_ids(&mut buffer)?,
            },
            DEPENDENCIES_LOADED => SpaceFrame::DependenciesLoaded {
                callback_id: buffer.read_i32()?,
            },
            kind => return Err(CodecError::UnknownFrameKind(kind)),
        };
        buffer.expect_end()?;
        Ok(frame)
    }
}

fn write_ids(buffer: &mut ProtocolBuffer, ids: &[i64]) -> Result<(), CodecError> {
    buffer.write_length(ids.len())?;
    ids.iter().for_each(|id| buffer.write_i64(*id));
    Ok(())
}

fn read_ids(buffer: &mut ProtocolBuffer) -> Result<Vec<i64>, CodecError> {
    let count = buffer.read_length()?;
    let mut ids = Vec::with_capacity(count.min(buffer.remaining()));
    for _ in 0..count {
        ids.push(buffer.read_i64()?);
    }
    Ok(ids)
}
