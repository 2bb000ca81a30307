//! Error types of the server runtime
//!
//! Configuration errors ([`ProtocolError`]) stop the server at startup.
//! Protocol errors drop only the connection that produced them. Application
//! errors ([`HandlerError`], most [`DispatchError`]s) fail one dispatch path
//! and are logged. Delivery errors ([`ChannelError`]) are isolated to one
//! recipient.

use crate::channel::ChannelId;
use crate::config::ConfigError;
use crate::object::ObjectId;
use crate::space::SpaceId;
use shared::resource::CatalogError;
use shared::{CodecError, ProtocolId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{owner}.{member} requires a {component} component")]
    MissingMember {
        owner: &'static str,
        member: &'static str,
        component: &'static str,
    },

    #[error("object {object} already has a {component} component")]
    DuplicateComponent {
        object: ObjectId,
        component: &'static str,
    },

    #[error("object {object} does not match template {template}")]
    TemplateMismatch {
        object: ObjectId,
        template: &'static str,
    },

    #[error("object {object} is not loaded in channel {channel}")]
    NotLoaded { object: ObjectId, channel: ChannelId },

    #[error("no objects join into {node}")]
    NoJoinCandidates { node: &'static str },

    #[error("no user object is bound to the originating channel")]
    NoChannelUser,

    #[error("object {0} is already registered in the space")]
    DuplicateObject(ObjectId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("protocol id {id} is declared by both {first} and {second}")]
    DuplicateId {
        id: ProtocolId,
        first: &'static str,
        second: &'static str,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("server is full ({max} sessions)")]
    SessionLimit { max: usize },

    #[error("dependencies were not acknowledged within {0:?}")]
    DependencyTimeout(Duration),
}

impl ChannelError {
    pub fn is_protocol_error(&self) -> bool {
        match self {
            ChannelError::Protocol(_) => true,
            ChannelError::Codec(err) => err.is_protocol_error(),
            _ => false,
        }
    }
}

/// Failure of one handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Dispatch(Box<DispatchError>),
}

impl HandlerError {
    pub fn validation(message: impl Into<String>) -> Self {
        HandlerError::Validation(message.into())
    }
}

impl From<DispatchError> for HandlerError {
    fn from(err: DispatchError) -> Self {
        HandlerError::Dispatch(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("mandatory handler {handler} does not match {event}: {source}")]
    NodeMismatch {
        handler: &'static str,
        event: &'static str,
        source: ModelError,
    },

    #[error("handler {handler} failed on {event}: {source}")]
    Handler {
        handler: &'static str,
        event: &'static str,
        source: HandlerError,
    },

    #[error("unknown server event id {0}")]
    UnknownEvent(ProtocolId),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("unknown space {0}")]
    UnknownSpace(SpaceId),

    #[error("unexpected frame kind {0} from client")]
    UnexpectedFrame(u8),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DispatchError {
    /// True when the peer sent something the protocol does not allow; the
    /// connection should be dropped
    pub fn is_protocol_error(&self) -> bool {
        match self {
            DispatchError::UnknownEvent(_)
            | DispatchError::UnknownSpace(_)
            | DispatchError::UnexpectedFrame(_) => true,
            DispatchError::Codec(err) => err.is_protocol_error(),
            _ => false,
        }
    }
}

/// Anything that stops the server before it accepts connections
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to create spaces: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to bind: {0}")]
    Io(#[from] std::io::Error),
}
