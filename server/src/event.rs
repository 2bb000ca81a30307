//! Event kinds
//!
//! * [`Event`]: anything handlers can be registered for. Internal events are
//!   plain types implementing it and never leave the server.
//! * [`ClientEvent`]: sent server to client through
//!   [`DispatchContext::send`](crate::dispatcher::DispatchContext::send).
//! * [`ServerEvent`]: received from clients, decoded and dispatched with the
//!   receiving channel as sender.
//!
//! Wire-visible events are `wire_struct!` types with a protocol id, declared
//! through [`client_event!`](crate::client_event) and
//! [`server_event!`](crate::server_event).

use crate::channel::SpaceChannel;
use shared::{ProtocolId, WireStruct};
use std::sync::Arc;

pub trait Event: Send + Sync + 'static {}

pub trait ClientEvent: WireStruct + Send + Sync + 'static {
    const EVENT_ID: ProtocolId;

    /// Whether recipients need the target object loaded
    const ALLOW_UNLOADED: bool = false;
}

pub trait ServerEvent: Event + WireStruct {
    const EVENT_ID: ProtocolId;
}

#[macro_export]
macro_rules! client_event {
    ($ty:ty = $id:expr) => {
        impl $crate::event::ClientEvent for $ty {
            const EVENT_ID: $crate::shared::ProtocolId = $id;
        }
    };
    ($ty:ty = $id:expr, allow_unloaded) => {
        impl $crate::event::ClientEvent for $ty {
            const EVENT_ID: $crate::shared::ProtocolId = $id;
            const ALLOW_UNLOADED: bool = true;
        }
    };
}

#[macro_export]
macro_rules! server_event {
    ($ty:ty = $id:expr) => {
        impl $crate::event::Event for $ty {}

        impl $crate::event::ServerEvent for $ty {
            const EVENT_ID: $crate::shared::ProtocolId = $id;
        }
    };
}

/// Fired on the space root once a channel finished its init handshake
#[derive(Debug, Clone)]
pub struct ChannelAddedEvent {
    pub channel: Arc<SpaceChannel>,
}

impl Event for ChannelAddedEvent {}

/// Fired on the space root after a channel closed
#[derive(Debug, Clone)]
pub struct ChannelRemovedEvent {
    pub channel: Arc<SpaceChannel>,
}

impl Event for ChannelRemovedEvent {}
