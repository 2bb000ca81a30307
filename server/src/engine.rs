//! The assembled server runtime: protocol, handlers, spaces and sessions

use crate::channel::{ChannelId, SpaceChannel};
use crate::config::ServerConfig;
use crate::dispatcher::{DispatchContext, DispatcherBuilder, EventDispatcher};
use crate::error::{DispatchError, StartupError};
use crate::event::{ChannelAddedEvent, ChannelRemovedEvent};
use crate::object::ObjectIds;
use crate::protocol::{Protocol, ProtocolBuilder};
use crate::session::SessionRegistry;
use crate::space::{Space, SpaceId, Spaces};
use crate::systems::System;
use log::info;
use shared::{JsonResourceCatalog, ResourceCatalog};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct EngineBuilder {
    config: ServerConfig,
    protocol: ProtocolBuilder,
    dispatcher: DispatcherBuilder,
    systems: Vec<Box<dyn System>>,
    spaces: Vec<Space>,
    resources: Arc<dyn ResourceCatalog>,
}

impl EngineBuilder {
    pub fn protocol(&mut self) -> &mut ProtocolBuilder {
        &mut self.protocol
    }

    pub fn dispatcher(&mut self) -> &mut DispatcherBuilder {
        &mut self.dispatcher
    }

    pub fn system(&mut self, system: impl System + 'static) -> &mut Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn systems(&mut self, systems: Vec<Box<dyn System>>) -> &mut Self {
        self.systems.extend(systems);
        self
    }

    /// A space created up front, next to the spaces systems create
    pub fn space(&mut self, space: Space) -> &mut Self {
        self.spaces.push(space);
        self
    }

    pub fn resources(&mut self, catalog: impl ResourceCatalog + 'static) -> &mut Self {
        self.resources = Arc::new(catalog);
        self
    }

    pub fn build(mut self) -> Result<Arc<Engine>, StartupError> {
        for system in &self.systems {
            system.declare(&mut self.protocol)?;
            system.handlers(&mut self.dispatcher);
        }

        let engine = Engine {
            sessions: SessionRegistry::new(
                self.config.max_sessions,
                self.config.encryption_enabled,
            ),
            protocol: self.protocol.build()?,
            dispatcher: self.dispatcher.build(),
            spaces: Spaces::new(),
            ids: ObjectIds::new(),
            channel_ids: AtomicU64::new(1),
            resources: self.resources,
            config: self.config,
        };

        for space in self.spaces {
            engine.spaces.insert(space);
        }
        for system in &self.systems {
            for space in system.spaces(&engine)? {
                engine.spaces.insert(space);
            }
            info!("System {} installed", system.name());
        }
        Ok(Arc::new(engine))
    }
}

pub struct Engine {
    config: ServerConfig,
    protocol: Protocol,
    dispatcher: EventDispatcher,
    spaces: Spaces,
    sessions: SessionRegistry,
    ids: ObjectIds,
    channel_ids: AtomicU64,
    resources: Arc<dyn ResourceCatalog>,
}

impl Engine {
    pub fn builder(config: ServerConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            protocol: ProtocolBuilder::new(),
            dispatcher: DispatcherBuilder::new(),
            systems: Vec::new(),
            spaces: Vec::new(),
            resources: Arc::new(JsonResourceCatalog::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn spaces(&self) -> &Spaces {
        &self.spaces
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn ids(&self) -> &ObjectIds {
        &self.ids
    }

    pub fn resources(&self) -> &dyn ResourceCatalog {
        self.resources.as_ref()
    }

    pub fn lobby_space_id(&self) -> SpaceId {
        self.config.lobby_space_id
    }

    /// A channel for a freshly initialized space connection
    pub fn new_channel(
        &self,
        session_hash: &str,
        space_id: SpaceId,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> SpaceChannel {
        let id: ChannelId = self.channel_ids.fetch_add(1, Ordering::Relaxed);
        let channel = SpaceChannel::new(id, session_hash, space_id, addr, outbound);
        match self.config.dependency_timeout() {
            Some(timeout) => channel.with_dependency_timeout(timeout),
            None => channel,
        }
    }

    pub fn context(
        self: &Arc<Self>,
        space: Arc<Space>,
        sender: Option<Arc<SpaceChannel>>,
    ) -> DispatchContext {
        DispatchContext::new(Arc::clone(self), space, sender)
    }

    /// Attaches a channel to its space and fires [`ChannelAddedEvent`] on the
    /// space root
    pub async fn open_channel(
        self: &Arc<Self>,
        channel: Arc<SpaceChannel>,
    ) -> Result<usize, DispatchError> {
        let space = self
            .spaces
            .get(channel.space_id())
            .ok_or(DispatchError::UnknownSpace(channel.space_id()))?;
        space.attach_channel(Arc::clone(&channel));
        info!(
            "Space channel {} initialized in space {} for {}",
            channel.id(),
            space.id(),
            channel.addr()
        );

        let ctx = self.context(Arc::clone(&space), Some(Arc::clone(&channel)));
        ctx.schedule(ChannelAddedEvent { channel }, space.root()).await
    }

    /// Closes a channel, detaches it and fires [`ChannelRemovedEvent`]
    pub async fn close_channel(
        self: &Arc<Self>,
        channel: Arc<SpaceChannel>,
    ) -> Result<usize, DispatchError> {
        channel.close();
        let Some(space) = self.spaces.get(channel.space_id()) else {
            return Ok(0);
        };
        if space.detach_channel(channel.id()).is_none() {
            return Ok(0);
        }
        info!("Space channel {} closed", channel.id());

        let ctx = self.context(Arc::clone(&space), None);
        ctx.schedule(ChannelRemovedEvent { channel }, space.root()).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("protocol", &self.protocol)
            .field("spaces", &self.spaces.ids())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
