//! Lobby: the space every session opens first
//!
//! Joining creates a user object bound to the new channel. The new channel
//! receives the whole lobby, and every other channel receives the new user.
//! Leaving removes the user object from the space.

use super::chat::{Chat, ChatTemplate};
use super::System;
use crate::channel::SpaceChannel;
use crate::dispatcher::{DispatchContext, DispatcherBuilder};
use crate::engine::Engine;
use crate::error::{HandlerError, ModelError, ProtocolError};
use crate::event::{ChannelAddedEvent, ChannelRemovedEvent};
use crate::node::AllowUnloaded;
use crate::object::{GameObject, ObjectId, Provided};
use crate::protocol::ProtocolBuilder;
use crate::space::Space;
use crate::template::Template;
use crate::{model, node, template};
use log::{debug, warn};
use shared::{wire_struct, ResourceRef};
use std::sync::Arc;

pub const BACKGROUND_RESOURCE: &str = "lobby/background";

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct LobbyInfo {
        pub name: String,
        pub background: Option<ResourceRef>,
    }
}
model!(LobbyInfo = 1001);

template! {
    pub struct LobbyTemplate(1000) {
        pub info: Arc<LobbyInfo>,
        pub chat: ChatTemplate,
    }
}

node! {
    pub struct LobbyNode match LobbyTemplate {
        pub info: Arc<LobbyInfo>,
    }
}

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct UserInfo {
        pub name: String,
    }
}
model!(UserInfo = 1101);

wire_struct! {
    /// Tells a client which user object is its own
    #[derive(Debug, Clone, PartialEq)]
    pub struct UserSelf {
        pub own: bool,
    }
}
model!(UserSelf = 1102);

template! {
    pub struct UserTemplate(1100) {
        pub info: Arc<UserInfo>,
        pub own: Provided<UserSelf>,
    }
}

node! {
    pub struct UserNode match UserTemplate {
        pub info: Arc<UserInfo>,
    }
}

pub fn user_template(name: impl Into<String>) -> UserTemplate {
    UserTemplate {
        info: Arc::new(UserInfo { name: name.into() }),
        own: Provided::new(|object: &GameObject, channel: &SpaceChannel| UserSelf {
            own: channel.user() == Some(object.id()),
        }),
    }
}

pub fn create_lobby(engine: &Engine) -> Result<Space, ModelError> {
    let root = LobbyTemplate {
        info: Arc::new(LobbyInfo {
            name: "Lobby".to_string(),
            background: engine.resources().find(BACKGROUND_RESOURCE, &[]),
        }),
        chat: ChatTemplate {
            chat: Arc::new(Chat {
                title: "General".to_string(),
            }),
        },
    }
    .instantiate(engine.ids().next())?;
    Ok(Space::new(engine.lobby_space_id(), root))
}

fn user_name(ctx: &DispatchContext, channel: &SpaceChannel, user: ObjectId) -> String {
    ctx.engine()
        .sessions()
        .get(channel.session_hash())
        .and_then(|session| session.properties().get("name").map(str::to_string))
        .unwrap_or_else(|| format!("guest{}", user))
}

async fn join(
    ctx: DispatchContext,
    event: Arc<ChannelAddedEvent>,
    _lobby: AllowUnloaded<LobbyNode>,
) -> Result<(), HandlerError> {
    let channel = &event.channel;
    let id = ctx.next_object_id();
    let user = user_template(user_name(&ctx, channel, id)).instantiate(id)?;
    ctx.space().add(Arc::clone(&user))?;
    channel.bind_user(user.id());

    let objects = ctx.space().objects();
    let shared = ctx.share(channel, &objects).await?;
    debug!("Shared {} lobby objects with channel {}", shared, channel.id());

    for other in ctx.remote_all().without(channel) {
        if let Err(e) = ctx.share(&other, &[Arc::clone(&user)]).await {
            warn!("Failed to share user {} with channel {}: {}", user.id(), other.id(), e);
        }
    }
    Ok(())
}

async fn leave(
    ctx: DispatchContext,
    event: Arc<ChannelRemovedEvent>,
    _lobby: LobbyNode,
) -> Result<(), HandlerError> {
    if let Some(user) = event.channel.user() {
        ctx.space().remove(user);
        debug!("User {} left the lobby", user);
    }
    Ok(())
}

pub struct LobbySystem;

impl System for LobbySystem {
    fn name(&self) -> &'static str {
        "lobby"
    }

    fn declare(&self, protocol: &mut ProtocolBuilder) -> Result<(), ProtocolError> {
        protocol
            .model::<LobbyInfo>()?
            .model::<Chat>()?
            .template::<LobbyTemplate>()?
            .template::<ChatTemplate>()?
            .model::<UserInfo>()?
            .model::<UserSelf>()?
            .template::<UserTemplate>()?;
        Ok(())
    }

    fn handlers(&self, dispatcher: &mut DispatcherBuilder) {
        dispatcher
            .on("lobby.join", join)
            .on("lobby.leave", leave);
    }

    fn spaces(&self, engine: &Engine) -> Result<Vec<Space>, ModelError> {
        Ok(vec![create_lobby(engine)?])
    }
}
