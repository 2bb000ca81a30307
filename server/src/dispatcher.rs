//! Event dispatch
//!
//! Handlers are registered per event type together with the node parameter
//! they need. Dispatching an event on an object runs, in registration order,
//! every handler whose parameter resolves; the rest are skipped, except
//! mandatory handlers, which turn a failed match into an error. Handlers run
//! on the dispatching task and may await, schedule further events or send
//! client events.

use crate::channel::{ChannelSet, SpaceChannel};
use crate::engine::Engine;
use crate::error::{ChannelError, DispatchError, HandlerError, ModelError};
use crate::event::{ClientEvent, Event, ServerEvent};
use crate::node::{NodeParam, ResolveContext};
use crate::object::{GameObject, ObjectId};
use crate::protocol::Protocol;
use crate::space::Space;
use crate::utils::short_type_name;
use futures::future::BoxFuture;
use log::{debug, error, warn};
use shared::SpaceFrame;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

type InvokeFn<E> =
    dyn Fn(DispatchContext, Arc<E>, &Arc<GameObject>) -> Result<HandlerFuture, ModelError>
        + Send
        + Sync;

struct Handler<E> {
    name: &'static str,
    mandatory: bool,
    invoke: Box<InvokeFn<E>>,
}

#[derive(Default)]
pub struct DispatcherBuilder {
    // TypeId::of::<E>() -> Vec<Handler<E>>
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    count: usize,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler that is skipped when its node does not resolve
    pub fn on<E, N, F, Fut>(&mut self, name: &'static str, handler: F) -> &mut Self
    where
        E: Event,
        N: NodeParam,
        F: Fn(DispatchContext, Arc<E>, N) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(name, false, handler)
    }

    /// Registers a handler whose node must resolve for every dispatched event
    pub fn on_mandatory<E, N, F, Fut>(&mut self, name: &'static str, handler: F) -> &mut Self
    where
        E: Event,
        N: NodeParam,
        F: Fn(DispatchContext, Arc<E>, N) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(name, true, handler)
    }

    fn register<E, N, F, Fut>(
        &mut self,
        name: &'static str,
        mandatory: bool,
        handler: F,
    ) -> &mut Self
    where
        E: Event,
        N: NodeParam,
        F: Fn(DispatchContext, Arc<E>, N) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let invoke = move |ctx: DispatchContext,
                           event: Arc<E>,
                           object: &Arc<GameObject>|
              -> Result<HandlerFuture, ModelError> {
            let node = N::resolve(&ctx.resolve_context(object))?;
            let future: HandlerFuture = Box::pin(handler(ctx, event, node));
            Ok(future)
        };

        let handlers = self
            .handlers
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<Handler<E>>::new()));
        if let Some(handlers) = handlers.downcast_mut::<Vec<Handler<E>>>() {
            handlers.push(Handler {
                name,
                mandatory,
                invoke: Box::new(invoke),
            });
            self.count += 1;
        }
        self
    }

    pub fn build(self) -> EventDispatcher {
        debug!("Dispatcher built with {} handlers", self.count);
        EventDispatcher {
            handlers: self.handlers,
        }
    }
}

pub struct EventDispatcher {
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventDispatcher {
    fn handlers<E: Event>(&self) -> &[Handler<E>] {
        self.handlers
            .get(&TypeId::of::<E>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<Handler<E>>>())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn handler_names<E: Event>(&self) -> Vec<&'static str> {
        self.handlers::<E>().iter().map(|handler| handler.name).collect()
    }

    /// Runs the handlers of `E` on `object`; returns how many ran
    ///
    /// The first failing handler stops the dispatch.
    pub async fn dispatch<E: Event>(
        &self,
        ctx: &DispatchContext,
        event: E,
        object: Arc<GameObject>,
    ) -> Result<usize, DispatchError> {
        let event_name = short_type_name::<E>();
        let event = Arc::new(event);
        let mut ran = 0;

        for handler in self.handlers::<E>() {
            let future = match (handler.invoke)(ctx.clone(), Arc::clone(&event), &object) {
                Ok(future) => future,
                Err(source) if handler.mandatory => {
                    return Err(DispatchError::NodeMismatch {
                        handler: handler.name,
                        event: event_name,
                        source,
                    });
                }
                Err(reason) => {
                    debug!(
                        "Skipping {} for {} on object {}: {}",
                        handler.name,
                        event_name,
                        object.id(),
                        reason
                    );
                    continue;
                }
            };

            future.await.map_err(|source| DispatchError::Handler {
                handler: handler.name,
                event: event_name,
                source,
            })?;
            ran += 1;
        }

        Ok(ran)
    }

    /// Handles one client frame of a space channel
    ///
    /// Events are decoded against the protocol and dispatched with the
    /// channel as sender; dependency acknowledgments complete the pending
    /// load. Objects share and load requests only travel server to client.
    pub async fn receive(
        &self,
        ctx: &DispatchContext,
        payload: Vec<u8>,
    ) -> Result<usize, DispatchError> {
        match SpaceFrame::decode(payload)? {
            SpaceFrame::Event {
                event_id,
                object_id,
                body,
            } => {
                let entry = ctx
                    .protocol()
                    .server_event(event_id)
                    .ok_or(DispatchError::UnknownEvent(event_id))?;
                let object = ctx
                    .space()
                    .object(object_id)
                    .ok_or(DispatchError::UnknownObject(object_id))?;
                debug!("Received {} on object {}", entry.name, object_id);
                (entry.receive)(ctx.clone(), object, body).await
            }
            SpaceFrame::DependenciesLoaded { callback_id } => {
                if let Some(channel) = ctx.sender() {
                    channel.acknowledge(callback_id);
                }
                Ok(0)
            }
            other => Err(DispatchError::UnexpectedFrame(other.kind())),
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("event_types", &self.handlers.len())
            .finish()
    }
}

pub(crate) fn receive_event<E: ServerEvent>(
    ctx: DispatchContext,
    object: Arc<GameObject>,
    body: Vec<u8>,
) -> BoxFuture<'static, Result<usize, DispatchError>> {
    Box::pin(async move {
        let event = ctx.protocol().decode::<E>(body)?;
        ctx.schedule(event, object).await
    })
}

/// What a handler sees of the server: the space it runs in and the channel
/// the event came from, if any
#[derive(Clone)]
pub struct DispatchContext {
    engine: Arc<Engine>,
    space: Arc<Space>,
    sender: Option<Arc<SpaceChannel>>,
}

impl DispatchContext {
    pub fn new(engine: Arc<Engine>, space: Arc<Space>, sender: Option<Arc<SpaceChannel>>) -> Self {
        Self {
            engine,
            space,
            sender,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn protocol(&self) -> &Protocol {
        self.engine.protocol()
    }

    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    pub fn sender(&self) -> Option<&Arc<SpaceChannel>> {
        self.sender.as_ref()
    }

    pub fn next_object_id(&self) -> ObjectId {
        self.engine.ids().next()
    }

    fn resolve_context<'a>(&'a self, object: &'a Arc<GameObject>) -> ResolveContext<'a> {
        ResolveContext::new(object, &self.space, self.sender.as_ref())
    }

    /// Dispatches an internal event on the current task
    pub async fn schedule<E: Event>(
        &self,
        event: E,
        object: Arc<GameObject>,
    ) -> Result<usize, DispatchError> {
        self.engine.dispatcher().dispatch(self, event, object).await
    }

    /// Open channels of this space that have `object` loaded
    pub fn remote(&self, object: &GameObject) -> ChannelSet {
        self.space.loaded_channels(object.id())
    }

    /// Every open channel of this space
    pub fn remote_all(&self) -> ChannelSet {
        self.space.all_channels()
    }

    /// Sends a client event about `object` to each target
    ///
    /// Targets from other spaces are ignored, as are targets without the
    /// object loaded unless the event allows it. Returns how many channels
    /// the event was queued on.
    pub fn send<E: ClientEvent>(
        &self,
        event: &E,
        object: &GameObject,
        targets: ChannelSet,
    ) -> usize {
        let frame = match self.protocol().event_frame(event, object.id()) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {}: {}", short_type_name::<E>(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        for channel in targets {
            if channel.space_id() != self.space.id() {
                continue;
            }
            if !E::ALLOW_UNLOADED && !channel.is_loaded(object.id()) {
                continue;
            }
            match channel.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to deliver {} to channel {}: {}",
                    short_type_name::<E>(),
                    channel.id(),
                    e
                ),
            }
        }
        delivered
    }

    /// Shares objects with one channel of this space
    pub async fn share(
        &self,
        channel: &SpaceChannel,
        objects: &[Arc<GameObject>],
    ) -> Result<usize, ChannelError> {
        channel.share(self.protocol(), objects).await
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("space", &self.space.id())
            .field("sender", &self.sender.as_ref().map(|channel| channel.id()))
            .finish()
    }
}
