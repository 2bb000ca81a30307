//! Space channels: one client's view of one space
//!
//! A channel owns the outbound queue of its connection and remembers which
//! objects, classes and resources it has already sent. Objects reach a client
//! only through [`SpaceChannel::share`], which first makes sure the client
//! has loaded every class and resource the objects need.

use crate::error::ChannelError;
use crate::object::{GameObject, ObjectId};
use crate::protocol::Protocol;
use crate::space::SpaceId;
use crate::utils::{lock, read, write};
use log::{debug, warn};
use shared::{ProtocolId, SpaceFrame};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};

pub type ChannelId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Initialized,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Dependency {
    Class(ProtocolId),
    Resource(i64),
}

impl Dependency {
    fn split(dependencies: &[Dependency]) -> (Vec<ProtocolId>, Vec<i64>) {
        let mut classes = Vec::new();
        let mut resources = Vec::new();
        for dependency in dependencies {
            match dependency {
                Dependency::Class(id) => classes.push(*id),
                Dependency::Resource(id) => resources.push(*id),
            }
        }
        (classes, resources)
    }
}

// (to request, loads of other shares to wait for, completion of the request)
type LoadPlan = (
    Vec<Dependency>,
    Vec<watch::Receiver<bool>>,
    Option<watch::Sender<bool>>,
);

pub struct SpaceChannel {
    id: ChannelId,
    session_hash: String,
    space_id: SpaceId,
    addr: SocketAddr,
    closed: AtomicBool,
    close_notify: Notify,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    // only grows while the channel is open
    loaded: RwLock<HashSet<ObjectId>>,
    // requested classes and resources; the flag turns true once acknowledged
    dependencies: Mutex<HashMap<Dependency, watch::Receiver<bool>>>,
    pending: Mutex<HashMap<i32, oneshot::Sender<()>>>,
    next_callback: AtomicI32,
    user: RwLock<Option<ObjectId>>,
    dependency_timeout: Option<Duration>,
}

impl SpaceChannel {
    pub fn new(
        id: ChannelId,
        session_hash: impl Into<String>,
        space_id: SpaceId,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            id,
            session_hash: session_hash.into(),
            space_id,
            addr,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            outbound,
            loaded: RwLock::new(HashSet::new()),
            dependencies: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_callback: AtomicI32::new(1),
            user: RwLock::new(None),
            dependency_timeout: None,
        }
    }

    /// A channel not backed by a connection; frames land in the returned
    /// receiver
    pub fn detached(
        id: ChannelId,
        space_id: SpaceId,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let channel = Self::new(id, format!("detached-{}", id), space_id, addr, tx);
        (Arc::new(channel), rx)
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn session_hash(&self) -> &str {
        &self.session_hash
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::Acquire) {
            ChannelState::Closed
        } else {
            ChannelState::Initialized
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Initialized
    }

    /// Closes the channel and releases every task waiting on the client
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // dropping the senders wakes the waiters with an error
        lock(&self.pending).clear();
        self.close_notify.notify_waiters();
        debug!("Space channel {} closed", self.id);
    }

    /// Resolves once the channel is closed
    pub async fn closed(&self) {
        let notified = self.close_notify.notified();
        if !self.is_open() {
            return;
        }
        notified.await;
    }

    pub fn is_loaded(&self, object: ObjectId) -> bool {
        read(&self.loaded).contains(&object)
    }

    pub fn loaded_count(&self) -> usize {
        read(&self.loaded).len()
    }

    pub fn user(&self) -> Option<ObjectId> {
        *read(&self.user)
    }

    pub fn bind_user(&self, user: ObjectId) {
        *write(&self.user) = Some(user);
    }

    /// Queues one encoded frame for the connection writer
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        self.outbound.send(frame).map_err(|_| ChannelError::Closed)
    }

    /// Completes a pending dependency load; false for unknown callback ids
    pub fn acknowledge(&self, callback_id: i32) -> bool {
        match lock(&self.pending).remove(&callback_id) {
            Some(waiter) => waiter.send(()).is_ok(),
            None => {
                warn!(
                    "Channel {} acknowledged unknown callback {}",
                    self.id, callback_id
                );
                false
            }
        }
    }

    fn register_callback(&self) -> Result<(i32, oneshot::Receiver<()>), ChannelError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = lock(&self.pending);
        // checked under the lock so close() cannot miss this waiter
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let callback_id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        pending.insert(callback_id, tx);
        Ok((callback_id, rx))
    }

    /// Splits `wanted` into dependencies this share must request itself and
    /// loads already in flight for another share
    ///
    /// Requested ids are marked in flight before returning, so a concurrent
    /// share waits on them instead of sending its objects early.
    fn plan(&self, wanted: &[Dependency]) -> LoadPlan {
        let mut dependencies = lock(&self.dependencies);
        let mut missing = Vec::new();
        let mut in_flight = Vec::new();
        for dependency in wanted {
            match dependencies.get(dependency) {
                Some(loaded) if *loaded.borrow() => {}
                // the share that requested it is gone
                Some(loaded) if loaded.has_changed().is_err() => missing.push(*dependency),
                Some(loaded) => in_flight.push(loaded.clone()),
                None => missing.push(*dependency),
            }
        }
        if missing.is_empty() {
            return (missing, in_flight, None);
        }

        let (done, loaded) = watch::channel(false);
        for dependency in &missing {
            dependencies.insert(*dependency, loaded.clone());
        }
        (missing, in_flight, Some(done))
    }

    /// Makes sure the client has loaded every dependency in `wanted`
    async fn load_dependencies(&self, wanted: &[Dependency]) -> Result<(), ChannelError> {
        loop {
            let (missing, in_flight, done) = self.plan(wanted);
            if let Some(done) = done {
                let (classes, resources) = Dependency::split(&missing);
                debug!(
                    "Channel {} loading {} classes, {} resources",
                    self.id,
                    classes.len(),
                    resources.len()
                );
                if let Err(e) = self.await_dependencies(classes, resources).await {
                    let mut dependencies = lock(&self.dependencies);
                    for dependency in &missing {
                        dependencies.remove(dependency);
                    }
                    return Err(e);
                }
                done.send_replace(true);
            }

            // a failed load of another share leaves its ids unrequested
            let mut failed = false;
            for mut loaded in in_flight {
                while !*loaded.borrow_and_update() {
                    if loaded.changed().await.is_err() {
                        failed = true;
                        break;
                    }
                }
            }
            if !failed {
                return Ok(());
            }
            if !self.is_open() {
                return Err(ChannelError::Closed);
            }
        }
    }

    async fn await_dependencies(
        &self,
        classes: Vec<ProtocolId>,
        resources: Vec<i64>,
    ) -> Result<(), ChannelError> {
        let (callback_id, waiter) = self.register_callback()?;
        let frame = SpaceFrame::LoadDependencies {
            callback_id,
            classes,
            resources,
        };
        self.send_frame(frame.encode()?)?;

        match self.dependency_timeout {
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(result) => result.map_err(|_| ChannelError::Closed),
                Err(_) => {
                    lock(&self.pending).remove(&callback_id);
                    Err(ChannelError::DependencyTimeout(limit))
                }
            },
            None => waiter.await.map_err(|_| ChannelError::Closed),
        }
    }

    /// Sends objects this channel has not loaded yet
    ///
    /// Missing classes and resources go out first as one LoadDependencies
    /// frame; the objects follow once the client acknowledges it. Returns the
    /// number of objects shared.
    pub async fn share(
        &self,
        protocol: &Protocol,
        objects: &[Arc<GameObject>],
    ) -> Result<usize, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }

        let mut seen = HashSet::new();
        let objects: Vec<&Arc<GameObject>> = objects
            .iter()
            .filter(|object| !self.is_loaded(object.id()) && seen.insert(object.id()))
            .collect();
        if objects.is_empty() {
            return Ok(0);
        }

        let mut seen = HashSet::new();
        let mut dependencies = Vec::new();
        let mut frames = Vec::with_capacity(objects.len());
        for object in &objects {
            let models = object.models_for(self);
            let mut resources = Vec::new();
            let mut classes = vec![object.template_id()];
            for model in &models {
                classes.push(model.id);
                model.value.collect_resources(&mut resources);
            }
            dependencies.extend(
                classes
                    .into_iter()
                    .map(Dependency::Class)
                    .chain(resources.into_iter().map(Dependency::Resource))
                    .filter(|dependency| seen.insert(*dependency)),
            );
            frames.push(protocol.share_frame(object, &models)?);
        }

        self.load_dependencies(&dependencies).await?;

        for frame in frames {
            self.send_frame(frame)?;
        }
        write(&self.loaded).extend(objects.iter().map(|object| object.id()));
        Ok(objects.len())
    }
}

impl std::fmt::Debug for SpaceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceChannel")
            .field("id", &self.id)
            .field("space", &self.space_id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}

/// A set of recipient channels
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    channels: Vec<Arc<SpaceChannel>>,
}

impl ChannelSet {
    pub fn new(channels: Vec<Arc<SpaceChannel>>) -> Self {
        Self { channels }
    }

    /// Every channel except `excluded`
    pub fn without(mut self, excluded: &SpaceChannel) -> Self {
        self.channels.retain(|channel| channel.id() != excluded.id());
        self
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.iter().any(|channel| channel.id() == id)
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|channel| channel.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SpaceChannel>> {
        self.channels.iter()
    }
}

impl IntoIterator for ChannelSet {
    type Item = Arc<SpaceChannel>;
    type IntoIter = std::vec::IntoIter<Arc<SpaceChannel>>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model;
    use crate::protocol::ProtocolBuilder;
    use shared::{frame, wire_struct, ResourceRef};
    use tokio_test::{assert_err, assert_ok};

    wire_struct! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Skin {
            pub texture: ResourceRef,
        }
    }
    model!(Skin = 501);

    fn protocol() -> Protocol {
        let mut builder = ProtocolBuilder::new();
        builder.model::<Skin>().unwrap();
        builder.build().unwrap()
    }

    fn skinned(id: ObjectId) -> Arc<GameObject> {
        let object = GameObject::new(id, 600, "Skinned");
        object
            .add(Skin {
                texture: ResourceRef::new(77, 1),
            })
            .unwrap();
        Arc::new(object)
    }

    fn callback_of(frame: Vec<u8>) -> i32 {
        match SpaceFrame::decode(frame).unwrap() {
            SpaceFrame::LoadDependencies { callback_id, .. } => callback_id,
            other => panic!("expected LoadDependencies, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_share_waits_for_dependencies() {
        let protocol = protocol();
        let (channel, mut rx) = SpaceChannel::detached(1, 1);
        let objects = vec![skinned(10)];

        let sharing = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.share(&protocol, &objects).await })
        };

        let load = rx.recv().await.unwrap();
        match SpaceFrame::decode(load.clone()).unwrap() {
            SpaceFrame::LoadDependencies {
                classes, resources, ..
            } => {
                assert_eq!(classes, vec![600, 501]);
                assert_eq!(resources, vec![77]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(!channel.is_loaded(10));
        assert!(channel.acknowledge(callback_of(load)));

        assert_eq!(assert_ok!(sharing.await.unwrap()), 1);
        let share = rx.recv().await.unwrap();
        assert_eq!(share[0], frame::OBJECT_SHARE);
        assert!(channel.is_loaded(10));
    }

    #[tokio::test]
    async fn test_known_dependencies_are_not_resent() {
        let protocol = Arc::new(protocol());
        let (channel, mut rx) = SpaceChannel::detached(1, 1);

        let first = {
            let (channel, protocol) = (Arc::clone(&channel), Arc::clone(&protocol));
            tokio::spawn(async move { channel.share(&protocol, &[skinned(10)]).await })
        };
        let load = rx.recv().await.unwrap();
        channel.acknowledge(callback_of(load));
        assert_ok!(first.await.unwrap());
        rx.recv().await.unwrap();

        // same classes and resources: straight to ObjectShare
        assert_eq!(channel.share(&protocol, &[skinned(11)]).await.unwrap(), 1);
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame[0], frame::OBJECT_SHARE);

        // already loaded objects are skipped
        assert_eq!(channel.share(&protocol, &[skinned(11)]).await.unwrap(), 0);
        assert_eq!(channel.loaded_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_share_waits_for_inflight_dependencies() {
        let protocol = Arc::new(protocol());
        let (channel, mut rx) = SpaceChannel::detached(1, 1);

        let first = {
            let (channel, protocol) = (Arc::clone(&channel), Arc::clone(&protocol));
            tokio::spawn(async move { channel.share(&protocol, &[skinned(10)]).await })
        };
        let load = rx.recv().await.unwrap();

        let second = {
            let (channel, protocol) = (Arc::clone(&channel), Arc::clone(&protocol));
            tokio::spawn(async move { channel.share(&protocol, &[skinned(11)]).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // no second request and no object before the acknowledgment
        assert!(rx.try_recv().is_err());
        assert!(!second.is_finished());
        assert!(!channel.is_loaded(11));

        assert!(channel.acknowledge(callback_of(load)));
        assert_eq!(assert_ok!(first.await.unwrap()), 1);
        assert_eq!(assert_ok!(second.await.unwrap()), 1);
        for _ in 0..2 {
            assert_eq!(rx.recv().await.unwrap()[0], frame::OBJECT_SHARE);
        }
        assert_eq!(channel.loaded_count(), 2);
    }

    #[tokio::test]
    async fn test_timed_out_dependencies_are_requested_again() {
        let protocol = Arc::new(protocol());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let channel = Arc::new(
            SpaceChannel::new(1, "hash", 1, addr, tx)
                .with_dependency_timeout(Duration::from_millis(50)),
        );

        let result = channel.share(&protocol, &[skinned(10)]).await;
        assert!(matches!(result, Err(ChannelError::DependencyTimeout(_))));
        assert_eq!(rx.recv().await.unwrap()[0], frame::LOAD_DEPENDENCIES);

        let retry = {
            let (channel, protocol) = (Arc::clone(&channel), Arc::clone(&protocol));
            tokio::spawn(async move { channel.share(&protocol, &[skinned(10)]).await })
        };
        let load = rx.recv().await.unwrap();
        match SpaceFrame::decode(load.clone()).unwrap() {
            SpaceFrame::LoadDependencies {
                classes, resources, ..
            } => {
                assert_eq!(classes, vec![600, 501]);
                assert_eq!(resources, vec![77]);
            }
            other => panic!("expected LoadDependencies, got {:?}", other),
        }
        assert!(channel.acknowledge(callback_of(load)));

        assert_eq!(assert_ok!(retry.await.unwrap()), 1);
        assert_eq!(rx.recv().await.unwrap()[0], frame::OBJECT_SHARE);
    }

    #[tokio::test]
    async fn test_close_releases_pending_waiters() {
        let protocol = protocol();
        let (channel, mut rx) = SpaceChannel::detached(1, 1);

        let sharing = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.share(&protocol, &[skinned(10)]).await })
        };
        rx.recv().await.unwrap();
        channel.close();

        let result = sharing.await.unwrap();
        assert!(matches!(assert_err!(result), ChannelError::Closed));
        assert!(!channel.is_loaded(10));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_dependency_timeout() {
        let protocol = protocol();
        let (tx, _rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let channel = SpaceChannel::new(1, "hash", 1, addr, tx)
            .with_dependency_timeout(Duration::from_millis(20));

        let result = channel.share(&protocol, &[skinned(10)]).await;
        assert!(matches!(result, Err(ChannelError::DependencyTimeout(_))));
        assert!(!channel.acknowledge(1));
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let (channel, _rx) = SpaceChannel::detached(3, 1);
        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.closed().await })
        };
        tokio::task::yield_now().await;
        channel.close();
        assert_ok!(waiter.await);
        assert!(matches!(
            channel.send_frame(vec![1]),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn test_channel_set_without_sender() {
        let (first, _rx1) = SpaceChannel::detached(1, 1);
        let (second, _rx2) = SpaceChannel::detached(2, 1);
        let set = ChannelSet::new(vec![Arc::clone(&first), second]);
        let others = set.without(&first);
        assert_eq!(others.ids(), vec![2]);
        assert!(!others.contains(1));
    }
}
