//! Sessions and the control channel
//!
//! A session is one client's stay on the server. It starts when the control
//! connection's hash request is accepted and ends when that connection
//! closes. Space connections join a session by presenting its hash for a
//! space the session was asked to open.

use crate::channel::{ChannelId, SpaceChannel};
use crate::error::ChannelError;
use crate::protocol::Protocol;
use crate::space::SpaceId;
use crate::utils::{generate_session_hash, lock, read, write};
use log::{debug, info};
use shared::{ControlCommand, HashRequest, HashResponse, OpenSpace};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

pub struct Session {
    hash: String,
    addr: SocketAddr,
    encryption_enabled: bool,
    properties: HashRequest,
    control: mpsc::UnboundedSender<Vec<u8>>,
    opening: Mutex<HashSet<SpaceId>>,
    channels: Mutex<Vec<Arc<SpaceChannel>>>,
}

impl Session {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption_enabled
    }

    pub fn properties(&self) -> &HashRequest {
        &self.properties
    }

    pub fn send_command(
        &self,
        protocol: &Protocol,
        command: &ControlCommand,
    ) -> Result<(), ChannelError> {
        let frame = protocol.encode(command)?;
        self.control.send(frame).map_err(|_| ChannelError::Closed)
    }

    /// Asks the client to open a connection for `space`
    pub fn open_space(&self, protocol: &Protocol, space: SpaceId) -> Result<(), ChannelError> {
        lock(&self.opening).insert(space);
        self.send_command(protocol, &ControlCommand::OpenSpace(OpenSpace { space_id: space }))
    }

    pub fn is_opening(&self, space: SpaceId) -> bool {
        lock(&self.opening).contains(&space)
    }

    fn take_opening(&self, space: SpaceId) -> bool {
        lock(&self.opening).remove(&space)
    }

    pub fn add_channel(&self, channel: Arc<SpaceChannel>) {
        lock(&self.channels).push(channel);
    }

    /// Forgets a channel whose connection ended
    pub fn remove_channel(&self, id: ChannelId) {
        lock(&self.channels).retain(|channel| channel.id() != id);
    }

    pub fn channels(&self) -> Vec<Arc<SpaceChannel>> {
        lock(&self.channels).clone()
    }

    /// Closes every space channel of the session
    pub fn close(&self) {
        for channel in lock(&self.channels).drain(..) {
            channel.close();
        }
        debug!("Session {} closed", self.hash);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("hash", &self.hash)
            .field("addr", &self.addr)
            .field("encryption_enabled", &self.encryption_enabled)
            .finish()
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    encryption_enabled: bool,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, encryption_enabled: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            encryption_enabled,
        }
    }

    pub fn create(
        &self,
        addr: SocketAddr,
        properties: HashRequest,
        control: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<Arc<Session>, ChannelError> {
        let mut sessions = write(&self.sessions);
        if sessions.len() >= self.max_sessions {
            return Err(ChannelError::SessionLimit {
                max: self.max_sessions,
            });
        }

        let session = Arc::new(Session {
            hash: generate_session_hash(),
            addr,
            encryption_enabled: self.encryption_enabled,
            properties,
            control,
            opening: Mutex::new(HashSet::new()),
            channels: Mutex::new(Vec::new()),
        });
        sessions.insert(session.hash.clone(), Arc::clone(&session));
        info!("Session established for {} ({} active)", addr, sessions.len());
        Ok(session)
    }

    pub fn get(&self, hash: &str) -> Option<Arc<Session>> {
        read(&self.sessions).get(hash).cloned()
    }

    pub fn remove(&self, hash: &str) -> Option<Arc<Session>> {
        write(&self.sessions).remove(hash)
    }

    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.sessions).is_empty()
    }

    /// Validates an InitSpace: the hash must name a live session that is
    /// opening `space`
    pub fn init_space(&self, hash: &str, space: SpaceId) -> Result<Arc<Session>, ChannelError> {
        let session = self
            .get(hash)
            .ok_or_else(|| ChannelError::Protocol("unknown session hash".to_string()))?;
        if !session.take_opening(space) {
            return Err(ChannelError::Protocol(format!(
                "space {} is not opening for this session",
                space
            )));
        }
        Ok(session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Unauthenticated,
    Established,
}

/// Server side of one control connection
#[derive(Debug)]
pub struct ControlChannel {
    addr: SocketAddr,
    state: ControlState,
    session: Option<Arc<Session>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ControlChannel {
    pub fn new(addr: SocketAddr, outbound: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            addr,
            state: ControlState::Unauthenticated,
            session: None,
            outbound,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Applies one command from the client
    ///
    /// The first command must be a hash request. It is answered with the
    /// session hash, followed by an OpenSpace for the lobby.
    pub fn handle(
        &mut self,
        command: ControlCommand,
        sessions: &SessionRegistry,
        protocol: &Protocol,
        lobby: SpaceId,
    ) -> Result<(), ChannelError> {
        match (self.state, command) {
            (ControlState::Unauthenticated, ControlCommand::HashRequest(request)) => {
                let session = sessions.create(self.addr, request, self.outbound.clone())?;
                session.send_command(
                    protocol,
                    &ControlCommand::HashResponse(HashResponse {
                        hash: session.hash().to_string(),
                        encryption_enabled: session.encryption_enabled(),
                    }),
                )?;
                session.open_space(protocol, lobby)?;
                self.state = ControlState::Established;
                self.session = Some(session);
                Ok(())
            }
            (ControlState::Unauthenticated, other) => Err(ChannelError::Protocol(format!(
                "expected HashRequest, got {}",
                other.name()
            ))),
            (ControlState::Established, other) => Err(ChannelError::Protocol(format!(
                "unexpected {} on an established control channel",
                other.name()
            ))),
        }
    }

    /// Ends the session, closing its space channels
    pub fn close(&mut self, sessions: &SessionRegistry) {
        if let Some(session) = self.session.take() {
            sessions.remove(session.hash());
            session.close();
            info!("Session for {} ended", self.addr);
        }
    }
}
