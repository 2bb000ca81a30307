//! TCP transport: control and space connections
//!
//! Every frame on the wire is a big-endian `u32` length followed by the
//! payload. The first frame of a connection decides its role: a hash request
//! starts a control connection, an InitSpace binds the connection to a space
//! channel of an existing session.

use crate::channel::SpaceChannel;
use crate::engine::Engine;
use crate::error::{ChannelError, StartupError};
use crate::session::ControlChannel;
use crate::space::Space;
use log::{debug, error, info, warn};
use shared::frame::DEPENDENCIES_LOADED;
use shared::{ControlCommand, InitSpace, SpaceFrame};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Reads one length-prefixed frame; `None` on a clean close between frames
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Vec<u8>>, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let length = match reader.read_u32().await {
        Ok(length) => length as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if length > max_frame_size {
        return Err(ChannelError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            length, max_frame_size
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u32(length).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Accepts connections and runs each one on its own task
pub struct Server {
    engine: Arc<Engine>,
    listener: TcpListener,
}

impl Server {
    pub async fn bind(engine: Arc<Engine>) -> Result<Self, StartupError> {
        let listener = TcpListener::bind(engine.config().bind_address()).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Server { engine, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Runs the accept loop until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    tokio::spawn(handle_connection(Arc::clone(&self.engine), stream, addr));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(engine: Arc<Engine>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    let (mut reader, writer) = stream.into_split();
    let (outbound, queue) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, queue, addr));

    let config = engine.config();
    let first = tokio::time::timeout(
        config.handshake_timeout(),
        read_frame(&mut reader, config.max_frame_size),
    )
    .await;
    let first = match first {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            debug!("Connection {} closed before its first frame", addr);
            return;
        }
        Ok(Err(e)) => {
            warn!("Bad first frame from {}: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!(
                "Connection {} sent nothing within {:?}, dropping it",
                addr,
                config.handshake_timeout()
            );
            return;
        }
    };

    let result = match engine.protocol().decode::<ControlCommand>(first) {
        Ok(ControlCommand::InitSpace(init)) => {
            run_space(&engine, reader, outbound, addr, init).await
        }
        Ok(command) => run_control(&engine, reader, outbound, addr, command).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => debug!("Connection {} closed", addr),
        Err(e @ ChannelError::SessionLimit { .. }) => warn!("Rejected {}: {}", addr, e),
        Err(e) if e.is_protocol_error() => warn!("Protocol error from {}: {}", addr, e),
        Err(e) => error!("Connection {} failed: {}", addr, e),
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    addr: SocketAddr,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("Failed to write to {}: {}", addr, e);
            break;
        }
    }
}

async fn run_control(
    engine: &Arc<Engine>,
    mut reader: OwnedReadHalf,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    addr: SocketAddr,
    first: ControlCommand,
) -> Result<(), ChannelError> {
    let mut control = ControlChannel::new(addr, outbound);
    let result = control_loop(engine, &mut reader, &mut control, first).await;
    control.close(engine.sessions());
    result
}

async fn control_loop(
    engine: &Engine,
    reader: &mut OwnedReadHalf,
    control: &mut ControlChannel,
    first: ControlCommand,
) -> Result<(), ChannelError> {
    let lobby = engine.lobby_space_id();
    control.handle(first, engine.sessions(), engine.protocol(), lobby)?;

    while let Some(frame) = read_frame(reader, engine.config().max_frame_size).await? {
        let command = engine.protocol().decode::<ControlCommand>(frame)?;
        control.handle(command, engine.sessions(), engine.protocol(), lobby)?;
    }
    Ok(())
}

async fn run_space(
    engine: &Arc<Engine>,
    mut reader: OwnedReadHalf,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    addr: SocketAddr,
    init: InitSpace,
) -> Result<(), ChannelError> {
    let session = engine.sessions().init_space(&init.hash, init.space_id)?;
    let space = engine
        .spaces()
        .get(init.space_id)
        .ok_or_else(|| ChannelError::Protocol(format!("unknown space {}", init.space_id)))?;
    let channel = Arc::new(engine.new_channel(session.hash(), space.id(), addr, outbound));
    session.add_channel(Arc::clone(&channel));

    let (inbound, queue) = mpsc::unbounded_channel();
    let worker = tokio::spawn(channel_worker(
        Arc::clone(engine),
        space,
        Arc::clone(&channel),
        queue,
    ));

    let result = space_read_loop(engine, &mut reader, &channel, inbound).await;

    // waiters are released before the worker is joined
    channel.close();
    session.remove_channel(channel.id());
    if let Err(e) = worker.await {
        error!("Worker of channel {} panicked: {}", channel.id(), e);
    }
    if let Err(e) = engine.close_channel(Arc::clone(&channel)).await {
        error!("Closing channel {} failed: {}", channel.id(), e);
    }
    result
}

async fn space_read_loop(
    engine: &Engine,
    reader: &mut OwnedReadHalf,
    channel: &SpaceChannel,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<(), ChannelError> {
    let max_frame_size = engine.config().max_frame_size;
    loop {
        let payload = tokio::select! {
            frame = read_frame(reader, max_frame_size) => match frame? {
                Some(payload) => payload,
                None => return Ok(()),
            },
            _ = channel.closed() => return Ok(()),
        };

        // acknowledged here, the worker may be blocked on this very load
        if payload.first() == Some(&DEPENDENCIES_LOADED) {
            if let SpaceFrame::DependenciesLoaded { callback_id } = SpaceFrame::decode(payload)? {
                channel.acknowledge(callback_id);
            }
            continue;
        }
        if inbound.send(payload).is_err() {
            return Ok(());
        }
    }
}

/// Opens the channel in its space, then dispatches client frames in order
async fn channel_worker(
    engine: Arc<Engine>,
    space: Arc<Space>,
    channel: Arc<SpaceChannel>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    if let Err(e) = engine.open_channel(Arc::clone(&channel)).await {
        error!("Opening channel {} failed: {}", channel.id(), e);
    }

    let ctx = engine.context(space, Some(Arc::clone(&channel)));
    while let Some(payload) = queue.recv().await {
        match engine.dispatcher().receive(&ctx, payload).await {
            Ok(ran) => debug!("Channel {} frame ran {} handlers", channel.id(), ran),
            Err(e) if e.is_protocol_error() => {
                warn!("Protocol error on channel {}: {}", channel.id(), e);
                channel.close();
                break;
            }
            Err(e) => error!("Event on channel {} failed: {}", channel.id(), e),
        }
    }
}
