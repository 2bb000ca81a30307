//! Integration tests across the object model, dispatch and network layers
//!
//! Clients are simulated with in-process channels that acknowledge every
//! dependency load, except for the TCP tests which speak the real framing.

use server::channel::SpaceChannel;
use server::config::ServerConfig;
use server::dispatcher::DispatchContext;
use server::engine::Engine;
use server::event::{ClientEvent, ServerEvent};
use server::network::{read_frame, write_frame, Server};
use server::systems::battle::{
    spawn_tank, BattleFinishedEvent, BattleSystem, DamageEvent, Health, SetHealthEvent,
};
use server::systems::chat::{ChatShowMessagesEvent, SendMessageEvent};
use server::systems::default_systems;
use shared::{ControlCommand, HashRequest, InitSpace, ProtocolId, SpaceFrame, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn engine() -> Arc<Engine> {
    let mut builder = Engine::builder(ServerConfig::default());
    builder.systems(default_systems());
    builder.build().unwrap()
}

/// In-process client of one space channel
struct TestClient {
    channel: Arc<SpaceChannel>,
    frames: mpsc::UnboundedReceiver<SpaceFrame>,
}

impl TestClient {
    fn new(engine: &Arc<Engine>, space_id: i64) -> Self {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let (outbound, mut wire) = mpsc::unbounded_channel::<Vec<u8>>();
        let channel = Arc::new(engine.new_channel("no-session", space_id, addr, outbound));
        let (frames_tx, frames) = mpsc::unbounded_channel();

        let acker = Arc::clone(&channel);
        tokio::spawn(async move {
            while let Some(bytes) = wire.recv().await {
                let frame = SpaceFrame::decode(bytes).unwrap();
                if let SpaceFrame::LoadDependencies { callback_id, .. } = &frame {
                    acker.acknowledge(*callback_id);
                }
                if frames_tx.send(frame).is_err() {
                    break;
                }
            }
        });
        TestClient { channel, frames }
    }

    async fn join(engine: &Arc<Engine>, space_id: i64) -> Self {
        let client = Self::new(engine, space_id);
        engine.open_channel(Arc::clone(&client.channel)).await.unwrap();
        client
    }

    /// Body of the next event frame with `event_id`, skipping everything else
    async fn next_event(&mut self, event_id: ProtocolId) -> Vec<u8> {
        loop {
            let frame = timeout(WAIT, self.frames.recv()).await.unwrap().unwrap();
            if let SpaceFrame::Event { event_id: id, body, .. } = frame {
                if id == event_id {
                    return body;
                }
            }
        }
    }

    /// Every event id received so far
    async fn drain_events(&mut self) -> Vec<ProtocolId> {
        tokio::task::yield_now().await;
        let mut ids = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let SpaceFrame::Event { event_id, .. } = frame {
                ids.push(event_id);
            }
        }
        ids
    }

    fn context(&self, engine: &Arc<Engine>) -> DispatchContext {
        let space = engine.spaces().get(self.channel.space_id()).unwrap();
        engine.context(space, Some(Arc::clone(&self.channel)))
    }
}

/// OBJECT SHARING AND CHAT
mod lobby_tests {
    use super::*;

    /// Joining shares the lobby root and the joining user
    #[tokio::test]
    async fn join_shares_lobby_and_user() {
        let engine = engine();
        let client = TestClient::join(&engine, 1).await;

        let lobby = engine.spaces().get(1).unwrap();
        let user = client.channel.user().expect("user bound on join");
        assert!(client.channel.is_loaded(lobby.root().id()));
        assert!(client.channel.is_loaded(user));
        assert_eq!(lobby.len(), 2);
    }

    /// A later client sees earlier users, and earlier clients see the new one
    #[tokio::test]
    async fn users_are_shared_both_ways() {
        let engine = engine();
        let first = TestClient::join(&engine, 1).await;
        let second = TestClient::join(&engine, 1).await;

        let first_user = first.channel.user().unwrap();
        let second_user = second.channel.user().unwrap();
        assert!(second.channel.is_loaded(first_user));
        assert!(first.channel.is_loaded(second_user));
    }

    /// A chat message reaches every channel that has the chat loaded,
    /// the sender included
    #[tokio::test]
    async fn chat_message_reaches_every_loaded_channel() {
        let engine = engine();
        let mut alice = TestClient::join(&engine, 1).await;
        let mut bob = TestClient::join(&engine, 1).await;
        let chat = engine.spaces().get(1).unwrap().root();

        let payload = SpaceFrame::Event {
            event_id: SendMessageEvent::EVENT_ID,
            object_id: chat.id(),
            body: engine
                .protocol()
                .encode(&SendMessageEvent {
                    text: "hello".to_string(),
                })
                .unwrap(),
        }
        .encode()
        .unwrap();
        let ran = engine
            .dispatcher()
            .receive(&alice.context(&engine), payload)
            .await
            .unwrap();
        assert_eq!(ran, 1);

        let sender = alice.channel.user();
        for client in [&mut alice, &mut bob] {
            let body = client.next_event(ChatShowMessagesEvent::EVENT_ID).await;
            let event: ChatShowMessagesEvent = engine.protocol().decode(body).unwrap();
            assert_eq!(event.messages.len(), 1);
            let message = &event.messages[0];
            assert_eq!(message.text, "hello");
            assert!(!message.system);
            assert_eq!(
                message.source_user.as_ref().map(|user| user.user_id),
                sender
            );
        }
    }

    /// Too long messages fail validation and go nowhere
    #[tokio::test]
    async fn oversized_chat_message_is_rejected() {
        let engine = engine();
        let mut alice = TestClient::join(&engine, 1).await;
        let chat = engine.spaces().get(1).unwrap().root();

        let payload = SpaceFrame::Event {
            event_id: SendMessageEvent::EVENT_ID,
            object_id: chat.id(),
            body: engine
                .protocol()
                .encode(&SendMessageEvent {
                    text: "x".repeat(201),
                })
                .unwrap(),
        }
        .encode()
        .unwrap();
        let result = engine
            .dispatcher()
            .receive(&alice.context(&engine), payload)
            .await;
        assert!(result.is_err());
        assert!(!alice.drain_events().await.contains(&ChatShowMessagesEvent::EVENT_ID));
    }

    /// Events on objects the space does not hold are rejected
    #[tokio::test]
    async fn event_on_unknown_object_is_rejected() {
        let engine = engine();
        let alice = TestClient::join(&engine, 1).await;

        let payload = SpaceFrame::Event {
            event_id: SendMessageEvent::EVENT_ID,
            object_id: 999_999,
            body: engine
                .protocol()
                .encode(&SendMessageEvent {
                    text: "hi".to_string(),
                })
                .unwrap(),
        }
        .encode()
        .unwrap();
        let err = engine
            .dispatcher()
            .receive(&alice.context(&engine), payload)
            .await
            .unwrap_err();
        assert!(!err.is_protocol_error());
    }

    /// Closing a channel removes its user for everyone else
    #[tokio::test]
    async fn leaving_removes_user() {
        let engine = engine();
        let first = TestClient::join(&engine, 1).await;
        let lobby = engine.spaces().get(1).unwrap();
        let user = first.channel.user().unwrap();
        assert!(lobby.object(user).is_some());

        engine.close_channel(Arc::clone(&first.channel)).await.unwrap();
        assert!(lobby.object(user).is_none());
        assert!(lobby.channels().is_empty());
    }
}

/// BATTLE SCENARIOS
mod battle_tests {
    use super::*;

    /// Negative damage changes nothing and sends nothing
    #[tokio::test]
    async fn negative_damage_is_ignored() {
        let engine = engine();
        let lobby = engine.spaces().get(1).unwrap();
        let tank = spawn_tank(&lobby, engine.ids(), 1, 100.0, None).unwrap();
        let mut client = TestClient::join(&engine, 1).await;
        assert!(client.channel.is_loaded(tank.id()));

        let ctx = engine.context(Arc::clone(&lobby), None);
        let result = ctx.schedule(DamageEvent { amount: -5.0 }, Arc::clone(&tank)).await;
        assert!(result.is_err());
        assert_eq!(tank.get::<Health>().unwrap().current, 100.0);
        assert!(!client.drain_events().await.contains(&SetHealthEvent::EVENT_ID));

        ctx.schedule(DamageEvent { amount: 10.0 }, Arc::clone(&tank))
            .await
            .unwrap();
        let body = client.next_event(SetHealthEvent::EVENT_ID).await;
        let event: SetHealthEvent = engine.protocol().decode(body).unwrap();
        assert_eq!(event.health, 90.0);
    }

    /// Destroying one of two tanks finishes the battle for the survivor
    #[tokio::test]
    async fn last_tank_standing_wins() {
        let engine = engine();
        let lobby = engine.spaces().get(1).unwrap();
        let loser = spawn_tank(&lobby, engine.ids(), 7, 50.0, None).unwrap();
        let winner = spawn_tank(&lobby, engine.ids(), 7, 50.0, None).unwrap();
        // another battle, must not count
        spawn_tank(&lobby, engine.ids(), 8, 50.0, None).unwrap();
        let mut client = TestClient::join(&engine, 1).await;

        let ctx = engine.context(Arc::clone(&lobby), None);
        ctx.schedule(DamageEvent { amount: 80.0 }, Arc::clone(&loser))
            .await
            .unwrap();

        let body = client.next_event(BattleFinishedEvent::EVENT_ID).await;
        let finished: BattleFinishedEvent = engine.protocol().decode(body).unwrap();
        assert_eq!(finished.battle_id, 7);
        assert_eq!(finished.winner, Some(winner.id()));
    }

    /// Client events never cross into another space
    #[tokio::test]
    async fn channels_are_isolated_by_space() {
        let mut builder = Engine::builder(ServerConfig::default());
        builder.systems(default_systems()).space(server::space::Space::new(
            9,
            Arc::new(server::object::GameObject::new(0, 0, "Battlefield")),
        ));
        let engine = builder.build().unwrap();
        let mut lobby_client = TestClient::join(&engine, 1).await;

        let battlefield = engine.spaces().get(9).unwrap();
        let tank = spawn_tank(&battlefield, engine.ids(), 1, 100.0, None).unwrap();
        let ctx = engine.context(Arc::clone(&battlefield), None);

        assert!(battlefield.loaded_channels(tank.id()).is_empty());
        let targets = engine.spaces().get(1).unwrap().all_channels();
        let delivered = ctx.send(&SetHealthEvent { health: 1.0 }, &tank, targets);
        assert_eq!(delivered, 0);
        assert!(lobby_client.drain_events().await.is_empty());
    }
}

/// STARTUP AND CHANNEL LIFECYCLE
mod lifecycle_tests {
    use super::*;

    shared::wire_struct! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Armor {
            pub value: i32,
        }
    }
    server::model!(Armor = 1301);

    /// Two types claiming one protocol id stop the engine from starting
    #[test]
    fn duplicate_protocol_id_fails_startup() {
        let mut builder = Engine::builder(ServerConfig::default());
        builder.protocol().model::<Armor>().unwrap();
        builder.system(BattleSystem);

        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            server::error::StartupError::Protocol(server::error::ProtocolError::DuplicateId {
                id: 1301,
                ..
            })
        ));
    }

    /// A join stuck on its dependency load ends when the channel closes
    #[tokio::test]
    async fn closing_releases_dependency_waiter() {
        let engine = engine();
        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let (outbound, mut wire) = mpsc::unbounded_channel();
        let channel = Arc::new(engine.new_channel("no-session", 1, addr, outbound));

        let opening = {
            let engine = Arc::clone(&engine);
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { engine.open_channel(channel).await })
        };

        let frame = timeout(WAIT, wire.recv()).await.unwrap().unwrap();
        assert!(matches!(
            SpaceFrame::decode(frame).unwrap(),
            SpaceFrame::LoadDependencies { .. }
        ));
        channel.close();

        let result = timeout(WAIT, opening).await.unwrap().unwrap();
        assert!(result.is_err());
    }
}

/// REAL NETWORK TESTS
mod network_tests {
    use super::*;

    async fn start() -> (Arc<Engine>, SocketAddr) {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let mut builder = Engine::builder(config);
        builder.systems(default_systems());
        let engine = builder.build().unwrap();
        let server = Server::bind(Arc::clone(&engine)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (engine, addr)
    }

    async fn read_command(engine: &Engine, stream: &mut TcpStream) -> ControlCommand {
        let frame = timeout(WAIT, read_frame(stream, 1 << 20))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        engine.protocol().decode(frame).unwrap()
    }

    async fn read_space_frame(stream: &mut TcpStream) -> SpaceFrame {
        let frame = timeout(WAIT, read_frame(stream, 1 << 20))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        SpaceFrame::decode(frame).unwrap()
    }

    /// Full handshake: control connection, then a space connection that
    /// receives the lobby after acknowledging its dependencies
    #[tokio::test]
    async fn handshake_and_lobby_share() {
        let (engine, addr) = start().await;

        let mut control = TcpStream::connect(addr).await.unwrap();
        let hello = ControlCommand::HashRequest(HashRequest::new().with("name", "alice"));
        write_frame(&mut control, &engine.protocol().encode(&hello).unwrap())
            .await
            .unwrap();

        let ControlCommand::HashResponse(response) = read_command(&engine, &mut control).await
        else {
            panic!("expected HashResponse");
        };
        let ControlCommand::OpenSpace(open) = read_command(&engine, &mut control).await else {
            panic!("expected OpenSpace");
        };
        assert_eq!(open.space_id, 1);

        let mut space = TcpStream::connect(addr).await.unwrap();
        let init = ControlCommand::InitSpace(InitSpace {
            hash: response.hash.clone(),
            space_id: 1,
        });
        write_frame(&mut space, &engine.protocol().encode(&init).unwrap())
            .await
            .unwrap();

        let SpaceFrame::LoadDependencies {
            callback_id,
            classes,
            ..
        } = read_space_frame(&mut space).await
        else {
            panic!("expected LoadDependencies");
        };
        assert!(classes.contains(&1000));
        assert!(classes.contains(&1100));
        let ack = SpaceFrame::DependenciesLoaded { callback_id }.encode().unwrap();
        write_frame(&mut space, &ack).await.unwrap();

        let mut templates = Vec::new();
        let mut user_models = Vec::new();
        while templates.len() < 2 {
            if let SpaceFrame::ObjectShare {
                template_id,
                models,
                ..
            } = read_space_frame(&mut space).await
            {
                templates.push(template_id);
                if template_id == 1100 {
                    user_models = engine.protocol().decode_models(models).unwrap();
                }
            }
        }
        templates.sort();
        assert_eq!(templates, vec![1000, 1100]);
        let name = Value::Struct(vec![Value::String("alice".to_string())]);
        assert!(user_models.contains(&(1101, name)));
        assert!(user_models.contains(&(1102, Value::Struct(vec![Value::Bool(true)]))));
    }

    /// InitSpace with a hash the server never issued closes the connection
    #[tokio::test]
    async fn unknown_hash_is_rejected() {
        let (engine, addr) = start().await;

        let mut space = TcpStream::connect(addr).await.unwrap();
        let init = ControlCommand::InitSpace(InitSpace {
            hash: "0".repeat(64),
            space_id: 1,
        });
        write_frame(&mut space, &engine.protocol().encode(&init).unwrap())
            .await
            .unwrap();

        let closed = timeout(WAIT, read_frame(&mut space, 1 << 20)).await.unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
        assert_eq!(engine.spaces().get(1).unwrap().channels().len(), 0);
    }

    /// Closing the control connection ends the session
    #[tokio::test]
    async fn control_close_ends_session() {
        let (engine, addr) = start().await;

        let mut control = TcpStream::connect(addr).await.unwrap();
        let hello = ControlCommand::HashRequest(HashRequest::new());
        write_frame(&mut control, &engine.protocol().encode(&hello).unwrap())
            .await
            .unwrap();
        read_command(&engine, &mut control).await;
        assert_eq!(engine.sessions().len(), 1);

        drop(control);
        timeout(WAIT, async {
            while !engine.sessions().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// A closed space connection leaves its session and its space
    #[tokio::test]
    async fn space_close_releases_channel() {
        let (engine, addr) = start().await;

        let mut control = TcpStream::connect(addr).await.unwrap();
        let hello = ControlCommand::HashRequest(HashRequest::new());
        write_frame(&mut control, &engine.protocol().encode(&hello).unwrap())
            .await
            .unwrap();
        let ControlCommand::HashResponse(response) = read_command(&engine, &mut control).await
        else {
            panic!("expected HashResponse");
        };
        read_command(&engine, &mut control).await;

        let mut space = TcpStream::connect(addr).await.unwrap();
        let init = ControlCommand::InitSpace(InitSpace {
            hash: response.hash.clone(),
            space_id: 1,
        });
        write_frame(&mut space, &engine.protocol().encode(&init).unwrap())
            .await
            .unwrap();
        let frame = read_space_frame(&mut space).await;
        assert_eq!(frame.kind(), shared::frame::LOAD_DEPENDENCIES);

        let session = engine.sessions().get(&response.hash).unwrap();
        assert_eq!(session.channels().len(), 1);

        let lobby = engine.spaces().get(1).unwrap();
        drop(space);
        timeout(WAIT, async {
            while !session.channels().is_empty() || !lobby.channels().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(engine.sessions().len(), 1);
    }
}
