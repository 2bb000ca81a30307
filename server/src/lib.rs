//! # Game Server Library
//!
//! The authoritative server of a multiplayer tank game. Clients hold one
//! control connection plus one connection per space they have open; the
//! server owns every object and pushes the parts each client may see.
//!
//! ## Object Model
//!
//! ### Objects (`object`)
//! A [`GameObject`](object::GameObject) is an id, a template id and a set of
//! components keyed by type. Components that are also models travel to
//! clients; a component slot may hold one shared value or a provider that
//! computes a value per receiving channel.
//!
//! ### Templates and Nodes (`template`, `node`)
//! Templates declare the components an object starts with and instantiate
//! it. Nodes are typed views over an existing object; handlers ask for nodes
//! and the dispatcher adapts the event's object to them, skipping handlers
//! whose nodes do not match.
//!
//! ## Runtime
//!
//! ### Spaces and Channels (`space`, `channel`)
//! A space is an isolated set of objects with a root. Every client connection
//! into a space is a [`SpaceChannel`](channel::SpaceChannel) that tracks which
//! objects it has loaded and negotiates class and resource dependencies
//! before sharing new objects.
//!
//! ### Protocol and Dispatch (`protocol`, `dispatcher`, `event`)
//! Systems register their wire types, models, templates and events with the
//! protocol at startup. Internal events are scheduled directly, server events
//! arrive from clients, client events are encoded per recipient.
//!
//! ### Sessions (`session`)
//! The control connection's hash handshake creates a session; space
//! connections present the hash to join it.
//!
//! ### Network (`network`)
//! TCP listener with length-prefixed frames, one task per connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::engine::Engine;
//! use server::network::Server;
//! use server::systems::default_systems;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = Engine::builder(ServerConfig::default());
//!     builder.systems(default_systems());
//!     let engine = builder.build()?;
//!
//!     Server::bind(engine).await?.run().await;
//!     Ok(())
//! }
//! ```

pub use shared;

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod network;
pub mod node;
pub mod object;
pub mod protocol;
pub mod session;
pub mod space;
pub mod systems;
pub mod template;
pub mod utils;
