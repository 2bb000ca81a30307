//! Game features built on the runtime
//!
//! Each system declares its wire types, registers its handlers and may
//! create spaces when the engine starts.

pub mod battle;
pub mod chat;
pub mod lobby;

use crate::dispatcher::DispatcherBuilder;
use crate::engine::Engine;
use crate::error::{ModelError, ProtocolError};
use crate::protocol::ProtocolBuilder;
use crate::space::Space;

pub use battle::BattleSystem;
pub use chat::ChatSystem;
pub use lobby::LobbySystem;

pub trait System: Send + Sync {
    fn name(&self) -> &'static str;

    fn declare(&self, protocol: &mut ProtocolBuilder) -> Result<(), ProtocolError>;

    fn handlers(&self, dispatcher: &mut DispatcherBuilder);

    /// Spaces that exist from startup
    fn spaces(&self, _engine: &Engine) -> Result<Vec<Space>, ModelError> {
        Ok(Vec::new())
    }
}

/// Every system the server binary runs, in handler registration order
pub fn default_systems() -> Vec<Box<dyn System>> {
    vec![
        Box::new(LobbySystem),
        Box::new(ChatSystem),
        Box::new(BattleSystem),
    ]
}
