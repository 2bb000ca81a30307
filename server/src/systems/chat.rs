//! Lobby chat
//!
//! A client sends [`SendMessageEvent`] on a chat object; every channel that
//! has the chat loaded, the sender's included, receives the message in a
//! [`ChatShowMessagesEvent`].

use super::System;
use crate::dispatcher::{DispatchContext, DispatcherBuilder};
use crate::error::{HandlerError, ProtocolError};
use crate::node::ChannelUser;
use crate::protocol::ProtocolBuilder;
use crate::systems::lobby::UserNode;
use crate::{client_event, model, node, server_event, template};
use log::debug;
use shared::wire_struct;
use std::sync::Arc;

pub const MAX_MESSAGE_LENGTH: usize = 200;

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Chat {
        pub title: String,
    }
}
model!(Chat = 1201);

template! {
    pub struct ChatTemplate(1200) {
        pub chat: Arc<Chat>,
    }
}

node! {
    pub struct ChatNode match ChatTemplate {
        pub chat: Arc<Chat>,
    }
}

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatUser {
        pub user_id: i64,
        pub name: String,
    }
}

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatMessage {
        pub source_user: Option<ChatUser>,
        pub text: String,
        pub system: bool,
    }
}

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct SendMessageEvent {
        pub text: String,
    }
}
server_event!(SendMessageEvent = 1210);

wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct ChatShowMessagesEvent {
        pub messages: Vec<ChatMessage>,
    }
}
client_event!(ChatShowMessagesEvent = 1211);

fn validate(text: &str) -> Result<&str, HandlerError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HandlerError::validation("empty chat message"));
    }
    if text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(HandlerError::validation(format!(
            "chat message longer than {} characters",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(text)
}

async fn send_message(
    ctx: DispatchContext,
    event: Arc<SendMessageEvent>,
    (chat, user): (ChatNode, ChannelUser<UserNode>),
) -> Result<(), HandlerError> {
    let text = validate(&event.text)?;
    let message = ChatMessage {
        source_user: Some(ChatUser {
            user_id: user.0.object.id(),
            name: user.0.info.name.clone(),
        }),
        text: text.to_string(),
        system: false,
    };

    let delivered = ctx.send(
        &ChatShowMessagesEvent {
            messages: vec![message],
        },
        &chat.object,
        ctx.remote(&chat.object),
    );
    debug!(
        "Chat message from user {} delivered to {} channels",
        user.0.object.id(),
        delivered
    );
    Ok(())
}

pub struct ChatSystem;

impl System for ChatSystem {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn declare(&self, protocol: &mut ProtocolBuilder) -> Result<(), ProtocolError> {
        protocol
            .model::<Chat>()?
            .template::<ChatTemplate>()?
            .wire_struct::<ChatUser>()?
            .wire_struct::<ChatMessage>()?
            .server_event::<SendMessageEvent>()?
            .client_event::<ChatShowMessagesEvent>()?;
        Ok(())
    }

    fn handlers(&self, dispatcher: &mut DispatcherBuilder) {
        dispatcher.on("chat.send_message", send_message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_trims_and_limits() {
        assert_eq!(validate("  hello ").unwrap(), "hello");
        assert!(validate("   ").is_err());
        assert!(validate(&"x".repeat(MAX_MESSAGE_LENGTH)).is_ok());
        assert!(validate(&"x".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_declare_builds() {
        let mut protocol = ProtocolBuilder::new();
        ChatSystem.declare(&mut protocol).unwrap();
        let protocol = protocol.build().unwrap();

        let event = ChatShowMessagesEvent {
            messages: vec![ChatMessage {
                source_user: None,
                text: "hi".to_string(),
                system: true,
            }],
        };
        let bytes = protocol.encode(&event).unwrap();
        // count, absent user, sorted fields: source_user, system, text
        assert_eq!(bytes, vec![1, 0, 1, 2, b'h', b'i']);
        assert_eq!(protocol.decode::<ChatShowMessagesEvent>(bytes).unwrap(), event);
    }
}
