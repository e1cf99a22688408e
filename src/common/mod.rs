//! Common utilities and types shared across the application.

pub mod error;
pub mod messages;

pub use messages::{
    ChatMessage, DiscordMessage, MessageKind, OutgoingGroupchat, PresenceKind, PresenceUpdate,
    ReferencedMessage, ReplyTarget, ResolvedReply, XmppEvent,
};
