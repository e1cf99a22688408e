//! Transport boundaries used by the relay.
//!
//! The Discord and XMPP transports implement these so the relay and the
//! formatters can be driven by fakes in tests.

use async_trait::async_trait;

use crate::common::error::{ConnectionResult, DiscordResult};
use crate::common::ReferencedMessage;

/// Read access to Discord history and channel metadata.
#[async_trait]
pub trait MessageLookup: Send + Sync {
    async fn fetch_message(&self, channel_id: u64, message_id: u64)
        -> DiscordResult<ReferencedMessage>;

    async fn fetch_channel_name(&self, channel_id: u64) -> DiscordResult<String>;
}

/// Posts text into the relayed Discord channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send_text(&self, text: &str) -> DiscordResult<()>;
}

/// Posts groupchat messages into an XMPP room.
#[async_trait]
pub trait GroupchatSink: Send + Sync {
    async fn send_groupchat(&self, room: &str, text: &str) -> ConnectionResult<()>;
}
