//! Relay between the Discord channel and the XMPP room.
//!
//! Discord messages arrive through the serenity event handler and are pushed
//! through [`Relay::handle_discord_message`]. Room events are drained by
//! [`run_xmpp_to_discord`] on its own task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::filter::{FilterDirection, MessageFilter};
use super::formatter::{format_discord_message, format_xmpp_message, FormatStyle, XmppIdentity};
use super::ports::{ChannelSink, GroupchatSink, MessageLookup};
use crate::common::error::{ProtocolError, RelayError};
use crate::common::{DiscordMessage, XmppEvent};
use crate::config::Config;
use crate::protocol::xmpp::jid;

/// Read-only relay settings shared by both directions.
#[derive(Debug, Clone)]
pub struct Relay {
    guild: u64,
    channel: u64,
    room: String,
    identity: XmppIdentity,
    style: FormatStyle,
    filter: MessageFilter,
}

impl Relay {
    pub fn new(config: &Config) -> Self {
        let style = config
            .relay
            .as_ref()
            .and_then(|r| r.style.as_deref())
            .and_then(FormatStyle::from_str)
            .unwrap_or_default();

        let filter = MessageFilter::from_config(config.filters.as_ref());
        if filter.has_patterns() {
            info!("Message filters enabled");
        }

        Self {
            guild: config.discord.guild,
            channel: config.discord.channel,
            room: config.xmpp.room.clone(),
            identity: XmppIdentity {
                nick: config.xmpp.nick.clone(),
                account: config.xmpp.account.clone(),
            },
            style,
            filter,
        }
    }

    pub fn channel(&self) -> u64 {
        self.channel
    }

    /// Whether a Discord message should be relayed at all.
    pub fn admits_discord(&self, msg: &DiscordMessage, own_id: u64) -> bool {
        msg.author_id != own_id && msg.guild_id == Some(self.guild) && msg.channel_id == self.channel
    }

    /// Relay one Discord message into the room.
    ///
    /// Messages that are not admitted or are filtered count as success.
    pub async fn handle_discord_message(
        &self,
        msg: &DiscordMessage,
        own_id: u64,
        lookup: &dyn MessageLookup,
        sink: &dyn GroupchatSink,
    ) -> Result<(), RelayError> {
        if !self.admits_discord(msg, own_id) {
            return Ok(());
        }

        let text = format_discord_message(msg, lookup, self.style).await?;
        if self.filter.should_filter(FilterDirection::DiscordToXmpp, &text) {
            info!("FILTERED Discord -> XMPP: {}", text);
            return Ok(());
        }

        info!("Discord -> XMPP: {}", text);
        sink.send_groupchat(&self.room, &text)
            .await
            .map_err(RelayError::XmppSend)
    }

    /// Relay one room event into the Discord channel.
    pub async fn handle_xmpp_event(
        &self,
        event: XmppEvent,
        sink: &dyn ChannelSink,
    ) -> Result<(), RelayError> {
        let chat = match event {
            XmppEvent::Chat(chat) => chat,
            XmppEvent::Presence(_) => return Ok(()),
            XmppEvent::Unhandled { name } => {
                debug!("Ignoring <{}/> stanza", name);
                return Ok(());
            }
        };

        if !jid::same_bare(&chat.from, &self.room) {
            debug!("Ignoring message from outside the room: {}", chat.from);
            return Ok(());
        }

        let Some(text) = format_xmpp_message(&chat, &self.identity) else {
            return Ok(());
        };
        if self.filter.should_filter(FilterDirection::XmppToDiscord, &text) {
            info!("FILTERED XMPP -> Discord: {}", text);
            return Ok(());
        }

        info!("XMPP -> Discord: {}", text);
        sink.send_text(&text).await.map_err(RelayError::DiscordSend)
    }
}

/// Drain room events into Discord until the event channel closes.
pub async fn run_xmpp_to_discord(
    relay: Arc<Relay>,
    mut events: mpsc::UnboundedReceiver<Result<XmppEvent, ProtocolError>>,
    sink: Arc<dyn ChannelSink>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Ok(event) => {
                if let Err(e) = relay.handle_xmpp_event(event, sink.as_ref()).await {
                    error!("Dropping message from XMPP: {}", e);
                }
            }
            Err(e) => warn!("Skipping unreadable stanza: {}", e),
        }
    }
    debug!("XMPP event stream ended");
}
