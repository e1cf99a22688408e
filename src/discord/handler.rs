//! Discord gateway event handling.
//!
//! Every message the bot can see is turned into a [`DiscordMessage`] and
//! handed to the relay, which decides whether it belongs in the room.

use std::sync::Arc;

use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::guild::Guild;
use serenity::prelude::*;
use tracing::{debug, error, info};

use crate::bridge::Relay;
use crate::common::{DiscordMessage, ReplyTarget};
use crate::discord::resolver::MessageResolver;
use crate::discord::transport::{display_name, mention_names, DiscordLookup};
use crate::muc::XmppHandle;

/// Serenity event handler feeding the Discord to XMPP direction.
pub struct RelayHandler {
    relay: Arc<Relay>,
    xmpp: XmppHandle,
    resolver: Arc<MessageResolver>,
}

impl RelayHandler {
    pub fn new(relay: Arc<Relay>, xmpp: XmppHandle, resolver: Arc<MessageResolver>) -> Self {
        Self {
            relay,
            xmpp,
            resolver,
        }
    }

    fn to_discord_message(&self, ctx: &Context, msg: &Message) -> DiscordMessage {
        let reply_target = msg.message_reference.as_ref().and_then(|reference| {
            reference.message_id.map(|message_id| ReplyTarget {
                channel_id: reference.channel_id.get(),
                message_id: message_id.get(),
            })
        });

        DiscordMessage {
            guild_id: msg.guild_id.map(|id| id.get()),
            channel_id: msg.channel_id.get(),
            author_id: msg.author.id.get(),
            author_display_name: display_name(msg),
            author_handle: msg.author.name.clone(),
            body: self
                .resolver
                .process_discord_to_xmpp(&msg.content, &mention_names(msg), &ctx.cache),
            reply_target,
        }
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        let own_id = ctx.cache.current_user().id.get();
        let message = self.to_discord_message(&ctx, &msg);

        if !self.relay.admits_discord(&message, own_id) {
            return;
        }
        if message.body.trim().is_empty() {
            debug!("Skipping Discord message {} without text", msg.id);
            return;
        }

        let lookup = DiscordLookup::new(ctx.http.clone(), ctx.cache.clone(), self.resolver.clone());
        if let Err(e) = self
            .relay
            .handle_discord_message(&message, own_id, &lookup, &self.xmpp)
            .await
        {
            error!("Dropping Discord message {}: {}", msg.id, e);
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let channel = serenity::model::id::ChannelId::new(self.relay.channel());
        match guild.channels.get(&channel) {
            Some(ch) => info!("Relaying #{} in '{}'", ch.name, guild.name),
            None => debug!("Guild '{}' does not contain the relayed channel", guild.name),
        }
    }
}
