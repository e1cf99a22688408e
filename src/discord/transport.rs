//! Serenity-backed implementations of the relay ports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::builder::{CreateAllowedMentions, CreateMessage};
use serenity::cache::Cache;
use serenity::http::{Http, HttpBuilder};
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, MessageId};
use tracing::debug;

use crate::bridge::formatter::split_message;
use crate::bridge::ports::{ChannelSink, MessageLookup};
use crate::common::error::{DiscordError, DiscordResult};
use crate::common::ReferencedMessage;
use crate::discord::resolver::MessageResolver;

/// Discord rejects messages longer than this.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// HTTP client with explicit timeouts so a stalled request cannot hang a relay.
pub fn build_http(token: &str) -> anyhow::Result<Http> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(HttpBuilder::new(token).client(client).build())
}

/// Name shown for a message author: server nickname, then global name, then username.
pub fn display_name(msg: &Message) -> String {
    msg.member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone())
}

/// Usernames of the users mentioned in a message, keyed by id.
pub fn mention_names(msg: &Message) -> HashMap<u64, String> {
    msg.mentions
        .iter()
        .map(|user| (user.id.get(), user.name.clone()))
        .collect()
}

/// Message and channel lookups through the cache and REST API.
#[derive(Clone)]
pub struct DiscordLookup {
    http: Arc<Http>,
    cache: Arc<Cache>,
    resolver: Arc<MessageResolver>,
}

impl DiscordLookup {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, resolver: Arc<MessageResolver>) -> Self {
        Self {
            http,
            cache,
            resolver,
        }
    }

    fn cached_channel_name(&self, channel_id: ChannelId) -> Option<String> {
        self.cache.guilds().into_iter().find_map(|guild_id| {
            self.cache
                .guild(guild_id)
                .and_then(|guild| guild.channels.get(&channel_id).map(|c| c.name.clone()))
        })
    }
}

#[async_trait]
impl MessageLookup for DiscordLookup {
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> DiscordResult<ReferencedMessage> {
        let channel = ChannelId::new(channel_id);
        let message = match channel.message(&self.http, MessageId::new(message_id)).await {
            Ok(message) => message,
            Err(serenity::Error::Http(e)) if e.status_code().map(|s| s.as_u16()) == Some(404) => {
                return Err(DiscordError::MessageNotFound {
                    channel_id,
                    message_id,
                })
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ReferencedMessage {
            channel_id: message.channel_id.get(),
            author_display_name: display_name(&message),
            author_handle: message.author.name.clone(),
            body: self.resolver.process_discord_to_xmpp(
                &message.content,
                &mention_names(&message),
                &self.cache,
            ),
        })
    }

    async fn fetch_channel_name(&self, channel_id: u64) -> DiscordResult<String> {
        let channel_id = ChannelId::new(channel_id);
        if let Some(name) = self.cached_channel_name(channel_id) {
            return Ok(name);
        }

        debug!("Channel {} not cached, fetching", channel_id);
        channel_id
            .to_channel(&self.http)
            .await?
            .guild()
            .map(|channel| channel.name)
            .ok_or(DiscordError::UnnamedChannel {
                channel_id: channel_id.get(),
            })
    }
}

/// The relayed Discord channel as a send target.
#[derive(Clone)]
pub struct DiscordChannel {
    http: Arc<Http>,
    cache: Arc<Cache>,
    channel_id: ChannelId,
    resolver: Arc<MessageResolver>,
}

impl DiscordChannel {
    pub fn new(
        http: Arc<Http>,
        cache: Arc<Cache>,
        channel_id: u64,
        resolver: Arc<MessageResolver>,
    ) -> Self {
        Self {
            http,
            cache,
            channel_id: ChannelId::new(channel_id),
            resolver,
        }
    }
}

#[async_trait]
impl ChannelSink for DiscordChannel {
    async fn send_text(&self, text: &str) -> DiscordResult<()> {
        let text = self.resolver.process_xmpp_to_discord(text, &self.cache);

        for chunk in split_message(&text, DISCORD_MESSAGE_LIMIT) {
            // Room users cannot ping Discord users or roles
            let message = CreateMessage::new()
                .content(chunk)
                .allowed_mentions(CreateAllowedMentions::new());
            self.channel_id.send_message(&self.http, message).await?;
        }
        Ok(())
    }
}
