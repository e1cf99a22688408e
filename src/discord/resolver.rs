//! Discord markup resolution.
//!
//! Text leaving Discord has its mention and custom emoji markup replaced with
//! readable names, since the room has no way to render `<@123>`. Text arriving
//! from the room can have `:shortcode:` emoji resolved and markdown escaped.

use std::collections::HashMap;

use fancy_regex::{Captures, Regex};
use serenity::cache::Cache;
use serenity::model::id::{ChannelId, RoleId};

/// Resolves Discord markup in both directions.
#[derive(Debug, Clone)]
pub struct MessageResolver {
    /// `<@123>` or `<@!123>`
    mention_pattern: Regex,
    /// `<#123>`
    channel_pattern: Regex,
    /// `<@&123>`
    role_pattern: Regex,
    /// `<:name:id>` or `<a:name:id>`
    emoji_pattern: Regex,
    enable_markdown: bool,
    resolve_emojis: bool,
}

impl Default for MessageResolver {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl MessageResolver {
    pub fn new(enable_markdown: bool, resolve_emojis: bool) -> Self {
        Self {
            mention_pattern: Regex::new(r"<@!?(\d+)>").unwrap(),
            channel_pattern: Regex::new(r"<#(\d+)>").unwrap(),
            role_pattern: Regex::new(r"<@&(\d+)>").unwrap(),
            emoji_pattern: Regex::new(r"<a?:([a-zA-Z0-9_]+):\d+>").unwrap(),
            enable_markdown,
            resolve_emojis,
        }
    }

    /// Replace user mentions with `@name` using the names carried by the message.
    ///
    /// Unknown ids are left untouched.
    pub fn resolve_user_mentions(&self, message: &str, names: &HashMap<u64, String>) -> String {
        self.mention_pattern
            .replace_all(message, |caps: &Captures| -> String {
                caps[1]
                    .parse::<u64>()
                    .ok()
                    .and_then(|id| names.get(&id))
                    .map(|name| format!("@{}", name))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }

    /// Replace channel mentions with `#name` from the cache.
    pub fn resolve_channel_mentions(&self, message: &str, cache: &Cache) -> String {
        self.channel_pattern
            .replace_all(message, |caps: &Captures| -> String {
                if let Ok(id) = caps[1].parse::<u64>() {
                    let channel_id = ChannelId::new(id);
                    for guild_id in cache.guilds() {
                        if let Some(guild) = cache.guild(guild_id) {
                            if let Some(channel) = guild.channels.get(&channel_id) {
                                return format!("#{}", channel.name);
                            }
                        }
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// Replace role mentions with `@role` from the cache.
    pub fn resolve_role_mentions(&self, message: &str, cache: &Cache) -> String {
        self.role_pattern
            .replace_all(message, |caps: &Captures| -> String {
                if let Ok(id) = caps[1].parse::<u64>() {
                    for guild_id in cache.guilds() {
                        if let Some(guild) = cache.guild(guild_id) {
                            if let Some(role) = guild.roles.get(&RoleId::new(id)) {
                                return format!("@{}", role.name);
                            }
                        }
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// `<:name:id>` becomes `:name:`.
    pub fn resolve_custom_emojis_to_text(&self, message: &str) -> String {
        self.emoji_pattern.replace_all(message, ":$1:").to_string()
    }

    /// Turn Discord markup into plain text for the room.
    pub fn process_discord_to_xmpp(
        &self,
        message: &str,
        mention_names: &HashMap<u64, String>,
        cache: &Cache,
    ) -> String {
        let text = self.resolve_role_mentions(message, cache);
        let text = self.resolve_user_mentions(&text, mention_names);
        let text = self.resolve_channel_mentions(&text, cache);
        self.resolve_custom_emojis_to_text(&text)
    }

    /// Prepare room text for posting to Discord.
    pub fn process_xmpp_to_discord(&self, message: &str, cache: &Cache) -> String {
        let text = if self.resolve_emojis {
            resolve_shortcodes(message, &custom_emoji_map(cache))
        } else {
            message.to_string()
        };
        self.escape_discord_markdown(&text)
    }

    /// Escape Discord markdown unless markdown is enabled.
    pub fn escape_discord_markdown(&self, message: &str) -> String {
        if self.enable_markdown {
            return message.to_string();
        }
        message
            .replace('\\', "\\\\")
            .replace('`', "\\`")
            .replace('*', "\\*")
            .replace('_', "\\_")
            .replace('~', "\\~")
            .replace('|', "\\|")
    }
}

/// Lowercased custom emoji name to its `<:name:id>` form, across cached guilds.
fn custom_emoji_map(cache: &Cache) -> HashMap<String, String> {
    cache
        .guilds()
        .iter()
        .filter_map(|guild_id| cache.guild(*guild_id))
        .flat_map(|guild| {
            guild
                .emojis
                .iter()
                .map(|(id, emoji)| {
                    (
                        emoji.name.to_lowercase(),
                        format!("<:{}:{}>", emoji.name, id),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Replace `:shortcode:` with a guild emoji or, failing that, a Unicode emoji.
///
/// Unknown shortcodes and stray colons are kept as written.
pub fn resolve_shortcodes(message: &str, custom: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != ':' {
            result.push(ch);
            continue;
        }

        let mut shortcode = String::new();
        let mut closed = false;
        while let Some(&next) = chars.peek() {
            if next == ':' {
                closed = true;
                break;
            } else if next.is_alphanumeric() || matches!(next, '_' | '-' | '+') {
                shortcode.push(next);
                chars.next();
            } else {
                break;
            }
        }

        if !closed || shortcode.is_empty() {
            // The colon that stopped the scan may open the next shortcode
            result.push(':');
            result.push_str(&shortcode);
            continue;
        }

        let lower = shortcode.to_lowercase();
        if let Some(replacement) = custom.get(&lower) {
            chars.next();
            result.push_str(replacement);
        } else if let Some(emoji) = emojis::get_by_shortcode(&lower) {
            chars.next();
            result.push_str(emoji.as_str());
        } else {
            result.push(':');
            result.push_str(&shortcode);
        }
    }

    result
}
