//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `PARLOR_DISCORD_TOKEN` - Discord bot token
//! - `PARLOR_DISCORD_GUILD` - Discord server ID
//! - `PARLOR_DISCORD_CHANNEL` - Relayed Discord channel ID
//! - `PARLOR_XMPP_ACCOUNT` - XMPP account JID
//! - `PARLOR_XMPP_PASSWORD` - XMPP account password
//! - `PARLOR_XMPP_SERVER` - XMPP server `host[:port]`
//! - `PARLOR_XMPP_ROOM` - MUC room JID
//! - `PARLOR_XMPP_NICK` - Nickname in the room

use std::env;

use tracing::warn;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "PARLOR";

/// Apply environment variable overrides to a config.
///
/// This allows sensitive values like tokens and passwords to be
/// provided via environment variables instead of the config file.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |name| env::var(name).ok())
}

fn apply_overrides_from(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    let var = |suffix: &str| lookup(&format!("{}_{}", ENV_PREFIX, suffix));

    // Discord
    if let Some(token) = var("DISCORD_TOKEN") {
        config.discord.token = token;
    }
    if let Some(guild) = var("DISCORD_GUILD") {
        match guild.parse() {
            Ok(id) => config.discord.guild = id,
            Err(_) => warn!("Ignoring {}_DISCORD_GUILD: not a numeric id", ENV_PREFIX),
        }
    }
    if let Some(channel) = var("DISCORD_CHANNEL") {
        match channel.parse() {
            Ok(id) => config.discord.channel = id,
            Err(_) => warn!("Ignoring {}_DISCORD_CHANNEL: not a numeric id", ENV_PREFIX),
        }
    }

    // XMPP
    if let Some(account) = var("XMPP_ACCOUNT") {
        config.xmpp.account = account;
    }
    if let Some(password) = var("XMPP_PASSWORD") {
        config.xmpp.password = password;
    }
    if let Some(server) = var("XMPP_SERVER") {
        config.xmpp.server = server;
    }
    if let Some(room) = var("XMPP_ROOM") {
        config.xmpp.room = room;
    }
    if let Some(nick) = var("XMPP_NICK") {
        config.xmpp.nick = nick;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `PARLOR_CONFIG` environment variable, otherwise returns "parlor.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "parlor.conf".to_string())
}
