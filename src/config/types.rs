//! Configuration type definitions.

use serde::Deserialize;

/// Default XMPP client-to-server port.
pub const DEFAULT_XMPP_PORT: u16 = 5222;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub xmpp: XmppConfig,
    pub relay: Option<RelayConfig>,
    pub filters: Option<FiltersConfig>,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Server the relayed channel belongs to.
    pub guild: u64,
    /// The relayed channel.
    pub channel: u64,
    /// When false, markdown in text from XMPP is escaped before posting.
    pub enable_markdown: Option<bool>,
    /// Resolve `:shortcode:` emoji in text from XMPP.
    pub resolve_emojis: Option<bool>,
}

/// XMPP account and room configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct XmppConfig {
    /// Bare JID of the bridge account, e.g. `bridge@example.org`.
    pub account: String,
    pub password: String,
    /// `host` or `host:port`.
    pub server: String,
    /// Bare JID of the MUC room.
    pub room: String,
    /// Nickname used in the room.
    pub nick: String,
    pub resource: Option<String>,
    pub starttls: Option<bool>,
    pub status_message: Option<String>,
}

impl XmppConfig {
    /// Split `server` into host and port, defaulting to 5222.
    ///
    /// Returns `None` if an explicit port does not parse.
    pub fn server_host_port(&self) -> Option<(String, u16)> {
        match self.server.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port.parse().ok()?;
                Some((host.to_string(), port))
            }
            _ => Some((self.server.clone(), DEFAULT_XMPP_PORT)),
        }
    }

    pub fn starttls_enabled(&self) -> bool {
        self.starttls.unwrap_or(true)
    }

    pub fn resource_or_default(&self) -> String {
        self.resource.clone().unwrap_or_else(|| "parlor".to_string())
    }
}

/// Relay behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Format preset: "plain" (default) or "channel".
    pub style: Option<String>,
}

/// Message filtering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    /// Filters are ignored unless enabled (defaults to true when the block exists).
    pub enabled: Option<bool>,
    /// Patterns blocking messages from Discord
    pub discord_to_xmpp: Option<Vec<String>>,
    /// Patterns blocking messages from the XMPP room
    pub xmpp_to_discord: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xmpp(server: &str) -> XmppConfig {
        XmppConfig {
            account: "bridge@example.org".to_string(),
            password: "secret".to_string(),
            server: server.to_string(),
            room: "lounge@conference.example.org".to_string(),
            nick: "bridge".to_string(),
            resource: None,
            starttls: None,
            status_message: None,
        }
    }

    #[test]
    fn test_server_default_port() {
        assert_eq!(
            xmpp("example.org").server_host_port(),
            Some(("example.org".to_string(), 5222))
        );
    }

    #[test]
    fn test_server_explicit_port() {
        assert_eq!(
            xmpp("xmpp.example.org:5223").server_host_port(),
            Some(("xmpp.example.org".to_string(), 5223))
        );
        assert_eq!(xmpp("example.org:abc").server_host_port(), None);
    }

    #[test]
    fn test_defaults() {
        let config = xmpp("example.org");
        assert!(config.starttls_enabled());
        assert_eq!(config.resource_or_default(), "parlor");
    }
}
