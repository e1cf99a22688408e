//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use fancy_regex::Regex;

use crate::bridge::formatter::FormatStyle;
use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Validate Discord config
    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }
    if config.discord.guild == 0 {
        errors.push("discord.guild must be non-zero".to_string());
    }
    if config.discord.channel == 0 {
        errors.push("discord.channel must be non-zero".to_string());
    }

    // Validate XMPP config
    if !is_bare_jid(&config.xmpp.account) {
        errors.push(format!(
            "xmpp.account '{}' must be a bare JID (user@domain)",
            config.xmpp.account
        ));
    }
    if config.xmpp.password.is_empty() {
        errors.push("xmpp.password is required".to_string());
    }
    if config.xmpp.server.is_empty() {
        errors.push("xmpp.server is required".to_string());
    } else if config.xmpp.server_host_port().is_none() {
        errors.push(format!(
            "xmpp.server '{}' has an invalid port",
            config.xmpp.server
        ));
    }
    if !is_bare_jid(&config.xmpp.room) {
        errors.push(format!(
            "xmpp.room '{}' must be a bare JID (room@service)",
            config.xmpp.room
        ));
    }
    if config.xmpp.nick.trim().is_empty() {
        errors.push("xmpp.nick is required".to_string());
    }
    if let Some(ref resource) = config.xmpp.resource {
        if resource.trim().is_empty() {
            errors.push("xmpp.resource must not be blank when set".to_string());
        }
    }

    // Validate relay style
    if let Some(style) = config.relay.as_ref().and_then(|r| r.style.as_deref()) {
        if FormatStyle::from_str(style).is_none() {
            errors.push(format!(
                "relay.style '{}' is invalid (use: plain, channel)",
                style
            ));
        }
    }

    // Validate filter patterns (try to compile them)
    if let Some(ref filters) = config.filters {
        let sets = [
            ("discord_to_xmpp", &filters.discord_to_xmpp),
            ("xmpp_to_discord", &filters.xmpp_to_discord),
        ];
        for (name, patterns) in sets {
            for (i, pattern) in patterns.iter().flatten().enumerate() {
                if Regex::new(pattern).is_err() {
                    errors.push(format!(
                        "filters.{}[{}] is not a valid regex: '{}'",
                        name, i, pattern
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

/// `local@domain` with no resource part.
fn is_bare_jid(jid: &str) -> bool {
    match jid.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !jid.contains('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_valid_config() -> Config {
        Config {
            discord: DiscordConfig {
                token: "valid_token_here".to_string(),
                guild: 123456789,
                channel: 987654321,
                enable_markdown: Some(true),
                resolve_emojis: None,
            },
            xmpp: XmppConfig {
                account: "bridge@example.org".to_string(),
                password: "secret".to_string(),
                server: "example.org:5222".to_string(),
                room: "lounge@conference.example.org".to_string(),
                nick: "bridge".to_string(),
                resource: None,
                starttls: Some(true),
                status_message: None,
            },
            relay: None,
            filters: None,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = String::new();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("discord.token"));
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = "YOUR_DISCORD_TOKEN_HERE".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("placeholder"));
    }

    #[test]
    fn test_zero_channel_fails() {
        let mut config = make_valid_config();
        config.discord.channel = 0;

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("discord.channel"));
    }

    #[test]
    fn test_room_must_be_bare_jid() {
        let mut config = make_valid_config();
        config.xmpp.room = "lounge@conference.example.org/nick".to_string();
        assert!(validate_config(&config).is_err());

        config.xmpp.room = "lounge".to_string();
        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("xmpp.room"));
    }

    #[test]
    fn test_errors_are_collected() {
        let mut config = make_valid_config();
        config.xmpp.password = String::new();
        config.xmpp.nick = " ".to_string();

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("xmpp.password"));
        assert!(message.contains("xmpp.nick"));
    }

    #[test]
    fn test_invalid_style_fails() {
        let mut config = make_valid_config();
        config.relay = Some(RelayConfig {
            style: Some("fancy".to_string()),
        });

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("relay.style"));
    }

    #[test]
    fn test_invalid_regex_filter_fails() {
        let mut config = make_valid_config();
        config.filters = Some(FiltersConfig {
            enabled: Some(true),
            discord_to_xmpp: None,
            xmpp_to_discord: Some(vec!["[invalid".to_string()]),
        });

        let result = validate_config(&config);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("filters.xmpp_to_discord[0] is not a valid regex"));
    }
}
