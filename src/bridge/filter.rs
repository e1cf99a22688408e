//! Regex filters for relayed messages.
//!
//! Patterns are checked against the formatted text about to be sent.
//! A match drops the message for that direction only.

use fancy_regex::Regex;
use tracing::warn;

use crate::config::FiltersConfig;

/// Which way a message is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDirection {
    DiscordToXmpp,
    XmppToDiscord,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    discord_to_xmpp: Vec<CompiledPattern>,
    xmpp_to_discord: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

impl MessageFilter {
    /// Compile both pattern lists. Invalid patterns are logged and skipped.
    pub fn new(discord_to_xmpp: Option<Vec<String>>, xmpp_to_discord: Option<Vec<String>>) -> Self {
        Self {
            discord_to_xmpp: compile_patterns(discord_to_xmpp.unwrap_or_default()),
            xmpp_to_discord: compile_patterns(xmpp_to_discord.unwrap_or_default()),
        }
    }

    /// Build from the `filters` block; absent or disabled means no filtering.
    pub fn from_config(config: Option<&FiltersConfig>) -> Self {
        match config {
            Some(filters) if filters.enabled.unwrap_or(true) => Self::new(
                filters.discord_to_xmpp.clone(),
                filters.xmpp_to_discord.clone(),
            ),
            _ => Self::default(),
        }
    }

    /// True if the message matches a pattern for `direction` and must be dropped.
    pub fn should_filter(&self, direction: FilterDirection, message: &str) -> bool {
        let patterns = match direction {
            FilterDirection::DiscordToXmpp => &self.discord_to_xmpp,
            FilterDirection::XmppToDiscord => &self.xmpp_to_discord,
        };

        patterns.iter().any(|p| {
            p.regex.is_match(message).unwrap_or_else(|e| {
                warn!("Regex match error for pattern '{}': {}", p.original, e);
                false
            })
        })
    }

    pub fn has_patterns(&self) -> bool {
        !self.discord_to_xmpp.is_empty() || !self.xmpp_to_discord.is_empty()
    }
}

fn compile_patterns(patterns: Vec<String>) -> Vec<CompiledPattern> {
    patterns
        .into_iter()
        .filter_map(|pattern| match Regex::new(&pattern) {
            Ok(regex) => Some(CompiledPattern {
                original: pattern,
                regex,
            }),
            Err(e) => {
                warn!("Invalid filter regex pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Option<Vec<String>> {
        Some(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_empty_filter_allows_all() {
        let filter = MessageFilter::default();
        assert!(!filter.has_patterns());
        assert!(!filter.should_filter(FilterDirection::DiscordToXmpp, "anything"));
        assert!(!filter.should_filter(FilterDirection::XmppToDiscord, "anything"));
    }

    #[test]
    fn test_directions_are_independent() {
        let filter = MessageFilter::new(patterns(&["^!cmd"]), patterns(&["bot spam"]));
        assert!(filter.should_filter(FilterDirection::DiscordToXmpp, "!cmd help"));
        assert!(!filter.should_filter(FilterDirection::XmppToDiscord, "!cmd help"));
        assert!(filter.should_filter(FilterDirection::XmppToDiscord, "more bot spam here"));
        assert!(!filter.should_filter(FilterDirection::DiscordToXmpp, "more bot spam here"));
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let filter = MessageFilter::new(patterns(&["[invalid", "valid"]), None);
        assert!(filter.should_filter(FilterDirection::DiscordToXmpp, "valid pattern"));
        assert!(!filter.should_filter(FilterDirection::DiscordToXmpp, "nothing here"));
    }

    #[test]
    fn test_case_insensitive_and_lookahead() {
        let filter = MessageFilter::new(None, patterns(&["(?i)^http(?!s)"]));
        assert!(filter.should_filter(FilterDirection::XmppToDiscord, "HTTP://plain.example"));
        assert!(!filter.should_filter(FilterDirection::XmppToDiscord, "https://example.org"));
    }

    #[test]
    fn test_from_config_respects_enabled() {
        let mut config = FiltersConfig {
            enabled: None,
            discord_to_xmpp: patterns(&["secret"]),
            xmpp_to_discord: None,
        };
        assert!(MessageFilter::from_config(Some(&config))
            .should_filter(FilterDirection::DiscordToXmpp, "a secret"));

        config.enabled = Some(false);
        assert!(!MessageFilter::from_config(Some(&config)).has_patterns());
        assert!(!MessageFilter::from_config(None).has_patterns());
    }
}
