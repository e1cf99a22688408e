//! Canonical message types for bridge communication.
//!
//! This module defines the single source of truth for message types
//! flowing between Discord, the relay, and the XMPP client.

/// A message posted in the relayed Discord channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordMessage {
    /// Discord server ID (None for direct messages).
    pub guild_id: Option<u64>,
    /// Channel the message was posted in.
    pub channel_id: u64,
    /// Author's user ID.
    pub author_id: u64,
    /// Author's display name (global name, falling back to the username).
    pub author_display_name: String,
    /// Author's unique username.
    pub author_handle: String,
    /// Message content with Discord markup already resolved to text.
    pub body: String,
    /// Message being replied to, if any.
    pub reply_target: Option<ReplyTarget>,
}

/// Reference to a prior Discord message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: u64,
    pub message_id: u64,
}

/// A Discord message fetched by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedMessage {
    pub channel_id: u64,
    pub author_display_name: String,
    pub author_handle: String,
    pub body: String,
}

/// A reply target after lookup, ready for quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReply {
    /// Name of the channel holding the quoted message.
    /// Only looked up when the format style shows channel names.
    pub source_container_name: Option<String>,
    pub source_author_display_name: String,
    pub source_author_handle: String,
    pub source_body: String,
}

/// XMPP message type attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Groupchat,
    Headline,
    Normal,
    Error,
}

impl MessageKind {
    /// Parse the `type` attribute of a message stanza.
    ///
    /// A missing or unknown type is treated as `normal` (RFC 6121 5.2.2).
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("chat") => Self::Chat,
            Some("groupchat") => Self::Groupchat,
            Some("headline") => Self::Headline,
            Some("error") => Self::Error,
            _ => Self::Normal,
        }
    }
}

/// A message received from the XMPP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender address; `room@host/nick` for MUC occupants.
    pub from: String,
    pub kind: MessageKind,
    pub body: String,
}

/// Presence availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Available,
    Unavailable,
    Error,
    Other,
}

/// A presence stanza received from the XMPP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub from: String,
    pub kind: PresenceKind,
    /// MUC status codes (XEP-0045), e.g. 110 for self-presence.
    pub status_codes: Vec<u16>,
    /// Error condition element name for `type='error'`.
    pub error_condition: Option<String>,
}

impl PresenceUpdate {
    /// Whether this presence refers to our own occupant.
    pub fn is_self(&self) -> bool {
        self.status_codes.contains(&110)
    }
}

/// Inbound XMPP events delivered to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmppEvent {
    /// A message stanza carrying a body.
    Chat(ChatMessage),
    /// A presence stanza.
    Presence(PresenceUpdate),
    /// A stanza the relay does not act upon (bodiless messages, unknown elements).
    Unhandled { name: String },
}

/// Groupchat message to send to the XMPP room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingGroupchat {
    pub room: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_from_attr() {
        assert_eq!(MessageKind::from_attr(Some("groupchat")), MessageKind::Groupchat);
        assert_eq!(MessageKind::from_attr(Some("chat")), MessageKind::Chat);
        assert_eq!(MessageKind::from_attr(Some("error")), MessageKind::Error);
        assert_eq!(MessageKind::from_attr(None), MessageKind::Normal);
        assert_eq!(MessageKind::from_attr(Some("bogus")), MessageKind::Normal);
    }

    #[test]
    fn test_presence_is_self() {
        let presence = PresenceUpdate {
            from: "room@conference.example.org/bridge".to_string(),
            kind: PresenceKind::Available,
            status_codes: vec![110, 210],
            error_condition: None,
        };
        assert!(presence.is_self());
    }
}
