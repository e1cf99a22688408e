//! Message text conversion between Discord and the XMPP room.
//!
//! Discord replies carry a message reference; the room only has the
//! convention of leading `>` lines. Discord messages are rendered with the
//! replied-to message quoted on one `>` line, and room messages starting
//! with `>` are split back into the quoted part and the new text.

use tracing::debug;

use crate::bridge::ports::MessageLookup;
use crate::common::error::RelayError;
use crate::common::{ChatMessage, DiscordMessage, MessageKind, ReplyTarget, ResolvedReply};
use crate::protocol::xmpp::jid;

/// Leading character of a quoted line.
pub const QUOTE_MARKER: char = '>';

/// Output layout for messages going to the room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatStyle {
    /// `Display (handle): body`
    #[default]
    Plain,
    /// `channel > handle: body`
    ChannelQualified,
}

impl FormatStyle {
    /// Parse a style from config.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" => Some(FormatStyle::Plain),
            "channel" | "channel_qualified" => Some(FormatStyle::ChannelQualified),
            _ => None,
        }
    }

    /// Whether channel names must be looked up for this style.
    pub fn shows_channel_names(self) -> bool {
        matches!(self, FormatStyle::ChannelQualified)
    }
}

/// Who the bridge is in the room, for dropping its own echoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmppIdentity {
    pub nick: String,
    pub account: String,
}

/// Leading quote lines and the text after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSplit {
    pub quote_lines: Vec<String>,
    pub rest: String,
}

/// Split a body into its leading run of quote lines and the rest.
///
/// Each quote line loses one marker and surrounding whitespace. Once a
/// non-quote line is seen, every following line belongs to the rest.
pub fn split_quote(body: &str) -> QuoteSplit {
    let mut quote_lines = Vec::new();
    let mut rest_lines = Vec::new();
    let mut found_rest = false;

    for line in body.split('\n') {
        match line.strip_prefix(QUOTE_MARKER) {
            Some(quoted) if !found_rest => quote_lines.push(quoted.trim().to_string()),
            _ => {
                found_rest = true;
                rest_lines.push(line);
            }
        }
    }

    QuoteSplit {
        quote_lines,
        rest: rest_lines.join("\n").trim().to_string(),
    }
}

/// Collapse line breaks so a quoted body stays on its quote line.
fn single_line(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join(" ")
}

/// Render a Discord message once any reply target and channel names are known.
pub fn render_discord_message(
    msg: &DiscordMessage,
    channel_name: Option<&str>,
    reply: Option<&ResolvedReply>,
    style: FormatStyle,
) -> String {
    match style {
        FormatStyle::Plain => {
            let line = format!(
                "{} ({}): {}",
                msg.author_display_name, msg.author_handle, msg.body
            );
            match reply {
                Some(reply) => format!(
                    "{} {} ({}): {}\n{}",
                    QUOTE_MARKER,
                    reply.source_author_display_name,
                    reply.source_author_handle,
                    single_line(&reply.source_body),
                    line
                ),
                None => line,
            }
        }
        FormatStyle::ChannelQualified => {
            let line = format!(
                "{} > {}: {}",
                channel_name.unwrap_or_default(),
                msg.author_handle,
                msg.body
            );
            match reply {
                Some(reply) => format!(
                    ">>> (Reply) {} > {}: {}\n{}",
                    reply.source_container_name.as_deref().unwrap_or_default(),
                    reply.source_author_handle,
                    single_line(&reply.source_body),
                    line
                ),
                None => line,
            }
        }
    }
}

/// Format a Discord message for the room, resolving its reply target.
///
/// Any failed lookup aborts the whole message.
pub async fn format_discord_message(
    msg: &DiscordMessage,
    lookup: &dyn MessageLookup,
    style: FormatStyle,
) -> Result<String, RelayError> {
    let channel_name = if style.shows_channel_names() {
        Some(
            lookup
                .fetch_channel_name(msg.channel_id)
                .await
                .map_err(RelayError::Lookup)?,
        )
    } else {
        None
    };

    let reply = match msg.reply_target {
        Some(target) => Some(resolve_reply(msg, target, channel_name.as_deref(), lookup, style).await?),
        None => None,
    };

    Ok(render_discord_message(
        msg,
        channel_name.as_deref(),
        reply.as_ref(),
        style,
    ))
}

async fn resolve_reply(
    msg: &DiscordMessage,
    target: ReplyTarget,
    own_channel_name: Option<&str>,
    lookup: &dyn MessageLookup,
    style: FormatStyle,
) -> Result<ResolvedReply, RelayError> {
    let referenced = lookup
        .fetch_message(target.channel_id, target.message_id)
        .await
        .map_err(RelayError::Lookup)?;
    debug!(
        "Resolved reply target {} in channel {}",
        target.message_id, target.channel_id
    );

    let source_container_name = if !style.shows_channel_names() {
        None
    } else if referenced.channel_id == msg.channel_id && own_channel_name.is_some() {
        own_channel_name.map(str::to_string)
    } else {
        Some(
            lookup
                .fetch_channel_name(referenced.channel_id)
                .await
                .map_err(RelayError::Lookup)?,
        )
    };

    Ok(ResolvedReply {
        source_container_name,
        source_author_display_name: referenced.author_display_name,
        source_author_handle: referenced.author_handle,
        source_body: referenced.body,
    })
}

/// Format a room message for Discord.
///
/// Returns `None` for anything but groupchat and for the bridge's own messages.
pub fn format_xmpp_message(chat: &ChatMessage, identity: &XmppIdentity) -> Option<String> {
    if chat.kind != MessageKind::Groupchat {
        return None;
    }

    let nick = jid::occupant_nick(&chat.from);
    if nick == identity.nick || nick == identity.account {
        return None;
    }

    if chat.body.starts_with(QUOTE_MARKER) {
        let split = split_quote(&chat.body);
        Some(format!(
            "{} {}\n{}: {}",
            QUOTE_MARKER,
            split.quote_lines.join("\n"),
            nick,
            split.rest
        ))
    } else {
        Some(format!("{}: {}", nick, chat.body))
    }
}

/// Find the last UTF-8 char boundary at or before `byte_index` in `s`.
fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split a message into chunks of at most `max_len` bytes.
///
/// Prefers splitting at the last space (or newline) inside the limit and
/// never splits a multi-byte character.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = floor_char_boundary(remaining, max_len);

        // Limit smaller than the first character: emit that character alone
        if split_at == 0 {
            let first_char_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            chunks.push(remaining[..first_char_end].to_string());
            remaining = &remaining[first_char_end..];
            continue;
        }

        let chunk = &remaining[..split_at];
        match chunk.rfind(|c: char| c == ' ' || c == '\n') {
            Some(idx) if idx > 0 => {
                chunks.push(remaining[..idx].to_string());
                remaining = &remaining[idx + 1..];
            }
            _ => {
                chunks.push(chunk.to_string());
                remaining = &remaining[split_at..];
            }
        }
    }

    chunks
}
