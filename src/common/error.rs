//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// XMPP wire and negotiation errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid stanza: {message}")]
    InvalidStanza { message: String },

    #[error("Unexpected stanza: expected {expected}, got {actual}")]
    UnexpectedStanza { expected: String, actual: String },

    #[error("Stanza exceeds {limit} bytes")]
    StanzaTooLarge { limit: usize },

    #[error("Stream error from server: {condition}")]
    StreamError { condition: String },

    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Server does not support {feature}")]
    Unsupported { feature: String },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Removed from room {room}")]
    RemovedFromRoom { room: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discord-related errors.
#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("Referenced message {message_id} in channel {channel_id} not found")]
    MessageNotFound { channel_id: u64, message_id: u64 },

    #[error("Channel {channel_id} has no name")]
    UnnamedChannel { channel_id: u64 },

    #[error("Serenity error: {0}")]
    Serenity(#[from] serenity::Error),
}

/// Failure of a single relay attempt. The message is dropped.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Discord lookup failed: {0}")]
    Lookup(#[source] DiscordError),

    #[error("Failed to send to Discord: {0}")]
    DiscordSend(#[source] DiscordError),

    #[error("Failed to send to XMPP: {0}")]
    XmppSend(#[source] ConnectionError),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Result type alias for Discord operations.
pub type DiscordResult<T> = std::result::Result<T, DiscordError>;
