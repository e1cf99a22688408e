//! Discord side of the relay: gateway events in, channel messages out.

pub mod handler;
pub mod resolver;
pub mod transport;

pub use handler::RelayHandler;
pub use resolver::MessageResolver;
pub use transport::{build_http, DiscordChannel};
