//! Message relay between Discord and the XMPP room.
//!
//! - `formatter`: text conversion in both directions
//! - `filter`: regex filters per direction
//! - `ports`: transport traits the relay is written against
//! - `relay`: admission and the send path for both directions

pub mod filter;
pub mod formatter;
pub mod ports;
pub mod relay;

#[cfg(test)]
mod testing;

pub use relay::{run_xmpp_to_discord, Relay};
