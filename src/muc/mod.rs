//! Multi-user chat room client.

pub mod client;

pub use client::{MucChannels, MucClient, XmppHandle};
