//! Wire protocols.

pub mod xmpp;
