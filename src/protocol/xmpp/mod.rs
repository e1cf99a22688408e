//! XMPP client protocol: stream framing, stanzas, SASL and session setup.

pub mod codec;
pub mod connector;
pub mod jid;
pub mod sasl;
pub mod stanza;

pub use connector::{connect_and_join, SessionSettings, XmppSession, XmppStream};

/// Namespaces used during negotiation and in the room.
pub mod ns {
    pub const CLIENT: &str = "jabber:client";
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    pub const PING: &str = "urn:xmpp:ping";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
}
