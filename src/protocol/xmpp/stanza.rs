//! Stanza tree, parsing and the stanzas the client sends.

use std::borrow::Cow;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::common::error::{ProtocolError, ProtocolResult};
use crate::common::{ChatMessage, MessageKind, PresenceKind, PresenceUpdate, XmppEvent};
use crate::protocol::xmpp::ns;

/// A parsed XML element.
///
/// Text content is the concatenation of the element's direct text nodes.
/// Prefixed names (`stream:features`) are kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

fn invalid(message: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidStanza {
        message: message.into(),
    }
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn ns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First child with the given name and namespace.
    pub fn child_ns(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.name == name && c.ns() == Some(namespace))
    }

    /// Parse one complete element.
    pub fn parse(data: &[u8]) -> ProtocolResult<Element> {
        let text =
            std::str::from_utf8(data).map_err(|e| invalid(format!("not valid UTF-8: {}", e)))?;
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<Element> = Vec::new();

        loop {
            match reader.read_event().map_err(|e| invalid(e.to_string()))? {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| invalid("unbalanced end tag"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(element) = stack.last_mut() {
                        let text = text.unescape().map_err(|e| invalid(e.to_string()))?;
                        element.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(element) = stack.last_mut() {
                        element
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => return Err(invalid("unexpected end of input")),
                _ => {}
            }
        }
    }

    fn from_start(start: &BytesStart) -> ProtocolResult<Element> {
        let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes() {
            let attr = attr.map_err(|e| invalid(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| invalid(e.to_string()))?;
            element.attrs.push((key, value.into_owned()));
        }
        Ok(element)
    }

    /// Serialize with single-quoted attributes.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("='");
            out.push_str(&escape(xml_chars(value).as_ref()));
            out.push('\'');
        }
        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(xml_chars(&self.text).as_ref()));
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Drop characters XML 1.0 cannot carry, such as control characters
/// other than tab and line breaks.
fn xml_chars(text: &str) -> Cow<'_, str> {
    fn allowed(c: char) -> bool {
        matches!(c, '\t' | '\n' | '\r') || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
    }
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| allowed(*c)).collect())
    }
}

/// Turn an inbound message or presence into a relay event.
pub fn classify(element: &Element) -> XmppEvent {
    let from = element.attr("from").unwrap_or_default().to_string();
    match element.name.as_str() {
        "message" => match element.child("body") {
            Some(body) => XmppEvent::Chat(ChatMessage {
                from,
                kind: MessageKind::from_attr(element.attr("type")),
                body: body.text.clone(),
            }),
            None => XmppEvent::Unhandled {
                name: "message".to_string(),
            },
        },
        "presence" => {
            let kind = match element.attr("type") {
                None => PresenceKind::Available,
                Some("unavailable") => PresenceKind::Unavailable,
                Some("error") => PresenceKind::Error,
                Some(_) => PresenceKind::Other,
            };
            let status_codes = element
                .child_ns("x", ns::MUC_USER)
                .map(|x| {
                    x.children
                        .iter()
                        .filter(|c| c.name == "status")
                        .filter_map(|c| c.attr("code")?.parse().ok())
                        .collect()
                })
                .unwrap_or_default();
            XmppEvent::Presence(PresenceUpdate {
                from,
                kind,
                status_codes,
                error_condition: element.child("error").and_then(error_condition),
            })
        }
        other => XmppEvent::Unhandled {
            name: other.to_string(),
        },
    }
}

/// Name of the defined condition inside a stanza or stream error.
pub fn error_condition(error: &Element) -> Option<String> {
    error
        .children
        .iter()
        .find(|c| c.name != "text")
        .map(|c| c.name.clone())
}

/// Response to an IQ request, or `None` for results and errors.
///
/// Pings are answered; every other request gets `service-unavailable`.
pub fn iq_response(request: &Element) -> Option<Element> {
    let kind = request.attr("type")?;
    if kind != "get" && kind != "set" {
        return None;
    }

    let mut response = Element::new("iq");
    if let Some(from) = request.attr("from") {
        response = response.with_attr("to", from);
    }
    if let Some(id) = request.attr("id") {
        response = response.with_attr("id", id);
    }

    if kind == "get" && request.child_ns("ping", ns::PING).is_some() {
        return Some(response.with_attr("type", "result"));
    }

    Some(
        response.with_attr("type", "error").with_child(
            Element::new("error")
                .with_attr("type", "cancel")
                .with_child(Element::new("service-unavailable").with_attr("xmlns", ns::STANZAS)),
        ),
    )
}

/// A groupchat message to a room.
pub fn groupchat(room: &str, text: &str) -> Element {
    Element::new("message")
        .with_attr("to", room)
        .with_attr("type", "groupchat")
        .with_child(Element::new("body").with_text(text))
}

/// Initial broadcast presence.
pub fn initial_presence(status: Option<&str>) -> Element {
    let presence = Element::new("presence").with_child(Element::new("show").with_text("chat"));
    match status {
        Some(status) => presence.with_child(Element::new("status").with_text(status)),
        None => presence,
    }
}

/// Room join without history.
pub fn muc_join(room: &str, nick: &str) -> Element {
    Element::new("presence")
        .with_attr("to", format!("{}/{}", room, nick))
        .with_child(
            Element::new("x")
                .with_attr("xmlns", ns::MUC)
                .with_child(Element::new("history").with_attr("maxchars", "0")),
        )
}

pub fn muc_leave(room: &str, nick: &str) -> Element {
    Element::new("presence")
        .with_attr("to", format!("{}/{}", room, nick))
        .with_attr("type", "unavailable")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let element = Element::parse(
            b"<message from='lounge@conference.example.org/Alice' type='groupchat' id='1'>\
              <body>hi &amp; bye</body><x xmlns='jabber:x:oob'/></message>",
        )
        .unwrap();
        assert_eq!(element.name, "message");
        assert_eq!(element.attr("type"), Some("groupchat"));
        assert_eq!(element.child("body").unwrap().text, "hi & bye");
        assert_eq!(element.child_ns("x", "jabber:x:oob").unwrap().name, "x");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Element::parse(b"<message><body>hi</message>").is_err());
        assert!(Element::parse(b"<message>").is_err());
        assert!(Element::parse(&[b'<', b'a', b'>', 0xff, b'<', b'/', b'a', b'>']).is_err());
    }

    #[test]
    fn test_to_xml_escapes() {
        let xml = groupchat("lounge@conference.example.org", "a < b & 'c'").to_xml();
        assert_eq!(
            xml,
            "<message to='lounge@conference.example.org' type='groupchat'>\
             <body>a &lt; b &amp; &apos;c&apos;</body></message>"
        );
        let parsed = Element::parse(xml.as_bytes()).unwrap();
        assert_eq!(parsed.child("body").unwrap().text, "a < b & 'c'");
    }

    #[test]
    fn test_to_xml_drops_forbidden_chars() {
        let xml = groupchat(
            "lounge@conference.example.org",
            "bell\u{7} tab\tline\nend\u{1b}[0m",
        )
        .to_xml();
        assert_eq!(
            xml,
            "<message to='lounge@conference.example.org' type='groupchat'>\
             <body>bell tab\tline\nend[0m</body></message>"
        );
        assert!(Element::parse(xml.as_bytes()).is_ok());
    }

    #[test]
    fn test_muc_join() {
        assert_eq!(
            muc_join("lounge@conference.example.org", "bridge").to_xml(),
            "<presence to='lounge@conference.example.org/bridge'>\
             <x xmlns='http://jabber.org/protocol/muc'><history maxchars='0'/></x></presence>"
        );
    }

    #[test]
    fn test_classify_groupchat() {
        let element = Element::parse(
            b"<message from='room@host/Alice' type='groupchat'><body>hello</body></message>",
        )
        .unwrap();
        assert_eq!(
            classify(&element),
            XmppEvent::Chat(ChatMessage {
                from: "room@host/Alice".to_string(),
                kind: MessageKind::Groupchat,
                body: "hello".to_string(),
            })
        );
    }

    #[test]
    fn test_classify_bodiless_message_is_unhandled() {
        let element = Element::parse(
            b"<message from='room@host' type='groupchat'><subject>Topic</subject></message>",
        )
        .unwrap();
        assert_eq!(
            classify(&element),
            XmppEvent::Unhandled {
                name: "message".to_string()
            }
        );
    }

    #[test]
    fn test_classify_self_presence() {
        let element = Element::parse(
            b"<presence from='room@host/bridge'>\
              <x xmlns='http://jabber.org/protocol/muc#user'>\
              <item affiliation='none' role='participant'/>\
              <status code='110'/><status code='210'/></x></presence>",
        )
        .unwrap();
        match classify(&element) {
            XmppEvent::Presence(presence) => {
                assert_eq!(presence.kind, PresenceKind::Available);
                assert_eq!(presence.status_codes, vec![110, 210]);
                assert!(presence.is_self());
            }
            other => panic!("expected presence, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_presence_error() {
        let element = Element::parse(
            b"<presence from='room@host/bridge' type='error'>\
              <error type='cancel'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>\
              </presence>",
        )
        .unwrap();
        match classify(&element) {
            XmppEvent::Presence(presence) => {
                assert_eq!(presence.kind, PresenceKind::Error);
                assert_eq!(presence.error_condition.as_deref(), Some("conflict"));
            }
            other => panic!("expected presence, got {:?}", other),
        }
    }

    #[test]
    fn test_iq_ping_response() {
        let ping = Element::parse(
            b"<iq from='example.org' id='p1' type='get'><ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .unwrap();
        assert_eq!(
            iq_response(&ping).unwrap().to_xml(),
            "<iq to='example.org' id='p1' type='result'/>"
        );
    }

    #[test]
    fn test_iq_unknown_request_unavailable() {
        let query = Element::parse(
            b"<iq from='a@b/c' id='v1' type='get'><query xmlns='jabber:iq:version'/></iq>",
        )
        .unwrap();
        let response = iq_response(&query).unwrap();
        assert_eq!(response.attr("type"), Some("error"));
        let error = response.child("error").unwrap();
        assert_eq!(error_condition(error).as_deref(), Some("service-unavailable"));

        let result = Element::parse(b"<iq id='x' type='result'/>").unwrap();
        assert!(iq_response(&result).is_none());
    }
}
