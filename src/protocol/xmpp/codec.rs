//! XMPP stream framing.
//!
//! The stream is one long XML document. The decoder cuts it into the
//! stream header, top-level stanzas and the closing tag without parsing
//! stanza contents, so a malformed stanza only costs that stanza.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::common::error::ProtocolError;
use crate::protocol::xmpp::ns;
use crate::protocol::xmpp::stanza::Element;

/// Largest stanza accepted before the stream is dropped.
pub const MAX_STANZA_SIZE: usize = 1 << 20;

/// A unit read from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The `<stream:stream ...>` opening tag.
    StreamOpen(Bytes),
    /// One complete top-level element.
    Stanza(Bytes),
    /// `</stream:stream>`.
    StreamClose,
}

/// A unit written to the server.
#[derive(Debug, Clone)]
pub enum Packet {
    /// XML declaration plus stream opening tag addressed to a domain.
    StreamHeader { to: String },
    Stanza(Element),
    /// Single space keeping idle connections alive.
    Whitespace,
    StreamEnd,
}

#[derive(Debug, Default)]
pub struct XmppCodec;

impl XmppCodec {
    pub fn new() -> Self {
        Self
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Index just past the `>` closing the tag that starts at `start`.
///
/// Quoted attribute values may contain `>`.
fn tag_end(buf: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &c) in buf.iter().enumerate().skip(start + 1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                b'"' | b'\'' => quote = Some(c),
                b'>' => return Some(i + 1),
                _ => {}
            },
        }
    }
    None
}

fn tag_name(tag: &[u8]) -> &[u8] {
    let body = &tag[1..];
    let len = body
        .iter()
        .position(|c| c.is_ascii_whitespace() || *c == b'/' || *c == b'>')
        .unwrap_or(body.len());
    &body[..len]
}

/// Length of the complete element at the start of `buf`, if buffered.
fn element_len(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let mut i = 0;
    let mut depth = 0usize;

    loop {
        if i >= buf.len() {
            return Ok(None);
        }
        if buf[i] != b'<' {
            match buf[i..].iter().position(|&c| c == b'<') {
                Some(p) => i += p,
                None => return Ok(None),
            }
            continue;
        }

        let rest = &buf[i..];
        let skip = if rest.starts_with(b"<!--") {
            Some((b"-->".as_slice(), 4))
        } else if rest.starts_with(b"<![CDATA[") {
            Some((b"]]>".as_slice(), 9))
        } else if rest.starts_with(b"<?") {
            Some((b"?>".as_slice(), 2))
        } else {
            None
        };
        if let Some((terminator, offset)) = skip {
            match find(buf, terminator, i + offset) {
                Some(end) => {
                    i = end + terminator.len();
                    continue;
                }
                None => return Ok(None),
            }
        }

        let end = match tag_end(buf, i) {
            Some(end) => end,
            None => return Ok(None),
        };

        if rest.starts_with(b"</") {
            depth = depth.checked_sub(1).ok_or_else(|| ProtocolError::InvalidStanza {
                message: "unbalanced closing tag".to_string(),
            })?;
            if depth == 0 {
                return Ok(Some(end));
            }
        } else if buf[end - 2] == b'/' {
            if depth == 0 {
                return Ok(Some(end));
            }
        } else {
            depth += 1;
        }
        i = end;
    }
}

impl Decoder for XmppCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Whitespace between stanzas is keepalive noise
            let leading = src.iter().take_while(|c| c.is_ascii_whitespace()).count();
            src.advance(leading);

            if src.is_empty() {
                return Ok(None);
            }
            if src[0] != b'<' {
                return Err(ProtocolError::InvalidStanza {
                    message: "text outside of a stanza".to_string(),
                });
            }

            let frame_len = if src.starts_with(b"<?") {
                match find(&src[..], b"?>", 2) {
                    Some(end) => {
                        src.advance(end + 2);
                        continue;
                    }
                    None => None,
                }
            } else if src.starts_with(b"</") {
                match tag_end(&src[..], 0) {
                    Some(end) => {
                        src.advance(end);
                        return Ok(Some(Frame::StreamClose));
                    }
                    None => None,
                }
            } else {
                match tag_end(&src[..], 0) {
                    Some(end) if tag_name(&src[..end]) == b"stream:stream" => {
                        return Ok(Some(Frame::StreamOpen(src.split_to(end).freeze())));
                    }
                    Some(_) => element_len(&src[..])?,
                    None => None,
                }
            };

            return match frame_len {
                Some(len) => Ok(Some(Frame::Stanza(src.split_to(len).freeze()))),
                None if src.len() > MAX_STANZA_SIZE => Err(ProtocolError::StanzaTooLarge {
                    limit: MAX_STANZA_SIZE,
                }),
                None => Ok(None),
            };
        }
    }
}

impl Encoder<Packet> for XmppCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Packet::StreamHeader { to } => {
                let header = format!(
                    "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xml:lang='en' \
                     xmlns='{}' xmlns:stream='{}'>",
                    quick_xml::escape::escape(to.as_str()),
                    ns::CLIENT,
                    ns::STREAM
                );
                dst.put_slice(header.as_bytes());
            }
            Packet::Stanza(element) => dst.put_slice(element.to_xml().as_bytes()),
            Packet::Whitespace => dst.put_u8(b' '),
            Packet::StreamEnd => dst.put_slice(b"</stream:stream>"),
        }
        Ok(())
    }
}
