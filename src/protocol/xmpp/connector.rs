//! XMPP session establishment.
//!
//! Opens the stream, upgrades to TLS, authenticates, binds a resource,
//! sends initial presence and joins the room.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::common::error::{ConnectionError, ConnectionResult, ProtocolError};
use crate::config::XmppConfig;
use crate::protocol::xmpp::codec::{Frame, Packet, XmppCodec};
use crate::protocol::xmpp::sasl::{self, ScramClient};
use crate::protocol::xmpp::stanza::{self, Element};
use crate::protocol::xmpp::{jid, ns};

/// Byte stream an XMPP session runs over (plain TCP, TLS, or a test mock).
pub trait XmppIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> XmppIo for T {}

/// A framed XMPP connection.
pub type XmppStream = Framed<Box<dyn XmppIo>, XmppCodec>;

/// Everything needed to (re)establish a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    /// Bare account JID.
    pub account: String,
    pub password: String,
    pub resource: String,
    pub starttls: bool,
    pub room: String,
    pub nick: String,
    pub status_message: Option<String>,
}

impl SessionSettings {
    pub fn from_config(config: &XmppConfig) -> Self {
        let (host, port) = config
            .server_host_port()
            .unwrap_or_else(|| (config.server.clone(), crate::config::DEFAULT_XMPP_PORT));
        Self {
            host,
            port,
            account: config.account.clone(),
            password: config.password.clone(),
            resource: config.resource_or_default(),
            starttls: config.starttls_enabled(),
            room: config.room.clone(),
            nick: config.nick.clone(),
            status_message: config.status_message.clone(),
        }
    }

    fn domain(&self) -> &str {
        jid::domain(&self.account)
    }
}

/// An established session, joined to the room.
pub struct XmppSession {
    pub stream: XmppStream,
    /// Full JID assigned by the server.
    pub bound_jid: String,
}

fn unexpected(expected: &str, actual: &Element) -> ProtocolError {
    ProtocolError::UnexpectedStanza {
        expected: expected.to_string(),
        actual: actual.name.clone(),
    }
}

/// Connect over TCP and run the full session setup.
pub async fn connect_and_join(settings: &SessionSettings) -> ConnectionResult<XmppSession> {
    info!("Connecting to XMPP server at {}:{}", settings.host, settings.port);

    let tcp = TcpStream::connect((settings.host.as_str(), settings.port))
        .await
        .map_err(|e| ConnectionError::ConnectFailed {
            host: settings.host.clone(),
            port: settings.port,
            source: e,
        })?;
    tcp.set_nodelay(true)?;

    info!("Connected to XMPP server");
    establish(Box::new(tcp), settings).await
}

/// Run session setup over an already-connected byte stream.
pub async fn establish(
    io: Box<dyn XmppIo>,
    settings: &SessionSettings,
) -> ConnectionResult<XmppSession> {
    let mut stream = Framed::new(io, XmppCodec::new());
    let mut features = open_stream(&mut stream, settings.domain()).await?;

    if settings.starttls {
        if features.child_ns("starttls", ns::TLS).is_none() {
            return Err(ProtocolError::Unsupported {
                feature: "STARTTLS".to_string(),
            }
            .into());
        }
        stream = start_tls(stream, settings.domain()).await?;
        features = open_stream(&mut stream, settings.domain()).await?;
    } else {
        warn!("STARTTLS disabled, credentials are sent unencrypted");
    }

    authenticate(&mut stream, &features, settings).await?;
    let features = open_stream(&mut stream, settings.domain()).await?;

    let bound_jid = bind_resource(&mut stream, &settings.resource).await?;
    info!("Bound as {}", bound_jid);

    // Legacy session establishment (RFC 3921), only when mandatory
    if let Some(session) = features.child_ns("session", ns::SESSION) {
        if session.child("optional").is_none() {
            let request = Element::new("iq")
                .with_attr("type", "set")
                .with_attr("id", "sess_1")
                .with_child(Element::new("session").with_attr("xmlns", ns::SESSION));
            send(&mut stream, request).await?;
            await_iq_result(&mut stream, "sess_1").await?;
            debug!("Legacy session established");
        }
    }

    send(
        &mut stream,
        stanza::initial_presence(settings.status_message.as_deref()),
    )
    .await?;
    send(&mut stream, stanza::muc_join(&settings.room, &settings.nick)).await?;
    info!("Joining room {} as {}", settings.room, settings.nick);

    Ok(XmppSession { stream, bound_jid })
}

async fn send(stream: &mut XmppStream, element: Element) -> ConnectionResult<()> {
    stream.send(Packet::Stanza(element)).await?;
    Ok(())
}

/// Read the next frame, failing on stream errors and closes.
async fn next_frame(stream: &mut XmppStream) -> ConnectionResult<Frame> {
    match stream.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(e)) => Err(e.into()),
        None => Err(ConnectionError::ConnectionClosed),
    }
}

/// Read the next top-level stanza during negotiation.
async fn next_stanza(stream: &mut XmppStream) -> ConnectionResult<Element> {
    match next_frame(stream).await? {
        Frame::Stanza(bytes) => {
            let element = Element::parse(&bytes)?;
            if element.name == "stream:error" {
                return Err(ProtocolError::StreamError {
                    condition: stanza::error_condition(&element)
                        .unwrap_or_else(|| "undefined-condition".to_string()),
                }
                .into());
            }
            Ok(element)
        }
        Frame::StreamOpen(_) => Err(ProtocolError::InvalidStanza {
            message: "unexpected stream restart".to_string(),
        }
        .into()),
        Frame::StreamClose => Err(ConnectionError::ConnectionClosed),
    }
}

/// Send a stream header and wait for the server's header and features.
async fn open_stream(stream: &mut XmppStream, domain: &str) -> ConnectionResult<Element> {
    stream
        .send(Packet::StreamHeader {
            to: domain.to_string(),
        })
        .await?;

    match next_frame(stream).await? {
        Frame::StreamOpen(_) => {}
        Frame::StreamClose => return Err(ConnectionError::ConnectionClosed),
        Frame::Stanza(bytes) => {
            return Err(ProtocolError::InvalidStanza {
                message: format!(
                    "expected stream header, got {}",
                    String::from_utf8_lossy(&bytes)
                ),
            }
            .into())
        }
    }

    let features = next_stanza(stream).await?;
    if features.name != "stream:features" {
        return Err(unexpected("stream:features", &features).into());
    }
    Ok(features)
}

async fn start_tls(mut stream: XmppStream, domain: &str) -> ConnectionResult<XmppStream> {
    send(
        &mut stream,
        Element::new("starttls").with_attr("xmlns", ns::TLS),
    )
    .await?;

    let reply = next_stanza(&mut stream).await?;
    if reply.name != "proceed" {
        return Err(ProtocolError::Tls {
            message: format!("server answered STARTTLS with <{}>", reply.name),
        }
        .into());
    }

    let parts = stream.into_parts();
    if !parts.read_buf.is_empty() {
        return Err(ProtocolError::Tls {
            message: "data received after <proceed/>".to_string(),
        }
        .into());
    }

    let server_name = ServerName::try_from(domain.to_string()).map_err(|e| ProtocolError::Tls {
        message: format!("invalid server name '{}': {}", domain, e),
    })?;
    let connector = TlsConnector::from(Arc::new(tls_config()?));
    let tls = connector.connect(server_name, parts.io).await?;
    info!("TLS established");

    Ok(Framed::new(Box::new(tls) as Box<dyn XmppIo>, XmppCodec::new()))
}

fn tls_config() -> Result<ClientConfig, ProtocolError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ProtocolError::Tls {
        message: e.to_string(),
    })?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(config)
}

fn sasl_element(name: &str, payload: &[u8]) -> Element {
    let element = Element::new(name).with_attr("xmlns", ns::SASL);
    if payload.is_empty() {
        element
    } else {
        element.with_text(STANDARD.encode(payload))
    }
}

fn decode_sasl_payload(element: &Element) -> ConnectionResult<String> {
    let data = STANDARD
        .decode(element.text.trim())
        .map_err(|e| ProtocolError::AuthFailed {
            reason: format!("invalid base64 from server: {}", e),
        })?;
    String::from_utf8(data).map_err(|_| {
        ProtocolError::AuthFailed {
            reason: "server SASL payload is not UTF-8".to_string(),
        }
        .into()
    })
}

fn sasl_failure(element: &Element) -> ConnectionError {
    ProtocolError::AuthFailed {
        reason: stanza::error_condition(element).unwrap_or_else(|| "unknown failure".to_string()),
    }
    .into()
}

async fn authenticate(
    stream: &mut XmppStream,
    features: &Element,
    settings: &SessionSettings,
) -> ConnectionResult<()> {
    let offered: Vec<&str> = features
        .child_ns("mechanisms", ns::SASL)
        .map(|m| {
            m.children
                .iter()
                .filter(|c| c.name == "mechanism")
                .map(|c| c.text.trim())
                .collect()
        })
        .unwrap_or_default();

    let mechanism = sasl::select_mechanism(&offered).ok_or_else(|| ProtocolError::Unsupported {
        feature: format!("any known SASL mechanism (offered: {})", offered.join(", ")),
    })?;
    debug!("Authenticating with {}", mechanism.name());

    let username = jid::localpart(&settings.account).unwrap_or(&settings.account);

    match mechanism.scram_hash() {
        None => {
            let auth = sasl_element("auth", &sasl::plain_response(username, &settings.password))
                .with_attr("mechanism", mechanism.name());
            send(stream, auth).await?;
            let reply = next_stanza(stream).await?;
            match reply.name.as_str() {
                "success" => {}
                "failure" => return Err(sasl_failure(&reply)),
                _ => return Err(unexpected("SASL success", &reply).into()),
            }
        }
        Some(hash) => {
            let mut scram = ScramClient::new(hash, username, &settings.password);
            let auth = sasl_element("auth", scram.client_first().as_bytes())
                .with_attr("mechanism", mechanism.name());
            send(stream, auth).await?;

            let challenge = next_stanza(stream).await?;
            match challenge.name.as_str() {
                "challenge" => {}
                "failure" => return Err(sasl_failure(&challenge)),
                _ => return Err(unexpected("SASL challenge", &challenge).into()),
            }
            let client_final = scram.client_final(&decode_sasl_payload(&challenge)?)?;
            send(stream, sasl_element("response", client_final.as_bytes())).await?;

            // Servers deliver server-final either in <success/> or in a last challenge
            let mut verified = false;
            loop {
                let reply = next_stanza(stream).await?;
                match reply.name.as_str() {
                    "challenge" => {
                        scram.verify_server_final(&decode_sasl_payload(&reply)?)?;
                        verified = true;
                        send(stream, sasl_element("response", &[])).await?;
                    }
                    "success" => {
                        if !verified {
                            scram.verify_server_final(&decode_sasl_payload(&reply)?)?;
                        }
                        break;
                    }
                    "failure" => return Err(sasl_failure(&reply)),
                    _ => return Err(unexpected("SASL success", &reply).into()),
                }
            }
        }
    }

    info!("Authenticated as {} using {}", settings.account, mechanism.name());
    Ok(())
}

/// Wait for the result of an IQ we sent, skipping unrelated stanzas.
async fn await_iq_result(stream: &mut XmppStream, id: &str) -> ConnectionResult<Element> {
    loop {
        let reply = next_stanza(stream).await?;
        if reply.name != "iq" || reply.attr("id") != Some(id) {
            debug!("Skipping <{}> while waiting for iq {}", reply.name, id);
            continue;
        }
        return match reply.attr("type") {
            Some("result") => Ok(reply),
            _ => Err(ProtocolError::UnexpectedStanza {
                expected: format!("result for iq {}", id),
                actual: reply
                    .child("error")
                    .and_then(stanza::error_condition)
                    .unwrap_or_else(|| "iq error".to_string()),
            }
            .into()),
        };
    }
}

async fn bind_resource(stream: &mut XmppStream, resource: &str) -> ConnectionResult<String> {
    let request = Element::new("iq")
        .with_attr("type", "set")
        .with_attr("id", "bind_1")
        .with_child(
            Element::new("bind")
                .with_attr("xmlns", ns::BIND)
                .with_child(Element::new("resource").with_text(resource)),
        );
    send(stream, request).await?;

    let reply = await_iq_result(stream, "bind_1").await?;
    reply
        .child_ns("bind", ns::BIND)
        .and_then(|bind| bind.child("jid"))
        .map(|jid| jid.text.trim().to_string())
        .ok_or_else(|| unexpected("bound jid", &reply).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
        xmlns:stream='http://etherx.jabber.org/streams' id='s1' from='example.org' version='1.0'>";
    const CLIENT_HEADER: &str = "<?xml version='1.0'?><stream:stream to='example.org' \
        version='1.0' xml:lang='en' xmlns='jabber:client' \
        xmlns:stream='http://etherx.jabber.org/streams'>";

    fn settings(starttls: bool) -> SessionSettings {
        SessionSettings {
            host: "example.org".to_string(),
            port: 5222,
            account: "bridge@example.org".to_string(),
            password: "secret".to_string(),
            resource: "parlor".to_string(),
            starttls,
            room: "lounge@conference.example.org".to_string(),
            nick: "bridge".to_string(),
            status_message: None,
        }
    }

    fn plain_features() -> String {
        format!(
            "{}<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms></stream:features>",
            SERVER_HEADER
        )
    }

    fn plain_auth() -> String {
        format!(
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{}</auth>",
            STANDARD.encode(b"\0bridge\0secret")
        )
    }

    #[tokio::test]
    async fn test_plain_session_bind_and_join() {
        let bind_features = format!(
            "{}<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             <session xmlns='urn:ietf:params:xml:ns:xmpp-session'><optional/></session>\
             </stream:features>",
            SERVER_HEADER
        );
        let mock = Builder::new()
            .write(CLIENT_HEADER.as_bytes())
            .read(plain_features().as_bytes())
            .write(plain_auth().as_bytes())
            .read(b"<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
            .write(CLIENT_HEADER.as_bytes())
            .read(bind_features.as_bytes())
            .write(
                b"<iq type='set' id='bind_1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                  <resource>parlor</resource></bind></iq>",
            )
            .read(
                b"<iq type='result' id='bind_1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                  <jid>bridge@example.org/parlor</jid></bind></iq>",
            )
            .write(b"<presence><show>chat</show></presence>")
            .write(
                b"<presence to='lounge@conference.example.org/bridge'>\
                  <x xmlns='http://jabber.org/protocol/muc'><history maxchars='0'/></x></presence>",
            )
            .build();

        let session = establish(Box::new(mock), &settings(false)).await.unwrap();
        assert_eq!(session.bound_jid, "bridge@example.org/parlor");
    }

    #[tokio::test]
    async fn test_starttls_required_but_not_offered() {
        let mock = Builder::new()
            .write(CLIENT_HEADER.as_bytes())
            .read(plain_features().as_bytes())
            .build();

        let result = establish(Box::new(mock), &settings(true)).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ProtocolError::Unsupported { .. }))
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_reported() {
        let mock = Builder::new()
            .write(CLIENT_HEADER.as_bytes())
            .read(plain_features().as_bytes())
            .write(plain_auth().as_bytes())
            .read(
                b"<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/>\
                  <text>Bad password</text></failure>",
            )
            .build();

        match establish(Box::new(mock), &settings(false)).await {
            Err(ConnectionError::Protocol(ProtocolError::AuthFailed { reason })) => {
                assert_eq!(reason, "not-authorized")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("authentication should fail"),
        }
    }

    #[tokio::test]
    async fn test_stream_error_during_negotiation() {
        let mock = Builder::new()
            .write(CLIENT_HEADER.as_bytes())
            .read(
                format!(
                    "{}<stream:error><host-unknown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
                     </stream:error>",
                    SERVER_HEADER
                )
                .as_bytes(),
            )
            .build();

        match establish(Box::new(mock), &settings(false)).await {
            Err(ConnectionError::Protocol(ProtocolError::StreamError { condition })) => {
                assert_eq!(condition, "host-unknown")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("negotiation should fail"),
        }
    }
}
