//! Room client: owns the XMPP connection for the lifetime of a session.

use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::bridge::ports::GroupchatSink;
use crate::common::error::{ConnectionError, ConnectionResult, ProtocolError};
use crate::common::{OutgoingGroupchat, PresenceKind, PresenceUpdate, XmppEvent};
use crate::protocol::xmpp::codec::{Frame, Packet};
use crate::protocol::xmpp::stanza::{self, Element};
use crate::protocol::xmpp::{connect_and_join, jid, SessionSettings, XmppSession, XmppStream};

/// Idle interval after which a whitespace keepalive is sent.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// Exponential backoff for reconnecting to the XMPP server.
/// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
fn reconnect_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(MAX_RECONNECT_DELAY)
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

/// Channels connecting the room client to the rest of the application.
pub struct MucChannels {
    /// Inbound events for the relay. Unparsable stanzas arrive as errors.
    pub event_tx: mpsc::UnboundedSender<Result<XmppEvent, ProtocolError>>,
    /// Groupchat messages to send.
    pub outgoing_rx: mpsc::UnboundedReceiver<OutgoingGroupchat>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Cloneable send handle for the room.
#[derive(Debug, Clone)]
pub struct XmppHandle {
    outgoing_tx: mpsc::UnboundedSender<OutgoingGroupchat>,
}

impl XmppHandle {
    pub fn new(outgoing_tx: mpsc::UnboundedSender<OutgoingGroupchat>) -> Self {
        Self { outgoing_tx }
    }
}

#[async_trait]
impl GroupchatSink for XmppHandle {
    async fn send_groupchat(&self, room: &str, text: &str) -> ConnectionResult<()> {
        self.outgoing_tx
            .send(OutgoingGroupchat {
                room: room.to_string(),
                text: text.to_string(),
            })
            .map_err(|_| ConnectionError::ConnectionClosed)
    }
}

pub struct MucClient {
    settings: SessionSettings,
    channels: MucChannels,
}

impl MucClient {
    pub fn new(settings: SessionSettings, channels: MucChannels) -> Self {
        Self { settings, channels }
    }

    /// Run sessions until shutdown, reconnecting whenever one is lost.
    pub async fn run_with_reconnect(mut self, first: XmppSession) {
        let mut session = first;
        let mut backoff = reconnect_backoff();

        loop {
            match self.run(session).await {
                Ok(()) => {
                    info!("XMPP client stopped");
                    return;
                }
                Err(e) => error!("XMPP session lost: {}", e),
            }

            session = loop {
                let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                info!("Reconnecting in {:.1} seconds...", delay.as_secs_f64());

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = self.channels.shutdown_rx.changed() => {
                        if changed.is_err() || *self.channels.shutdown_rx.borrow() {
                            info!("Shutdown signal received during backoff");
                            return;
                        }
                    }
                }

                match connect_and_join(&self.settings).await {
                    Ok(session) => {
                        backoff = reconnect_backoff();
                        break session;
                    }
                    Err(e) => error!("Reconnect failed: {}", e),
                }
            };

            let dropped = self.drop_stale_requests();
            if dropped > 0 {
                warn!(
                    "Dropped {} message(s) queued while the XMPP session was down",
                    dropped
                );
            }
        }
    }

    /// Discard groupchat requests queued while disconnected.
    pub fn drop_stale_requests(&mut self) -> usize {
        let mut dropped = 0;
        while self.channels.outgoing_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Serve one session. Returns `Ok(())` after a graceful shutdown.
    pub async fn run(&mut self, session: XmppSession) -> ConnectionResult<()> {
        let XmppSession {
            mut stream,
            bound_jid,
        } = session;
        debug!("Session running as {}", bound_jid);

        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
            KEEPALIVE_INTERVAL,
        );
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.channels.shutdown_rx.changed() => {
                    if changed.is_err() || *self.channels.shutdown_rx.borrow() {
                        self.leave(&mut stream).await;
                        return Ok(());
                    }
                }

                Some(request) = self.channels.outgoing_rx.recv() => {
                    debug!("Sending groupchat to {}", request.room);
                    stream
                        .send(Packet::Stanza(stanza::groupchat(&request.room, &request.text)))
                        .await?;
                    keepalive.reset();
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Frame::Stanza(bytes))) => self.handle_stanza(&mut stream, &bytes).await?,
                        Some(Ok(Frame::StreamOpen(_))) => debug!("Ignoring unexpected stream header"),
                        Some(Ok(Frame::StreamClose)) | None => return Err(ConnectionError::ConnectionClosed),
                        Some(Err(e)) => return Err(e.into()),
                    }
                }

                _ = keepalive.tick() => {
                    stream.send(Packet::Whitespace).await?;
                }
            }
        }
    }

    async fn handle_stanza(&self, stream: &mut XmppStream, bytes: &[u8]) -> ConnectionResult<()> {
        let element = match Element::parse(bytes) {
            Ok(element) => element,
            Err(e) => {
                // One bad stanza does not end the session
                self.emit(Err(e));
                return Ok(());
            }
        };

        match element.name.as_str() {
            "stream:error" => Err(ProtocolError::StreamError {
                condition: stanza::error_condition(&element)
                    .unwrap_or_else(|| "undefined-condition".to_string()),
            }
            .into()),
            "iq" => {
                if let Some(response) = stanza::iq_response(&element) {
                    debug!(
                        "Answering iq {} from {}",
                        element.attr("id").unwrap_or_default(),
                        element.attr("from").unwrap_or_default()
                    );
                    stream.send(Packet::Stanza(response)).await?;
                }
                Ok(())
            }
            _ => {
                let event = stanza::classify(&element);
                let removed = match event {
                    XmppEvent::Presence(ref presence) => self.log_room_presence(presence),
                    _ => false,
                };
                self.emit(Ok(event));
                if removed {
                    // Drop the session so the reconnect loop rejoins after a backoff
                    return Err(ConnectionError::RemovedFromRoom {
                        room: self.settings.room.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    fn emit(&self, event: Result<XmppEvent, ProtocolError>) {
        if self.channels.event_tx.send(event).is_err() {
            debug!("XMPP event receiver closed");
        }
    }

    /// Log join confirmations and failures for our own occupant.
    ///
    /// Returns true when the presence removes us from the room.
    fn log_room_presence(&self, presence: &PresenceUpdate) -> bool {
        if !jid::same_bare(&presence.from, &self.settings.room) {
            return false;
        }
        let own = jid::occupant_nick(&presence.from) == self.settings.nick || presence.is_self();

        match presence.kind {
            PresenceKind::Available if presence.is_self() => {
                info!("Joined room {} as {}", self.settings.room, self.settings.nick);
            }
            PresenceKind::Unavailable if presence.is_self() => {
                warn!(
                    "Removed from room {} (status {:?})",
                    self.settings.room, presence.status_codes
                );
                return true;
            }
            PresenceKind::Error if own => {
                error!(
                    "Failed to join room {}: {}",
                    self.settings.room,
                    presence.error_condition.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
        false
    }

    async fn leave(&self, stream: &mut XmppStream) {
        info!("Leaving room {}", self.settings.room);
        let result = async {
            stream
                .send(Packet::Stanza(stanza::muc_leave(
                    &self.settings.room,
                    &self.settings.nick,
                )))
                .await?;
            stream.send(Packet::StreamEnd).await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to close XMPP stream cleanly: {}", e);
        }
    }
}
