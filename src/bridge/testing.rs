//! In-memory port implementations for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::bridge::ports::{ChannelSink, GroupchatSink, MessageLookup};
use crate::common::error::{ConnectionError, ConnectionResult, DiscordError, DiscordResult};
use crate::common::ReferencedMessage;

#[derive(Default)]
pub struct FakeLookup {
    messages: HashMap<(u64, u64), ReferencedMessage>,
    channels: HashMap<u64, String>,
    calls: AtomicUsize,
}

impl FakeLookup {
    pub fn with_message(mut self, channel_id: u64, message_id: u64, msg: ReferencedMessage) -> Self {
        self.messages.insert((channel_id, message_id), msg);
        self
    }

    pub fn with_channel(mut self, channel_id: u64, name: &str) -> Self {
        self.channels.insert(channel_id, name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageLookup for FakeLookup {
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> DiscordResult<ReferencedMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .get(&(channel_id, message_id))
            .cloned()
            .ok_or(DiscordError::MessageNotFound {
                channel_id,
                message_id,
            })
    }

    async fn fetch_channel_name(&self, channel_id: u64) -> DiscordResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.channels
            .get(&channel_id)
            .cloned()
            .ok_or(DiscordError::UnnamedChannel { channel_id })
    }
}

/// Records everything sent through it. `closed` makes every send fail.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, String)>>,
    pub closed: bool,
}

impl RecordingSink {
    pub fn closed() -> Self {
        Self {
            closed: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl GroupchatSink for RecordingSink {
    async fn send_groupchat(&self, room: &str, text: &str) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::ConnectionClosed);
        }
        self.sent
            .lock()
            .unwrap()
            .push((room.to_string(), text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn send_text(&self, text: &str) -> DiscordResult<()> {
        if self.closed {
            return Err(DiscordError::UnnamedChannel { channel_id: 0 });
        }
        self.sent
            .lock()
            .unwrap()
            .push((String::new(), text.to_string()));
        Ok(())
    }
}
