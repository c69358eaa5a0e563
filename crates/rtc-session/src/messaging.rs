//! Messaging Channel.
//!
//! Chat messages travel over the connection's ordered, reliable data
//! channel as JSON frames:
//!
//! ```text
//! {"frame":"chat","message":{...}}
//! {"frame":"receipt","message_id":"...","status":"delivered"}
//! ```
//!
//! Sending requires an open channel on a connected transport and never
//! queues. Receiving is a push stream in transport order, deduplicated by
//! message id.

use crate::errors::RtcError;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Chat message content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
    Voice,
    Image,
}

/// Delivery progress flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFlags {
    pub sent: bool,
    pub delivered: bool,
    pub read: bool,
}

/// An application chat message.
///
/// Only `flags` changes after delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub flags: DeliveryFlags,
    #[serde(default)]
    pub encrypted: bool,
}

impl ChatMessage {
    /// New text message with a fresh id.
    #[must_use]
    pub fn text(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
            timestamp: Utc::now(),
            flags: DeliveryFlags::default(),
            encrypted: false,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    #[must_use]
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }
}

/// Receipt kinds carried back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }
}

/// Data channel wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum DataChannelFrame {
    Chat {
        message: ChatMessage,
    },
    Receipt {
        message_id: String,
        status: DeliveryStatus,
    },
}

impl DataChannelFrame {
    pub fn encode(&self) -> Result<Bytes, RtcError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(data: &[u8]) -> Result<Self, RtcError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Acknowledgment that a message was written to the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Bounded set of recently seen message ids.
#[derive(Debug)]
pub struct MessageDeduplicator {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl MessageDeduplicator {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` if `id` was not seen before. Oldest ids are evicted
    /// once the window is full.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Inbound chat messages for one connection, in transport order.
///
/// Ends when the connection closes.
#[derive(Debug)]
pub struct MessageStream {
    receiver: mpsc::UnboundedReceiver<ChatMessage>,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChatMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for MessageStream {
    type Item = ChatMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Subscriber list for a connection's inbound messages.
#[derive(Debug, Default)]
pub struct MessageFanout {
    subscribers: Vec<mpsc::UnboundedSender<ChatMessage>>,
}

impl MessageFanout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        MessageStream { receiver: rx }
    }

    /// Deliver to every live subscriber, dropping the ones that went away.
    pub fn publish(&mut self, message: &ChatMessage) {
        self.subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// End all streams.
    pub fn close(&mut self) {
        self.subscribers.clear();
    }
}
