//! Cross-instance transcript synchronisation.
//!
//! A [`SyncBus`] hands out one broadcast channel per conversation. Every open
//! tab holds a [`SyncChannel`] for its conversation and publishes
//! [`SyncEvent`]s on it; the other holders of the same channel receive them.
//! Delivery is at-most-once (slow listeners lose the oldest events) and FIFO
//! per publisher. The bus does no retrying, throttling or persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::ids::ConversationId;
use crate::core::message::Message;

pub const DEFAULT_CHANNEL_PREFIX: &str = "forkchat-sync-";
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEventKind {
    NewMessage,
    MessageDelta,
    TitleChange,
}

/// Message events carry a full snapshot of the message, never a fragment,
/// so any single delivered event is enough to converge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncPayload {
    Message(Message),
    Title(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub conversation_id: ConversationId,
    pub payload: SyncPayload,
    pub is_final: bool,
    pub timestamp: i64,
}

impl SyncEvent {
    pub fn new_message(message: &Message, timestamp: i64) -> Self {
        Self {
            kind: SyncEventKind::NewMessage,
            conversation_id: message.conversation_id.clone(),
            is_final: message.is_final(),
            payload: SyncPayload::Message(message.clone()),
            timestamp,
        }
    }

    pub fn message_delta(message: &Message, timestamp: i64) -> Self {
        Self {
            kind: SyncEventKind::MessageDelta,
            conversation_id: message.conversation_id.clone(),
            is_final: message.is_final(),
            payload: SyncPayload::Message(message.clone()),
            timestamp,
        }
    }

    pub fn title_change(
        conversation_id: ConversationId,
        title: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            kind: SyncEventKind::TitleChange,
            conversation_id,
            payload: SyncPayload::Title(title.into()),
            is_final: true,
            timestamp,
        }
    }

    /// The carried message, when kind and payload agree.
    pub fn message(&self) -> Option<&Message> {
        match (&self.kind, &self.payload) {
            (SyncEventKind::NewMessage | SyncEventKind::MessageDelta, SyncPayload::Message(m)) => {
                Some(m)
            }
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match (&self.kind, &self.payload) {
            (SyncEventKind::TitleChange, SyncPayload::Title(t)) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    event: Arc<SyncEvent>,
}

#[derive(Debug)]
struct ChannelShared {
    name: String,
    conversation_id: ConversationId,
    sender: broadcast::Sender<Envelope>,
}

struct BusInner {
    prefix: String,
    capacity: usize,
    channels: Mutex<HashMap<String, Weak<ChannelShared>>>,
    next_publisher: AtomicU64,
}

/// Registry of per-conversation channels.
///
/// Channels are created on first [`open`](SyncBus::open) and disappear once
/// the last [`SyncChannel`] handle for them is dropped.
#[derive(Clone)]
pub struct SyncBus {
    inner: Arc<BusInner>,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_PREFIX)
    }
}

impl SyncBus {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_capacity(prefix, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(prefix: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                prefix: prefix.into(),
                capacity: capacity.max(1),
                channels: Mutex::new(HashMap::new()),
                next_publisher: AtomicU64::new(1),
            }),
        }
    }

    pub fn channel_name(&self, conversation_id: &ConversationId) -> String {
        format!("{}{}", self.inner.prefix, conversation_id)
    }

    pub fn open(&self, conversation_id: &ConversationId) -> SyncChannel {
        let name = self.channel_name(conversation_id);
        let publisher_id = self.inner.next_publisher.fetch_add(1, Ordering::Relaxed);

        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels.retain(|_, weak| weak.strong_count() > 0);

        let shared = match channels.get(&name).and_then(Weak::upgrade) {
            Some(shared) => shared,
            None => {
                let (sender, _) = broadcast::channel(self.inner.capacity);
                let shared = Arc::new(ChannelShared {
                    name: name.clone(),
                    conversation_id: conversation_id.clone(),
                    sender,
                });
                channels.insert(name, Arc::downgrade(&shared));
                debug!(channel = %shared.name, "opened sync channel");
                shared
            }
        };

        SyncChannel {
            shared,
            publisher_id,
        }
    }

    /// Number of channels that still have at least one open handle.
    pub fn open_channel_count(&self) -> usize {
        let channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels.values().filter(|w| w.strong_count() > 0).count()
    }
}

/// One participant's handle on a conversation channel.
#[derive(Clone)]
pub struct SyncChannel {
    shared: Arc<ChannelShared>,
    publisher_id: u64,
}

impl SyncChannel {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.shared.conversation_id
    }

    /// Fan the event out to every other participant. Events for a different
    /// conversation are dropped.
    pub fn publish(&self, event: SyncEvent) {
        if event.conversation_id != self.shared.conversation_id {
            warn!(
                channel = %self.shared.name,
                event_conversation = %event.conversation_id,
                "dropping sync event for another conversation"
            );
            return;
        }
        // No receivers is fine: at-most-once delivery.
        let _ = self.shared.sender.send(Envelope {
            origin: self.publisher_id,
            event: Arc::new(event),
        });
    }

    /// A pull-style receiver of events published by other participants.
    pub fn listen(&self) -> SyncListener {
        SyncListener {
            rx: self.shared.sender.subscribe(),
            own_publisher: self.publisher_id,
            conversation_id: self.shared.conversation_id.clone(),
        }
    }

    /// Run `handler` for every event published by other participants until
    /// the returned subscription is dropped or the channel closes.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        let mut listener = self.listen();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = listener.recv() => event,
                };
                match event {
                    Some(event) => handler(event),
                    None => break,
                }
            }
        });
        Subscription { cancel, handle }
    }
}

pub struct SyncListener {
    rx: broadcast::Receiver<Envelope>,
    own_publisher: u64,
    conversation_id: ConversationId,
}

impl SyncListener {
    /// Next foreign event, or `None` once every channel handle is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, conversation = %self.conversation_id, "sync listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if let Some(event) = self.accept(envelope) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, conversation = %self.conversation_id, "sync listener lagged");
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&self, envelope: Envelope) -> Option<SyncEvent> {
        if envelope.origin == self.own_publisher
            || envelope.event.conversation_id != self.conversation_id
        {
            return None;
        }
        Some(Arc::unwrap_or_clone(envelope.event))
    }
}

/// Handle returned by [`SyncChannel::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
