//! Per-subscriber message fan-out.
//!
//! This module delivers normalized messages to subscriber channels through a
//! trait-based design, with implementations for both standard library
//! (`FanoutStd`) and Tokio (`FanoutTokio`) channels. Book and level1 updates
//! are routed by the request ids stamped on them; messages carrying a single
//! id go to that subscriber; id-less control messages go to everyone.

use crate::messages::{Message, RequestId};
use dashmap::DashMap;
use tracing::{debug, error, info};

/// Trait for routing normalized messages to per-subscriber channels.
///
/// This trait defines the channel-independent surface; `subscribe` lives on
/// the concrete types because the receiver half differs per channel family.
pub trait Fanout {
    /// Deliver one message, cloning it per matched subscriber.
    ///
    /// Returns the number of channels the message was handed to. Channels
    /// whose receiver has been dropped are pruned on the way.
    fn dispatch(&self, message: &Message) -> usize;

    /// Drop a subscriber's channel. Returns `false` if the id was unknown.
    fn unsubscribe(&self, request_id: RequestId) -> bool;

    /// Check if a channel exists for a specific request id.
    fn has_subscriber(&self, request_id: RequestId) -> bool;

    /// Ids with a live channel, in no particular order.
    fn subscriber_ids(&self) -> Vec<RequestId>;

    /// Number of registered channels.
    fn subscriber_count(&self) -> usize;
}

/// Ids a message should reach, or `None` when it names no fan-out list
fn route_of(message: &Message) -> Option<&[RequestId]> {
    match message {
        Message::Book(book) => Some(&book.subscription_ids),
        Message::Level1(update) => Some(&update.subscription_ids),
        _ => None,
    }
}

/// Fanout implementation using standard library mpsc channels.
#[derive(Debug)]
pub struct FanoutStd {
    /// Subscriber channels indexed by request id
    channels: DashMap<RequestId, std::sync::mpsc::Sender<Message>>,
}

impl FanoutStd {
    /// Create a fan-out with no subscribers.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Open a channel for a request id and hand back its receiving half.
    ///
    /// Registering an id twice replaces the previous channel; the old
    /// receiver sees a disconnect.
    pub fn subscribe(&self, request_id: RequestId) -> std::sync::mpsc::Receiver<Message> {
        let (sender, receiver) = std::sync::mpsc::channel();
        self.channels.insert(request_id, sender);
        info!("Added channel for subscriber {}", request_id);
        receiver
    }

    fn send_to(
        &self,
        request_id: RequestId,
        message: &Message,
        dead: &mut Vec<RequestId>,
    ) -> usize {
        match self.channels.get(&request_id) {
            Some(sender) => {
                if sender.send(message.clone()).is_ok() {
                    1
                } else {
                    dead.push(request_id);
                    0
                }
            }
            None => {
                debug!("No channel for subscriber {}", request_id);
                0
            }
        }
    }
}

impl Fanout for FanoutStd {
    fn dispatch(&self, message: &Message) -> usize {
        let mut delivered = 0;
        let mut dead: Vec<RequestId> = Vec::new();

        match route_of(message) {
            Some(ids) => {
                for id in ids {
                    delivered += self.send_to(*id, message, &mut dead);
                }
            }
            None => match message.request_id() {
                Some(id) => delivered += self.send_to(id, message, &mut dead),
                None => {
                    for entry in self.channels.iter() {
                        if entry.value().send(message.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            dead.push(*entry.key());
                        }
                    }
                }
            },
        }

        for id in dead {
            error!("Subscriber {} channel closed, dropping it", id);
            self.channels.remove(&id);
        }
        delivered
    }

    fn unsubscribe(&self, request_id: RequestId) -> bool {
        let removed = self.channels.remove(&request_id).is_some();
        if removed {
            info!("Removed channel for subscriber {}", request_id);
        }
        removed
    }

    fn has_subscriber(&self, request_id: RequestId) -> bool {
        self.channels.contains_key(&request_id)
    }

    fn subscriber_ids(&self) -> Vec<RequestId> {
        self.channels.iter().map(|entry| *entry.key()).collect()
    }

    fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for FanoutStd {
    fn default() -> Self {
        Self::new()
    }
}

/// Fanout implementation using Tokio unbounded mpsc channels.
#[derive(Debug)]
pub struct FanoutTokio {
    /// Subscriber channels indexed by request id
    channels: DashMap<RequestId, tokio::sync::mpsc::UnboundedSender<Message>>,
}

impl FanoutTokio {
    /// Create a fan-out with no subscribers.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Open a channel for a request id and hand back its receiving half.
    ///
    /// Registering an id twice replaces the previous channel; the old
    /// receiver sees a disconnect.
    pub fn subscribe(
        &self,
        request_id: RequestId,
    ) -> tokio::sync::mpsc::UnboundedReceiver<Message> {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        self.channels.insert(request_id, sender);
        info!("Added channel for subscriber {}", request_id);
        receiver
    }

    fn send_to(
        &self,
        request_id: RequestId,
        message: &Message,
        dead: &mut Vec<RequestId>,
    ) -> usize {
        match self.channels.get(&request_id) {
            Some(sender) => {
                if sender.send(message.clone()).is_ok() {
                    1
                } else {
                    dead.push(request_id);
                    0
                }
            }
            None => {
                debug!("No channel for subscriber {}", request_id);
                0
            }
        }
    }
}

impl Fanout for FanoutTokio {
    fn dispatch(&self, message: &Message) -> usize {
        let mut delivered = 0;
        let mut dead: Vec<RequestId> = Vec::new();

        match route_of(message) {
            Some(ids) => {
                for id in ids {
                    delivered += self.send_to(*id, message, &mut dead);
                }
            }
            None => match message.request_id() {
                Some(id) => delivered += self.send_to(id, message, &mut dead),
                None => {
                    for entry in self.channels.iter() {
                        if entry.value().send(message.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            dead.push(*entry.key());
                        }
                    }
                }
            },
        }

        for id in dead {
            error!("Subscriber {} channel closed, dropping it", id);
            self.channels.remove(&id);
        }
        delivered
    }

    fn unsubscribe(&self, request_id: RequestId) -> bool {
        let removed = self.channels.remove(&request_id).is_some();
        if removed {
            info!("Removed channel for subscriber {}", request_id);
        }
        removed
    }

    fn has_subscriber(&self, request_id: RequestId) -> bool {
        self.channels.contains_key(&request_id)
    }

    fn subscriber_ids(&self) -> Vec<RequestId> {
        self.channels.iter().map(|entry| *entry.key()).collect()
    }

    fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for FanoutTokio {
    fn default() -> Self {
        Self::new()
    }
}
