//! Offline buffering and reconnect replay
//!
//! While the venue connection is down, outbound requests are held in a
//! bounded FIFO instead of being sent, and in-flight subscription and
//! order-registration requests are remembered by id so later control
//! messages can be correlated against them. A successful connect (or a
//! restored connection) triggers a [`Message::ProcessBuffered`], and the
//! buffered requests replay in their original order exactly once.

use crate::messages::{
    ExecutionReport, Message, OfflineMode, OrderCommand, OrderState, RequestId, SubscribeCommand,
};
use crate::normalize::error::NormalizeError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

const ENGINE: &str = "offline buffer";

/// Default cap on held messages; matches a deliberately generous session
/// burst
pub const DEFAULT_MAX_BUFFERED: usize = 10_000;

/// What to do with an outbound message, decided by the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineDecision {
    /// Send the message downward now
    Forward(Message),
    /// Held for replay after reconnect
    Buffered,
    /// Dropped entirely; keep-alives are worthless after the fact
    Dropped,
    /// Answered locally; these messages travel upward instead
    Replied(Vec<Message>),
    /// Replay batch: send these downward in order, exactly once
    Replay(Vec<Message>),
}

/// Side effects of an inbound connection event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InboundOutcome {
    /// Swallow the original message instead of passing it upward
    pub suppress: bool,
    /// Extra messages to emit upward after the original
    pub emit: Vec<Message>,
}

#[derive(Debug, Default)]
struct OfflineState {
    connected: bool,
    buffer: VecDeque<Message>,
    pending_subscriptions: HashMap<RequestId, SubscribeCommand>,
    pending_registrations: HashMap<RequestId, OrderCommand>,
}

impl OfflineState {
    fn store(&mut self, limit: Option<usize>, message: Message) -> Result<(), NormalizeError> {
        if let Some(limit) = limit
            && self.buffer.len() >= limit
        {
            return Err(NormalizeError::BufferFull { limit });
        }
        debug!(
            "Holding {} while offline ({} queued)",
            message.label(),
            self.buffer.len() + 1
        );
        self.buffer.push_back(message);
        Ok(())
    }

    /// Drop the buffered message carrying this id, if one is held
    fn remove_buffered(&mut self, request_id: RequestId) {
        if let Some(position) = self
            .buffer
            .iter()
            .position(|message| message.request_id() == Some(request_id))
        {
            self.buffer.remove(position);
        }
    }

    fn clear(&mut self) {
        self.connected = false;
        self.buffer.clear();
        self.pending_subscriptions.clear();
        self.pending_registrations.clear();
    }
}

/// Connectivity gate for the outbound lane.
///
/// One instance serves one connection and starts disconnected. Methods
/// take `&self`; a single internal lock serializes the two lanes.
///
/// # Thread Safety
///
/// All state lives behind one `Mutex`. The configured capacity is
/// immutable after construction.
#[derive(Debug)]
pub struct OfflineBuffer {
    inner: Mutex<OfflineState>,
    max_buffered: Option<usize>,
}

impl Default for OfflineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineBuffer {
    /// Create a buffer with the default capacity
    pub fn new() -> Self {
        Self::with_limit(Some(DEFAULT_MAX_BUFFERED))
    }

    /// Create a buffer with an explicit capacity; `None` means unbounded
    pub fn with_limit(max_buffered: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(OfflineState::default()),
            max_buffered,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, OfflineState>, NormalizeError> {
        self.inner
            .lock()
            .map_err(|_| NormalizeError::MutexPoisoned { engine: ENGINE })
    }

    /// Record connectivity observed on the inbound lane.
    pub fn set_connected(&self, connected: bool) -> Result<(), NormalizeError> {
        self.lock()?.connected = connected;
        Ok(())
    }

    /// Whether the venue connection is currently up.
    pub fn is_connected(&self) -> Result<bool, NormalizeError> {
        Ok(self.lock()?.connected)
    }

    /// Hold an outbound message for replay.
    ///
    /// # Errors
    ///
    /// `BufferFull` when the configured capacity is reached; the new
    /// message is rejected, never an old one evicted, so a later replay is
    /// a faithful prefix of what the caller sent.
    pub fn buffer_outbound(&self, message: Message) -> Result<(), NormalizeError> {
        self.lock()?.store(self.max_buffered, message)
    }

    /// Take every held message, in original order. The buffer is left
    /// empty; replaying twice cannot duplicate a request.
    pub fn drain_buffered(&self) -> Result<Vec<Message>, NormalizeError> {
        let mut state = self.lock()?;
        let batch: Vec<Message> = state.buffer.drain(..).collect();
        if !batch.is_empty() {
            info!("Replaying {} buffered messages", batch.len());
        }
        Ok(batch)
    }

    /// Remember an in-flight subscription by id.
    pub fn track_pending_subscription(
        &self,
        request_id: RequestId,
        command: SubscribeCommand,
    ) -> Result<(), NormalizeError> {
        self.lock()?
            .pending_subscriptions
            .insert(request_id, command);
        Ok(())
    }

    /// The original subscription request for an id, if one is in flight.
    pub fn resolve_pending_subscription(
        &self,
        request_id: RequestId,
    ) -> Result<Option<SubscribeCommand>, NormalizeError> {
        Ok(self.lock()?.pending_subscriptions.get(&request_id).cloned())
    }

    /// Remember an in-flight order registration by id.
    pub fn track_pending_registration(
        &self,
        request_id: RequestId,
        order: OrderCommand,
    ) -> Result<(), NormalizeError> {
        self.lock()?.pending_registrations.insert(request_id, order);
        Ok(())
    }

    /// The original registration request for an id, if one is in flight.
    pub fn resolve_pending_registration(
        &self,
        request_id: RequestId,
    ) -> Result<Option<OrderCommand>, NormalizeError> {
        Ok(self.lock()?.pending_registrations.get(&request_id).cloned())
    }

    /// Number of messages currently held.
    pub fn buffered_count(&self) -> Result<usize, NormalizeError> {
        Ok(self.lock()?.buffer.len())
    }

    /// Decide what happens to an outbound message.
    ///
    /// Control messages (connect, disconnect, reset) always travel;
    /// everything else travels only while connected. While disconnected,
    /// requests are held, keep-alives are dropped, and cancellations of
    /// requests that never left the buffer are answered locally without
    /// touching the wire.
    ///
    /// # Errors
    ///
    /// `BufferFull` when holding the message would exceed the capacity.
    pub fn handle_outbound(&self, message: Message) -> Result<OfflineDecision, NormalizeError> {
        let mut state = self.lock()?;
        match message {
            Message::Reset => {
                state.clear();
                Ok(OfflineDecision::Forward(Message::Reset))
            }
            Message::Connect { .. } | Message::Disconnect => {
                Ok(OfflineDecision::Forward(message))
            }
            Message::ProcessBuffered => {
                let batch: Vec<Message> = state.buffer.drain(..).collect();
                if !batch.is_empty() {
                    info!("Replaying {} buffered messages", batch.len());
                }
                Ok(OfflineDecision::Replay(batch))
            }
            _ if state.connected => Ok(OfflineDecision::Forward(message)),
            Message::Time { offline_mode } => match offline_mode {
                OfflineMode::Ignore => {
                    Ok(OfflineDecision::Forward(Message::Time { offline_mode }))
                }
                _ => {
                    trace!("Dropping keep-alive while offline");
                    Ok(OfflineDecision::Dropped)
                }
            },
            Message::Subscribe(command) => match command.offline_mode {
                OfflineMode::Ignore => Ok(OfflineDecision::Forward(Message::Subscribe(command))),
                OfflineMode::Cancel => {
                    debug!(
                        "Subscription {} refused while offline (cancel mode)",
                        command.request_id
                    );
                    Ok(OfflineDecision::Replied(vec![Message::SubscriptionFinished {
                        original_id: command.request_id,
                    }]))
                }
                OfflineMode::Buffer => {
                    state.store(self.max_buffered, Message::Subscribe(command.clone()))?;
                    state
                        .pending_subscriptions
                        .insert(command.request_id, command);
                    Ok(OfflineDecision::Buffered)
                }
            },
            Message::Unsubscribe {
                request_id,
                original_id,
            } => {
                if state.pending_subscriptions.remove(&original_id).is_some() {
                    state.remove_buffered(original_id);
                    debug!(
                        "Unsubscribe {} cancelled buffered subscription {}",
                        request_id, original_id
                    );
                    Ok(OfflineDecision::Replied(vec![
                        Message::SubscriptionResponse {
                            original_id: request_id,
                            error: None,
                        },
                    ]))
                } else {
                    state.store(
                        self.max_buffered,
                        Message::Unsubscribe {
                            request_id,
                            original_id,
                        },
                    )?;
                    Ok(OfflineDecision::Buffered)
                }
            }
            Message::RegisterOrder(order) => {
                state.store(self.max_buffered, Message::RegisterOrder(order.clone()))?;
                state.pending_registrations.insert(order.request_id, order);
                Ok(OfflineDecision::Buffered)
            }
            Message::CancelOrder {
                request_id,
                original_id,
            } => {
                if let Some(order) = state.pending_registrations.remove(&original_id) {
                    state.remove_buffered(original_id);
                    debug!(
                        "Cancel {} retired buffered order {}",
                        request_id, original_id
                    );
                    Ok(OfflineDecision::Replied(vec![Message::Execution(
                        ExecutionReport {
                            original_id: request_id,
                            order_state: OrderState::Done,
                            kind: order.kind,
                        },
                    )]))
                } else {
                    state.store(
                        self.max_buffered,
                        Message::CancelOrder {
                            request_id,
                            original_id,
                        },
                    )?;
                    Ok(OfflineDecision::Buffered)
                }
            }
            Message::ReplaceOrder {
                request_id,
                original_id,
                order,
            } => {
                if let Some(old) = state.pending_registrations.remove(&original_id) {
                    state.remove_buffered(original_id);
                    state.store(self.max_buffered, Message::RegisterOrder(order.clone()))?;
                    state.pending_registrations.insert(order.request_id, order);
                    debug!(
                        "Replace {} retired buffered order {} and queued its successor",
                        request_id, original_id
                    );
                    Ok(OfflineDecision::Replied(vec![Message::Execution(
                        ExecutionReport {
                            original_id: request_id,
                            order_state: OrderState::Done,
                            kind: old.kind,
                        },
                    )]))
                } else {
                    state.store(
                        self.max_buffered,
                        Message::ReplaceOrder {
                            request_id,
                            original_id,
                            order,
                        },
                    )?;
                    Ok(OfflineDecision::Buffered)
                }
            }
            other => {
                state.store(self.max_buffered, other)?;
                Ok(OfflineDecision::Buffered)
            }
        }
    }

    /// Track connection events seen on the inbound lane.
    ///
    /// A successful connect or a restored connection flips the gate open
    /// and asks for a replay; a lost connection that resets venue state is
    /// swallowed, since the consumer will be told to resubscribe instead.
    pub fn handle_inbound(&self, message: &Message) -> Result<InboundOutcome, NormalizeError> {
        let mut state = self.lock()?;
        match message {
            Message::Connect { error: None } => {
                state.connected = true;
                info!("Connection up, scheduling buffered replay");
                Ok(InboundOutcome {
                    suppress: false,
                    emit: vec![Message::ProcessBuffered],
                })
            }
            Message::Connect { error: Some(error) } => {
                state.connected = false;
                warn!("Connect failed: {}", error);
                Ok(InboundOutcome::default())
            }
            Message::Disconnect => {
                state.connected = false;
                Ok(InboundOutcome::default())
            }
            Message::ConnectionLost { reset_state } => {
                state.connected = false;
                warn!("Connection lost (reset_state: {})", reset_state);
                Ok(InboundOutcome {
                    suppress: *reset_state,
                    emit: Vec::new(),
                })
            }
            Message::ConnectionRestored => {
                state.connected = true;
                info!("Connection restored, scheduling buffered replay");
                Ok(InboundOutcome {
                    suppress: false,
                    emit: vec![Message::ProcessBuffered],
                })
            }
            _ => Ok(InboundOutcome::default()),
        }
    }

    /// Drop every held message, pending map and the connectivity flag.
    pub fn reset(&self) -> Result<(), NormalizeError> {
        self.lock()?.clear();
        Ok(())
    }
}
