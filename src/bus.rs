//! Software bus boundary.
//!
//! The aggregation engine never owns a transport. It talks to the bus through the
//! [`SoftwareBus`] trait: subscribe/unsubscribe input ids, publish combined packets,
//! read the bus clock and pull the next message from the application pipe.
//! [`LocalBus`] is a single-process implementation used by the simulator and tests.

use alloc::collections::VecDeque;
use core::fmt;
use heapless::FnvIndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of distinct ids a [`LocalBus`] pipe can be subscribed to.
pub const MAX_BUS_SUBSCRIPTIONS: usize = 256;
const MAX_INJECTED_FAULTS: usize = 16;

/// Software bus message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u16);

impl MessageId {
    /// Reserved id marking an unused copy-table slot.
    pub const UNDEFINED: MessageId = MessageId(0);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_defined(self) -> bool {
        self.0 != Self::UNDEFINED.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for MessageId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// A message as seen by the receiving application: its id and the full packet bytes.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    pub id: MessageId,
    pub data: &'a [u8],
}

impl<'a> InboundMessage<'a> {
    pub fn new(id: MessageId, data: &'a [u8]) -> Self {
        Self { id, data }
    }

    /// Total message length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Owned message sitting in a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: MessageId,
    #[serde(with = "serde_bytes")]
    pub data: alloc::vec::Vec<u8>,
}

impl BusMessage {
    pub fn new(id: MessageId, data: alloc::vec::Vec<u8>) -> Self {
        Self { id, data }
    }

    pub fn as_inbound(&self) -> InboundMessage<'_> {
        InboundMessage::new(self.id, &self.data)
    }
}

/// A packet that went out on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPacket {
    pub id: MessageId,
    pub published_at_ms: u64,
    #[serde(with = "serde_bytes")]
    pub data: alloc::vec::Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("subscription to {id} rejected by the bus")]
    SubscriptionRejected { id: MessageId },
    #[error("unsubscribe from {id} rejected by the bus")]
    UnsubscribeRejected { id: MessageId },
    #[error("subscription table full, cannot subscribe to {id}")]
    TooManySubscriptions { id: MessageId },
    #[error("pipe overflow, dropped message {id}")]
    PipeOverflow { id: MessageId },
    #[error("publish of {id} failed")]
    PublishFailed { id: MessageId },
}

/// Operations the engine needs from the publish/subscribe transport.
pub trait SoftwareBus {
    fn subscribe(&mut self, id: MessageId) -> Result<(), BusError>;
    fn unsubscribe(&mut self, id: MessageId) -> Result<(), BusError>;
    fn publish(&mut self, id: MessageId, data: &[u8]) -> Result<(), BusError>;
    /// Bus time in milliseconds, used to stamp outgoing packets.
    fn current_time_ms(&self) -> u64;
    /// Next message waiting on the application pipe, if any.
    fn receive(&mut self) -> Option<BusMessage>;
}

/// Call counters kept by [`LocalBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub subscribe_calls: u32,
    pub unsubscribe_calls: u32,
    pub publish_calls: u32,
    pub delivered: u32,
    pub dropped_unsubscribed: u32,
    pub dropped_overflow: u32,
}

/// In-process bus with a single bounded application pipe.
///
/// Only messages whose id is subscribed are queued on the pipe. Subscribe and publish
/// failures can be injected per id to exercise the engine's error paths.
#[derive(Debug)]
pub struct LocalBus {
    subscriptions: FnvIndexSet<MessageId, MAX_BUS_SUBSCRIPTIONS>,
    pipe: VecDeque<BusMessage>,
    pipe_depth: usize,
    published: alloc::vec::Vec<PublishedPacket>,
    clock_ms: u64,
    stats: BusStats,

    reject_subscribe: FnvIndexSet<MessageId, MAX_INJECTED_FAULTS>,
    reject_unsubscribe: FnvIndexSet<MessageId, MAX_INJECTED_FAULTS>,
    fail_publish: bool,
}

impl LocalBus {
    pub fn new(pipe_depth: usize) -> Self {
        Self {
            subscriptions: FnvIndexSet::new(),
            pipe: VecDeque::with_capacity(pipe_depth),
            pipe_depth,
            published: alloc::vec::Vec::new(),
            clock_ms: 0,
            stats: BusStats::default(),
            reject_subscribe: FnvIndexSet::new(),
            reject_unsubscribe: FnvIndexSet::new(),
            fail_publish: false,
        }
    }

    /// Offer a message to the pipe. Returns `Ok(false)` when nobody subscribed to it.
    pub fn deliver(&mut self, message: BusMessage) -> Result<bool, BusError> {
        if !self.subscriptions.contains(&message.id) {
            self.stats.dropped_unsubscribed += 1;
            return Ok(false);
        }
        if self.pipe.len() >= self.pipe_depth {
            self.stats.dropped_overflow += 1;
            return Err(BusError::PipeOverflow { id: message.id });
        }
        self.pipe.push_back(message);
        self.stats.delivered += 1;
        Ok(true)
    }

    pub fn is_subscribed(&self, id: MessageId) -> bool {
        self.subscriptions.contains(&id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &MessageId> {
        self.subscriptions.iter()
    }

    pub fn pending(&self) -> usize {
        self.pipe.len()
    }

    pub fn published(&self) -> &[PublishedPacket] {
        &self.published
    }

    pub fn take_published(&mut self) -> alloc::vec::Vec<PublishedPacket> {
        core::mem::take(&mut self.published)
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn set_time_ms(&mut self, now_ms: u64) {
        self.clock_ms = now_ms;
    }

    pub fn advance_time_ms(&mut self, delta_ms: u64) {
        self.clock_ms = self.clock_ms.saturating_add(delta_ms);
    }

    pub fn reject_subscriptions_to(&mut self, id: MessageId) {
        let _ = self.reject_subscribe.insert(id);
    }

    pub fn reject_unsubscriptions_from(&mut self, id: MessageId) {
        let _ = self.reject_unsubscribe.insert(id);
    }

    pub fn set_publish_failure(&mut self, fail: bool) {
        self.fail_publish = fail;
    }

    pub fn clear_faults(&mut self) {
        self.reject_subscribe.clear();
        self.reject_unsubscribe.clear();
        self.fail_publish = false;
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PIPE_DEPTH)
    }
}

impl SoftwareBus for LocalBus {
    fn subscribe(&mut self, id: MessageId) -> Result<(), BusError> {
        self.stats.subscribe_calls += 1;
        if self.reject_subscribe.contains(&id) {
            return Err(BusError::SubscriptionRejected { id });
        }
        self.subscriptions
            .insert(id)
            .map(|_| ())
            .map_err(|_| BusError::TooManySubscriptions { id })
    }

    fn unsubscribe(&mut self, id: MessageId) -> Result<(), BusError> {
        self.stats.unsubscribe_calls += 1;
        if self.reject_unsubscribe.contains(&id) {
            return Err(BusError::UnsubscribeRejected { id });
        }
        self.subscriptions.remove(&id);
        Ok(())
    }

    fn publish(&mut self, id: MessageId, data: &[u8]) -> Result<(), BusError> {
        self.stats.publish_calls += 1;
        if self.fail_publish {
            return Err(BusError::PublishFailed { id });
        }
        self.published.push(PublishedPacket {
            id,
            published_at_ms: self.clock_ms,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn current_time_ms(&self) -> u64 {
        self.clock_ms
    }

    fn receive(&mut self) -> Option<BusMessage> {
        self.pipe.pop_front()
    }
}
