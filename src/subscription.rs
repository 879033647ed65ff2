use crate::bus::{BusError, MessageId, SoftwareBus};
use crate::table::COPY_TABLE_ENTRIES;
use heapless::FnvIndexSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub subscribes: u32,
    pub unsubscribes: u32,
    pub failures: u32,
}

/// Tracks which input ids this application holds a bus subscription for, so that
/// each id is subscribed at most once no matter how many copy rules read from it.
///
/// An id whose unsubscribe failed stays active and is also marked retained, so a later
/// teardown can release it after the table that read it is gone.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    active: FnvIndexSet<MessageId, COPY_TABLE_ENTRIES>,
    retained: FnvIndexSet<MessageId, COPY_TABLE_ENTRIES>,
    stats: SubscriptionStats,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `id` unless already subscribed. On failure nothing changes.
    pub fn subscribe<B: SoftwareBus>(&mut self, bus: &mut B, id: MessageId) -> Result<(), BusError> {
        if self.active.contains(&id) {
            return Ok(());
        }
        if self.active.len() == COPY_TABLE_ENTRIES {
            self.stats.failures += 1;
            return Err(BusError::TooManySubscriptions { id });
        }

        match bus.subscribe(id) {
            Ok(()) => {
                // Capacity checked above
                let _ = self.active.insert(id);
                self.stats.subscribes += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.failures += 1;
                Err(e)
            }
        }
    }

    /// Drop the subscription to `id`. A failed unsubscribe leaves `id` active and retained.
    pub fn unsubscribe<B: SoftwareBus>(&mut self, bus: &mut B, id: MessageId) -> Result<(), BusError> {
        if !self.active.contains(&id) {
            return Ok(());
        }

        match bus.unsubscribe(id) {
            Ok(()) => {
                self.active.remove(&id);
                self.retained.remove(&id);
                self.stats.unsubscribes += 1;
                Ok(())
            }
            Err(e) => {
                // Retained is a subset of active, so it cannot be full here
                let _ = self.retained.insert(id);
                self.stats.failures += 1;
                Err(e)
            }
        }
    }

    pub fn is_subscribed(&self, id: MessageId) -> bool {
        self.active.contains(&id)
    }

    /// Whether `id` is still held only because releasing it failed.
    pub fn is_retained(&self, id: MessageId) -> bool {
        self.retained.contains(&id)
    }

    pub fn retained(&self) -> impl Iterator<Item = &MessageId> {
        self.retained.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageId> {
        self.active.iter()
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }
}
