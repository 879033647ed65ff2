//! Aggregation engine context.
//!
//! [`Engine`] owns everything one table generation needs: the active copy table, the
//! index-aligned runtime table, the buffer pool, the group map from output id to the
//! single buffer that group owns, the subscription bookkeeping and the bus. The
//! operations live next to the component they implement:
//!
//! - [`builder`](crate::builder): `activate_table` / `deactivate_table`
//! - [`copier`](crate::copier): `on_inbound_message`
//! - [`sender`](crate::sender): `send_combined`
//! - [`lifecycle`](crate::lifecycle): `check_status_of_tables`

use crate::bus::{MessageId, SoftwareBus};
use crate::events::EventLog;
use crate::pool::{BufferHandle, BufferPool};
use crate::subscription::SubscriptionManager;
use crate::table::{CopyTable, RuntimeTable, COPY_TABLE_ENTRIES};
use heapless::FnvIndexMap;
use serde::{Deserialize, Serialize};

/// Output id to the buffer owned by that output group.
pub type GroupMap = FnvIndexMap<MessageId, BufferHandle, COPY_TABLE_ENTRIES>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Skip publishing combined packets with stale contributions.
    pub discard_incomplete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCounters {
    pub combined_packets_sent: u16,
    pub missing_data: u16,
}

pub struct Engine<B: SoftwareBus> {
    pub(crate) config: EngineConfig,
    pub(crate) copy_table: CopyTable,
    pub(crate) runtime: RuntimeTable,
    pub(crate) pool: BufferPool,
    pub(crate) groups: GroupMap,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) bus: B,
    pub(crate) counters: EngineCounters,
    pub(crate) events: EventLog,
}

impl<B: SoftwareBus> Engine<B> {
    /// Create an engine with an empty table. Nothing is allocated or subscribed
    /// until a table is activated.
    pub fn new(config: EngineConfig, pool: BufferPool, bus: B) -> Self {
        Self {
            config,
            copy_table: CopyTable::empty(),
            runtime: RuntimeTable::new(),
            pool,
            groups: GroupMap::new(),
            subscriptions: SubscriptionManager::new(),
            bus,
            counters: EngineCounters::default(),
            events: EventLog::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_discard_incomplete(&mut self, discard: bool) {
        self.config.discard_incomplete = discard;
    }

    pub fn copy_table(&self) -> &CopyTable {
        &self.copy_table
    }

    pub fn runtime_table(&self) -> &RuntimeTable {
        &self.runtime
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = EngineCounters::default();
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    /// Buffer currently owned by output group `output_id`.
    pub fn output_buffer(&self, output_id: MessageId) -> Option<BufferHandle> {
        self.groups.get(&output_id).copied()
    }

    /// Current bytes of output packet `output_id`.
    pub fn output_packet(&self, output_id: MessageId) -> Option<&[u8]> {
        self.output_buffer(output_id)
            .and_then(|handle| self.pool.bytes(handle))
    }

    pub fn bound_group_count(&self) -> usize {
        self.groups.len()
    }

    /// Whether any buffer or subscription from a table generation is still held.
    pub fn is_bound(&self) -> bool {
        !self.groups.is_empty()
            || self
                .runtime
                .entries()
                .iter()
                .any(|e| e.output_buffer.is_some() || e.input_subscribed)
    }

    /// Whether a teardown would have anything left to release. Subscriptions retained
    /// after a failed unsubscribe do not count; they are swept by the next teardown.
    pub(crate) fn needs_teardown(&self) -> bool {
        !self.groups.is_empty()
            || self.runtime.entries().iter().enumerate().any(|(slot, e)| {
                e.output_buffer.is_some()
                    || (e.input_subscribed
                        && !self.subscriptions.is_retained(self.copy_table.rule(slot).input_id))
            })
    }
}
