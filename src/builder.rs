//! Binding and teardown of a table generation.
//!
//! Activation walks the slots in ascending order. The first slot of each output group
//! sizes the group's packet, allocates its one buffer and binds that handle into every
//! slot of the group; the first slot reading each input id subscribes it and marks every
//! slot sharing the id. Teardown is the mirror image and frees each group's buffer
//! exactly once, through the group map that owns it.

use crate::bus::{BusError, MessageId, SoftwareBus};
use crate::engine::Engine;
use crate::events::{EventId, EventType};
use crate::pool::BufferHandle;
use crate::protocol::write_primary_header;
use crate::table::{CopyTable, COPY_TABLE_ENTRIES};
use heapless::FnvIndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

type IdSet = FnvIndexSet<MessageId, COPY_TABLE_ENTRIES>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub groups_bound: usize,
    pub allocation_failures: usize,
    /// Groups whose packet sizes to zero bytes. Skipped without touching the pool.
    pub empty_groups: usize,
    pub subscriptions: usize,
    pub subscription_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub buffers_freed: usize,
    pub free_failures: usize,
    pub unsubscribed: usize,
    pub unsubscribe_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupBinding {
    Bound,
    Empty,
    Failed,
}

impl<B: SoftwareBus> Engine<B> {
    /// Install `table` as the active generation and bind its buffers and subscriptions.
    ///
    /// Failures are reported and leave the affected slots unbound or unsubscribed; the
    /// rest of the table is still activated.
    pub fn activate_table(&mut self, table: CopyTable) -> ActivationReport {
        if self.needs_teardown() {
            debug!("previous table generation still bound, tearing it down");
            self.deactivate_table();
        }

        self.copy_table = table;
        self.runtime.reset();

        let mut report = ActivationReport::default();
        let mut skipped_groups = IdSet::new();
        let mut failed_inputs = IdSet::new();

        for slot in 0..COPY_TABLE_ENTRIES {
            let rule = *self.copy_table.rule(slot);
            let entry = *self.runtime.entry(slot);

            if rule.needs_buffer()
                && entry.output_buffer.is_none()
                && !skipped_groups.contains(&rule.output_id)
            {
                match self.bind_output_group(rule.output_id) {
                    GroupBinding::Bound => report.groups_bound += 1,
                    GroupBinding::Empty => {
                        report.empty_groups += 1;
                        let _ = skipped_groups.insert(rule.output_id);
                    }
                    GroupBinding::Failed => {
                        report.allocation_failures += 1;
                        let _ = skipped_groups.insert(rule.output_id);
                    }
                }
            }

            if rule.input_id.is_defined()
                && !entry.input_subscribed
                && !failed_inputs.contains(&rule.input_id)
            {
                match self.subscriptions.subscribe(&mut self.bus, rule.input_id) {
                    Ok(()) => {
                        self.mark_subscribed(rule.input_id, true);
                        report.subscriptions += 1;
                    }
                    Err(e) => {
                        report.subscription_failures += 1;
                        let _ = failed_inputs.insert(rule.input_id);
                        self.events.report(
                            EventId::SubscribeFailed,
                            EventType::Error,
                            format_args!(
                                "HK Processing New Table: subscribe to {} failed: {}",
                                rule.input_id, e
                            ),
                        );
                    }
                }
            }
        }

        self.events.report(
            EventId::TableActivated,
            EventType::Information,
            format_args!(
                "Copy table activated: {} packets, {} inputs, {} failures",
                report.groups_bound,
                report.subscriptions,
                report.allocation_failures + report.subscription_failures
            ),
        );
        info!(
            groups = report.groups_bound,
            subscriptions = report.subscriptions,
            bytes_in_use = self.pool.stats().bytes_in_use,
            "copy table active"
        );
        report
    }

    /// Allocate the buffer for `output_id` and bind it into every slot of the group.
    fn bind_output_group(&mut self, output_id: MessageId) -> GroupBinding {
        let size = self.copy_table.packet_size(output_id);
        if size == 0 {
            debug!(output_id = %output_id, "output packet sizes to zero bytes, skipped");
            return GroupBinding::Empty;
        }

        let handle = match self.pool.allocate(output_id, size) {
            Ok(handle) => handle,
            Err(e) => {
                self.events.report(
                    EventId::PoolAllocFailed,
                    EventType::Error,
                    format_args!(
                        "HK Processing New Table: pool allocation of {} bytes for {} failed: {}",
                        size, output_id, e
                    ),
                );
                return GroupBinding::Failed;
            }
        };

        if self.groups.insert(output_id, handle).is_err() {
            let _ = self.pool.free(handle);
            return GroupBinding::Failed;
        }

        if let Some(bytes) = self.pool.bytes_mut(handle) {
            write_primary_header(bytes, output_id);
        }

        for slot in 0..COPY_TABLE_ENTRIES {
            if self.copy_table.rule(slot).output_id == output_id {
                self.runtime.entry_mut(slot).output_buffer = Some(handle);
            }
        }

        debug!(output_id = %output_id, size, handle = handle.raw(), "output packet bound");
        GroupBinding::Bound
    }

    /// Release every buffer and subscription held by the active generation.
    ///
    /// Each group's buffer is freed once and each input id unsubscribed at most once per
    /// call. A failed unsubscribe is reported and not retried in the same call; the id
    /// stays retained and the next teardown releases it, even under a table that no
    /// longer reads it.
    pub fn deactivate_table(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let mut failed_inputs = IdSet::new();

        for slot in 0..COPY_TABLE_ENTRIES {
            let rule = *self.copy_table.rule(slot);
            let entry = *self.runtime.entry(slot);

            if let Some(bound) = entry.output_buffer {
                self.groups.remove(&rule.output_id);
                match self.pool.free(bound) {
                    Ok(()) => report.buffers_freed += 1,
                    Err(e) => {
                        report.free_failures += 1;
                        self.events.report(
                            EventId::PoolFreeFailed,
                            EventType::Error,
                            format_args!(
                                "HK Processing New Table: freeing buffer for {} failed: {}",
                                rule.output_id, e
                            ),
                        );
                    }
                }
                self.unbind_buffer(bound);
            }

            if entry.input_subscribed && !failed_inputs.contains(&rule.input_id) {
                match self.subscriptions.unsubscribe(&mut self.bus, rule.input_id) {
                    Ok(()) => {
                        self.mark_subscribed(rule.input_id, false);
                        report.unsubscribed += 1;
                    }
                    Err(e) => {
                        report.unsubscribe_failures += 1;
                        let _ = failed_inputs.insert(rule.input_id);
                        self.report_unsubscribe_failure(rule.input_id, e);
                    }
                }
            }
        }

        let mut stale = IdSet::new();
        for id in self.subscriptions.retained() {
            if !failed_inputs.contains(id) {
                let _ = stale.insert(*id);
            }
        }
        for id in stale.iter() {
            match self.subscriptions.unsubscribe(&mut self.bus, *id) {
                Ok(()) => {
                    self.mark_subscribed(*id, false);
                    report.unsubscribed += 1;
                }
                Err(e) => {
                    report.unsubscribe_failures += 1;
                    self.report_unsubscribe_failure(*id, e);
                }
            }
        }

        if report != TeardownReport::default() {
            debug!(
                freed = report.buffers_freed,
                unsubscribed = report.unsubscribed,
                "table generation torn down"
            );
        }
        report
    }

    fn report_unsubscribe_failure(&mut self, input_id: MessageId, error: BusError) {
        self.events.report(
            EventId::UnsubscribeFailed,
            EventType::Error,
            format_args!(
                "HK Processing New Table: unsubscribe from {} failed: {}",
                input_id, error
            ),
        );
    }

    fn unbind_buffer(&mut self, handle: BufferHandle) {
        for slot in 0..COPY_TABLE_ENTRIES {
            let entry = self.runtime.entry_mut(slot);
            if entry.output_buffer == Some(handle) {
                entry.output_buffer = None;
                entry.data_present = false;
            }
        }
    }

    fn mark_subscribed(&mut self, input_id: MessageId, subscribed: bool) {
        for slot in 0..COPY_TABLE_ENTRIES {
            if self.copy_table.rule(slot).input_id == input_id {
                self.runtime.entry_mut(slot).input_subscribed = subscribed;
            }
        }
    }
}
