use crate::bus::{InboundMessage, SoftwareBus};
use crate::engine::Engine;
use crate::events::{EventId, EventType};
use crate::table::COPY_TABLE_ENTRIES;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// What one inbound message did to the active table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    /// Slots whose input id matched the message.
    pub matched: usize,
    pub copied: usize,
    pub bounds_errors: usize,
}

impl<B: SoftwareBus> Engine<B> {
    /// Copy the fragments of `message` into every output packet that wants them.
    ///
    /// A rule reading past the end of the message is skipped. All such rules for one
    /// message are summarised in a single error event.
    pub fn on_inbound_message(&mut self, message: &InboundMessage<'_>) -> CopyReport {
        let mut report = CopyReport::default();
        if !message.id.is_defined() {
            return report;
        }

        for slot in 0..COPY_TABLE_ENTRIES {
            let rule = *self.copy_table.rule(slot);
            if rule.input_id != message.id {
                continue;
            }
            report.matched += 1;

            if rule.input_end() > message.len() {
                report.bounds_errors += 1;
                continue;
            }

            let Some(handle) = self.runtime.entry(slot).output_buffer else {
                continue;
            };
            let Some(packet) = self.pool.bytes_mut(handle) else {
                continue;
            };
            let Some(dest) = packet.get_mut(rule.output_offset as usize..rule.output_end()) else {
                continue;
            };

            dest.copy_from_slice(&message.data[rule.input_offset as usize..rule.input_end()]);
            self.runtime.entry_mut(slot).data_present = true;
            report.copied += 1;
        }

        if report.bounds_errors > 0 {
            self.events.report(
                EventId::AccessingPastPacketEnd,
                EventType::Error,
                format_args!(
                    "HK table definition exceeds packet length. MID:{}, Length:{}, Count:{}",
                    message.id,
                    message.len(),
                    report.bounds_errors
                ),
            );
        }

        trace!(id = %message.id, matched = report.matched, copied = report.copied, "inbound message");
        report
    }
}
