use crate::bus::{MessageId, SoftwareBus};
use crate::engine::Engine;
use crate::events::{EventId, EventType};
use crate::pool::BufferHandle;
use crate::protocol::stamp_telemetry_time;
use crate::table::COPY_TABLE_ENTRIES;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// Published. `missing_input` names the first contributor with stale data.
    Sent { missing_input: Option<MessageId> },
    /// Held back because data was missing and incomplete packets are discarded.
    Discarded { missing_input: MessageId },
    /// The bus refused the packet.
    PublishFailed,
    /// No bound buffer carries this output id.
    UnknownPacket,
}

impl<B: SoftwareBus> Engine<B> {
    /// Publish combined packet `output_id` and start collecting its next instance.
    pub fn send_combined(&mut self, output_id: MessageId) -> SendOutcome {
        let representative = (0..COPY_TABLE_ENTRIES).find_map(|slot| {
            let handle = self.runtime.entry(slot).output_buffer?;
            let header = self.pool.header(handle)?;
            (header.id == output_id).then_some(handle)
        });

        let Some(handle) = representative else {
            self.events.report(
                EventId::UnknownCombinedPacket,
                EventType::Information,
                format_args!("Combined HK Packet {} is not found in current HK Copy Table", output_id),
            );
            return SendOutcome::UnknownPacket;
        };

        let missing_input = self.check_for_missing_data(output_id);
        if let Some(input_id) = missing_input {
            self.counters.missing_data = self.counters.missing_data.wrapping_add(1);
            self.events.report(
                EventId::MissingData,
                EventType::Debug,
                format_args!("Combined Packet {} missing data from Input Pkt {}", output_id, input_id),
            );
        }

        let outcome = match missing_input {
            Some(input_id) if self.config.discard_incomplete => SendOutcome::Discarded { missing_input: input_id },
            _ => self.publish_buffer(output_id, handle, missing_input),
        };

        self.set_flags_to_not_present(output_id);
        outcome
    }

    fn publish_buffer(
        &mut self,
        output_id: MessageId,
        handle: BufferHandle,
        missing_input: Option<MessageId>,
    ) -> SendOutcome {
        let now_ms = self.bus.current_time_ms();
        if let Some(header) = self.pool.header_mut(handle) {
            header.timestamp_ms = now_ms;
        }
        let Some(packet) = self.pool.bytes_mut(handle) else {
            return SendOutcome::UnknownPacket;
        };
        stamp_telemetry_time(packet, now_ms);

        match self.bus.publish(output_id, packet) {
            Ok(()) => {
                self.counters.combined_packets_sent = self.counters.combined_packets_sent.wrapping_add(1);
                debug!(output_id = %output_id, len = packet.len(), "combined packet sent");
                SendOutcome::Sent { missing_input }
            }
            Err(e) => {
                self.events.report(
                    EventId::PublishFailed,
                    EventType::Error,
                    format_args!("Publishing combined packet {} failed: {}", output_id, e),
                );
                SendOutcome::PublishFailed
            }
        }
    }

    /// First input id contributing to `output_id` that has not delivered since the last
    /// send, in slot order.
    pub fn check_for_missing_data(&self, output_id: MessageId) -> Option<MessageId> {
        self.copy_table
            .rules()
            .iter()
            .zip(self.runtime.entries())
            .find(|(rule, entry)| rule.output_id == output_id && !entry.data_present)
            .map(|(rule, _)| rule.input_id)
    }

    pub fn set_flags_to_not_present(&mut self, output_id: MessageId) {
        for slot in 0..COPY_TABLE_ENTRIES {
            if self.copy_table.rule(slot).output_id == output_id {
                self.runtime.entry_mut(slot).data_present = false;
            }
        }
    }
}
