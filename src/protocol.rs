//! Command and telemetry formats of the housekeeping application.
//!
//! Packets carry a 6-byte primary header (stream id, sequence flags, length). Commands
//! add a 2-byte secondary header holding the function code; telemetry adds a 6-byte
//! secondary header holding the time stamp. All multi-byte fields are big-endian.

use crate::bus::{InboundMessage, MessageId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HK_CMD_MID: MessageId = MessageId(0x189A);
pub const HK_SEND_HK_MID: MessageId = MessageId(0x189B);
pub const HK_SEND_COMBINED_PKT_MID: MessageId = MessageId(0x189C);
pub const HK_HK_TLM_MID: MessageId = MessageId(0x089B);

pub const PRIMARY_HEADER_LEN: usize = 6;
pub const CMD_HEADER_LEN: usize = 8;
pub const TLM_HEADER_LEN: usize = 12;
pub const SEND_COMBINED_CMD_LEN: usize = CMD_HEADER_LEN + 2;
pub const HK_PACKET_LEN: usize = TLM_HEADER_LEN + 12;

pub const NOOP_CC: u8 = 0;
pub const RESET_CC: u8 = 1;

const FUNCTION_CODE_OFFSET: usize = 6;
const FUNCTION_CODE_MASK: u8 = 0x7F;
const SEQUENCE_FLAGS_UNSEGMENTED: u16 = 0xC000;

/// What an inbound message asks the application to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMessage {
    SendCombined { output_id: MessageId },
    HousekeepingRequest,
    Noop,
    ResetCounters,
    /// Telemetry from another application, to be copied into combined packets.
    InputData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Internal request with the wrong length.
    #[error("Msg with Bad length Rcvd: ID = {id}, Exp Len = {expected}, Len = {actual}")]
    BadMessageLength {
        id: MessageId,
        expected: usize,
        actual: usize,
    },
    /// Ground command with the wrong length.
    #[error("Cmd Msg with Bad length Rcvd: ID = {id}, CC = {code}, Exp Len = {expected}, Len = {actual}")]
    BadCommandLength {
        id: MessageId,
        code: u8,
        expected: usize,
        actual: usize,
    },
    #[error("Cmd Msg with Invalid command code Rcvd -- ID = {id}, CC = {code}")]
    InvalidCommandCode { id: MessageId, code: u8 },
    #[error("packet too short: {actual} bytes, need {expected}")]
    Truncated { expected: usize, actual: usize },
}

impl ProtocolError {
    /// Whether the error counts against the ground command error counter.
    pub fn is_ground_command_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadCommandLength { .. } | ProtocolError::InvalidCommandCode { .. }
        )
    }
}

pub fn function_code(data: &[u8]) -> u8 {
    data.get(FUNCTION_CODE_OFFSET).map_or(0, |b| b & FUNCTION_CODE_MASK)
}

/// Classify a message from the application pipe and verify its length.
pub fn classify(message: &InboundMessage<'_>) -> Result<AppMessage, ProtocolError> {
    let id = message.id;
    let actual = message.len();

    match id {
        HK_SEND_COMBINED_PKT_MID => {
            if actual != SEND_COMBINED_CMD_LEN {
                return Err(ProtocolError::BadMessageLength {
                    id,
                    expected: SEND_COMBINED_CMD_LEN,
                    actual,
                });
            }
            let output_id = u16::from_be_bytes([message.data[CMD_HEADER_LEN], message.data[CMD_HEADER_LEN + 1]]);
            Ok(AppMessage::SendCombined {
                output_id: MessageId(output_id),
            })
        }
        HK_SEND_HK_MID => {
            if actual != CMD_HEADER_LEN {
                return Err(ProtocolError::BadMessageLength {
                    id,
                    expected: CMD_HEADER_LEN,
                    actual,
                });
            }
            Ok(AppMessage::HousekeepingRequest)
        }
        HK_CMD_MID => {
            let code = function_code(message.data);
            let command = match code {
                NOOP_CC => AppMessage::Noop,
                RESET_CC => AppMessage::ResetCounters,
                _ => return Err(ProtocolError::InvalidCommandCode { id, code }),
            };
            if actual != CMD_HEADER_LEN {
                return Err(ProtocolError::BadCommandLength {
                    id,
                    code,
                    expected: CMD_HEADER_LEN,
                    actual,
                });
            }
            Ok(command)
        }
        _ => Ok(AppMessage::InputData),
    }
}

/// Write the primary header into the start of `packet`. No-op for packets shorter
/// than the header.
pub fn write_primary_header(packet: &mut [u8], id: MessageId) {
    if packet.len() < PRIMARY_HEADER_LEN {
        return;
    }
    let length_field = packet.len().saturating_sub(7) as u16;
    packet[0..2].copy_from_slice(&id.raw().to_be_bytes());
    packet[2..4].copy_from_slice(&SEQUENCE_FLAGS_UNSEGMENTED.to_be_bytes());
    packet[4..6].copy_from_slice(&length_field.to_be_bytes());
}

/// Stamp bus time into the telemetry secondary header. No-op for packets shorter than
/// a telemetry header.
pub fn stamp_telemetry_time(packet: &mut [u8], time_ms: u64) {
    if packet.len() < TLM_HEADER_LEN {
        return;
    }
    let seconds = (time_ms / 1000) as u32;
    let subseconds = ((time_ms % 1000) * 65_536 / 1000) as u16;
    packet[6..10].copy_from_slice(&seconds.to_be_bytes());
    packet[10..12].copy_from_slice(&subseconds.to_be_bytes());
}

/// Read the stream id of a packet with a primary header.
pub fn packet_id(packet: &[u8]) -> Option<MessageId> {
    (packet.len() >= PRIMARY_HEADER_LEN).then(|| MessageId(u16::from_be_bytes([packet[0], packet[1]])))
}

pub fn build_command(id: MessageId, code: u8, payload: &[u8]) -> alloc::vec::Vec<u8> {
    let mut packet = alloc::vec![0; CMD_HEADER_LEN + payload.len()];
    write_primary_header(&mut packet, id);
    packet[FUNCTION_CODE_OFFSET] = code & FUNCTION_CODE_MASK;
    packet[CMD_HEADER_LEN..].copy_from_slice(payload);
    packet
}

pub fn send_combined_command(output_id: MessageId) -> alloc::vec::Vec<u8> {
    build_command(HK_SEND_COMBINED_PKT_MID, 0, &output_id.raw().to_be_bytes())
}

pub fn housekeeping_request() -> alloc::vec::Vec<u8> {
    build_command(HK_SEND_HK_MID, 0, &[])
}

pub fn noop_command() -> alloc::vec::Vec<u8> {
    build_command(HK_CMD_MID, NOOP_CC, &[])
}

pub fn reset_counters_command() -> alloc::vec::Vec<u8> {
    build_command(HK_CMD_MID, RESET_CC, &[])
}

/// Housekeeping telemetry of the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HkPacket {
    pub cmd_counter: u8,
    pub err_counter: u8,
    pub combined_packets_sent: u16,
    pub missing_data_ctr: u16,
    pub mem_pool_handle: u32,
}

impl HkPacket {
    pub fn encode(&self, time_ms: u64) -> [u8; HK_PACKET_LEN] {
        let mut packet = [0u8; HK_PACKET_LEN];
        write_primary_header(&mut packet, HK_HK_TLM_MID);
        stamp_telemetry_time(&mut packet, time_ms);

        let body = &mut packet[TLM_HEADER_LEN..];
        body[0] = self.cmd_counter;
        body[1] = self.err_counter;
        // body[2..4] is padding
        body[4..6].copy_from_slice(&self.combined_packets_sent.to_be_bytes());
        body[6..8].copy_from_slice(&self.missing_data_ctr.to_be_bytes());
        body[8..12].copy_from_slice(&self.mem_pool_handle.to_be_bytes());
        packet
    }

    pub fn decode(packet: &[u8]) -> Result<Self, ProtocolError> {
        if packet.len() < HK_PACKET_LEN {
            return Err(ProtocolError::Truncated {
                expected: HK_PACKET_LEN,
                actual: packet.len(),
            });
        }
        let body = &packet[TLM_HEADER_LEN..HK_PACKET_LEN];
        Ok(Self {
            cmd_counter: body[0],
            err_counter: body[1],
            combined_packets_sent: u16::from_be_bytes([body[4], body[5]]),
            missing_data_ctr: u16::from_be_bytes([body[6], body[7]]),
            mem_pool_handle: u32::from_be_bytes([body[8], body[9], body[10], body[11]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_send_combined() {
        let data = send_combined_command(MessageId(0x89C));
        assert_eq!(data.len(), SEND_COMBINED_CMD_LEN);
        let msg = InboundMessage::new(HK_SEND_COMBINED_PKT_MID, &data);
        assert_eq!(
            classify(&msg),
            Ok(AppMessage::SendCombined {
                output_id: MessageId(0x89C)
            })
        );
    }

    #[test]
    fn test_bad_length_internal_request_is_not_a_ground_error() {
        let data = [0u8; 9];
        let msg = InboundMessage::new(HK_SEND_HK_MID, &data);
        let err = classify(&msg).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BadMessageLength {
                id: HK_SEND_HK_MID,
                expected: CMD_HEADER_LEN,
                actual: 9
            }
        );
        assert!(!err.is_ground_command_error());
    }

    #[test]
    fn test_ground_command_codes() {
        let noop = noop_command();
        assert_eq!(classify(&InboundMessage::new(HK_CMD_MID, &noop)), Ok(AppMessage::Noop));

        let reset = reset_counters_command();
        assert_eq!(
            classify(&InboundMessage::new(HK_CMD_MID, &reset)),
            Ok(AppMessage::ResetCounters)
        );

        let bogus = build_command(HK_CMD_MID, 9, &[]);
        let err = classify(&InboundMessage::new(HK_CMD_MID, &bogus)).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidCommandCode { id: HK_CMD_MID, code: 9 });
        assert!(err.is_ground_command_error());

        let long_noop = build_command(HK_CMD_MID, NOOP_CC, &[0, 0]);
        assert!(matches!(
            classify(&InboundMessage::new(HK_CMD_MID, &long_noop)),
            Err(ProtocolError::BadCommandLength { code: NOOP_CC, actual: 10, .. })
        ));
    }

    #[test]
    fn test_other_ids_are_input_data() {
        let data = [0u8; 4];
        assert_eq!(
            classify(&InboundMessage::new(MessageId(0x0801), &data)),
            Ok(AppMessage::InputData)
        );
    }

    #[test]
    fn test_primary_header_and_time_stamp() {
        let mut packet = [0u8; 16];
        write_primary_header(&mut packet, MessageId(0x089C));
        stamp_telemetry_time(&mut packet, 2_500);

        assert_eq!(packet_id(&packet), Some(MessageId(0x089C)));
        assert_eq!(&packet[2..4], &[0xC0, 0x00]);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 9);
        assert_eq!(u32::from_be_bytes([packet[6], packet[7], packet[8], packet[9]]), 2);
        assert_eq!(u16::from_be_bytes([packet[10], packet[11]]), 32_768);
        assert_eq!(&packet[12..], &[0, 0, 0, 0]);

        // Too short for any header: left untouched
        let mut tiny = [0xFFu8; 4];
        write_primary_header(&mut tiny, MessageId(1));
        assert_eq!(tiny, [0xFF; 4]);
    }

    #[test]
    fn test_hk_packet_layout() {
        let hk = HkPacket {
            cmd_counter: 3,
            err_counter: 1,
            combined_packets_sent: 0x0102,
            missing_data_ctr: 7,
            mem_pool_handle: 0x484B_0001,
        };
        let bytes = hk.encode(1_000);
        assert_eq!(bytes.len(), HK_PACKET_LEN);
        assert_eq!(packet_id(&bytes), Some(HK_HK_TLM_MID));
        assert_eq!(bytes[12], 3);
        assert_eq!(bytes[13], 1);
        assert_eq!(&bytes[16..18], &[0x01, 0x02]);
        assert_eq!(HkPacket::decode(&bytes), Ok(hk));
        assert!(HkPacket::decode(&bytes[..10]).is_err());
    }
}
