//! Copy table and runtime table.
//!
//! The copy table is configuration: an ordered, fixed-capacity array of [`CopyRule`]s.
//! The runtime table is the live state for the same slots, index-aligned 1:1 with the
//! copy table. Neither table ever changes length.

use crate::bus::MessageId;
use crate::pool::BufferHandle;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;
use thiserror::Error;

/// Number of slots in the copy and runtime tables.
pub const COPY_TABLE_ENTRIES: usize = 128;
/// Size of one rule in the binary table image: five big-endian u16 fields.
pub const RULE_RECORD_SIZE: usize = 10;

// Group maps and id sets are sized by the table capacity.
const_assert!(COPY_TABLE_ENTRIES.is_power_of_two());
const_assert!(COPY_TABLE_ENTRIES <= u8::MAX as usize + 1);

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table holds {count} rules, capacity is {capacity}")]
    CapacityExceeded { count: usize, capacity: usize },
    #[error("binary table image is {len} bytes, not a multiple of the 10-byte record size")]
    TruncatedRecord { len: usize },
    #[error("rule {slot} is invalid: {reason}")]
    InvalidRule { slot: usize, reason: &'static str },
    #[error("table address still held, release it before updating")]
    AddressHeld,
    #[error("invalid table JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copy `num_bytes` from `input_id` at `input_offset` into `output_id` at `output_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CopyRule {
    pub input_id: MessageId,
    pub input_offset: u16,
    pub output_id: MessageId,
    pub output_offset: u16,
    pub num_bytes: u16,
}

impl CopyRule {
    pub const UNUSED: CopyRule = CopyRule {
        input_id: MessageId::UNDEFINED,
        input_offset: 0,
        output_id: MessageId::UNDEFINED,
        output_offset: 0,
        num_bytes: 0,
    };

    pub const fn new(
        input_id: MessageId,
        input_offset: u16,
        output_id: MessageId,
        output_offset: u16,
        num_bytes: u16,
    ) -> Self {
        Self {
            input_id,
            input_offset,
            output_id,
            output_offset,
            num_bytes,
        }
    }

    pub fn is_unused(&self) -> bool {
        !self.input_id.is_defined() && !self.output_id.is_defined()
    }

    /// Both ends defined, so the rule contributes to an output packet.
    pub fn needs_buffer(&self) -> bool {
        self.input_id.is_defined() && self.output_id.is_defined()
    }

    /// One past the last input byte this rule reads.
    pub fn input_end(&self) -> usize {
        self.input_offset as usize + self.num_bytes as usize
    }

    /// One past the last output byte this rule writes.
    pub fn output_end(&self) -> usize {
        self.output_offset as usize + self.num_bytes as usize
    }

    fn decode(record: &[u8]) -> Self {
        let field = |i: usize| u16::from_be_bytes([record[2 * i], record[2 * i + 1]]);
        Self {
            input_id: MessageId(field(0)),
            input_offset: field(1),
            output_id: MessageId(field(2)),
            output_offset: field(3),
            num_bytes: field(4),
        }
    }
}

/// Summary of one output packet described by a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputGroupInfo {
    pub output_id: MessageId,
    pub size: usize,
    pub rule_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTable {
    rules: [CopyRule; COPY_TABLE_ENTRIES],
}

impl CopyTable {
    pub fn empty() -> Self {
        Self {
            rules: [CopyRule::UNUSED; COPY_TABLE_ENTRIES],
        }
    }

    /// Build a table from up to [`COPY_TABLE_ENTRIES`] rules; remaining slots are unused.
    pub fn from_rules(rules: &[CopyRule]) -> Result<Self, TableError> {
        if rules.len() > COPY_TABLE_ENTRIES {
            return Err(TableError::CapacityExceeded {
                count: rules.len(),
                capacity: COPY_TABLE_ENTRIES,
            });
        }
        let mut table = Self::empty();
        table.rules[..rules.len()].copy_from_slice(rules);
        Ok(table)
    }

    /// Parse a JSON array of rules.
    pub fn from_json(json: &str) -> Result<Self, TableError> {
        let rules: alloc::vec::Vec<CopyRule> = serde_json::from_str(json)?;
        Self::from_rules(&rules)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Decode the binary table image.
    pub fn decode(image: &[u8]) -> Result<Self, TableError> {
        if image.len() % RULE_RECORD_SIZE != 0 {
            return Err(TableError::TruncatedRecord { len: image.len() });
        }
        let rules: alloc::vec::Vec<CopyRule> = image
            .chunks_exact(RULE_RECORD_SIZE)
            .map(CopyRule::decode)
            .collect();
        Self::from_rules(&rules)
    }

    /// JSON form listing every slot up to the last used one.
    pub fn to_json(&self) -> Result<alloc::string::String, TableError> {
        let used = self
            .rules
            .iter()
            .rposition(|r| !r.is_unused())
            .map_or(0, |last| last + 1);
        Ok(serde_json::to_string_pretty(&self.rules[..used])?)
    }

    pub fn rules(&self) -> &[CopyRule] {
        &self.rules
    }

    pub fn rule(&self, slot: usize) -> &CopyRule {
        &self.rules[slot]
    }

    pub fn defined_rules(&self) -> impl Iterator<Item = (usize, &CopyRule)> {
        self.rules.iter().enumerate().filter(|(_, r)| !r.is_unused())
    }

    /// Byte size of output packet `output_id`: the furthest `offset + num_bytes` over
    /// every rule writing to it.
    pub fn packet_size(&self, output_id: MessageId) -> usize {
        self.rules
            .iter()
            .filter(|r| r.output_id == output_id)
            .map(CopyRule::output_end)
            .max()
            .unwrap_or(0)
    }

    /// Output packets in order of first appearance.
    pub fn output_groups(&self) -> alloc::vec::Vec<OutputGroupInfo> {
        let mut groups: alloc::vec::Vec<OutputGroupInfo> = alloc::vec::Vec::new();
        for rule in self.rules.iter().filter(|r| r.needs_buffer()) {
            if groups.iter().any(|g| g.output_id == rule.output_id) {
                continue;
            }
            groups.push(OutputGroupInfo {
                output_id: rule.output_id,
                size: self.packet_size(rule.output_id),
                rule_count: self.rules.iter().filter(|r| r.output_id == rule.output_id).count(),
            });
        }
        groups
    }

    /// Distinct defined input ids in order of first appearance.
    pub fn distinct_input_ids(&self) -> alloc::vec::Vec<MessageId> {
        let mut ids = alloc::vec::Vec::new();
        for rule in &self.rules {
            if rule.input_id.is_defined() && !ids.contains(&rule.input_id) {
                ids.push(rule.input_id);
            }
        }
        ids
    }
}

impl Default for CopyTable {
    fn default() -> Self {
        Self::empty()
    }
}

/// Check a candidate copy table before it may become active.
pub fn validate_copy_table(table: &CopyTable) -> Result<(), TableError> {
    for (slot, rule) in table.defined_rules() {
        if !rule.needs_buffer() {
            return Err(TableError::InvalidRule {
                slot,
                reason: "only one of input and output id is defined",
            });
        }
        if rule.num_bytes == 0 {
            return Err(TableError::InvalidRule {
                slot,
                reason: "rule copies zero bytes",
            });
        }
        if rule.output_end() > u16::MAX as usize {
            return Err(TableError::InvalidRule {
                slot,
                reason: "output range exceeds maximum packet size",
            });
        }
        if rule.input_end() > u16::MAX as usize {
            return Err(TableError::InvalidRule {
                slot,
                reason: "input range exceeds maximum packet size",
            });
        }
    }
    Ok(())
}

/// Live state for one copy-table slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    /// Non-owning reference to the output group's buffer.
    pub output_buffer: Option<BufferHandle>,
    pub input_subscribed: bool,
    pub data_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTable {
    entries: [RuntimeEntry; COPY_TABLE_ENTRIES],
}

impl RuntimeTable {
    pub fn new() -> Self {
        Self {
            entries: [RuntimeEntry::default(); COPY_TABLE_ENTRIES],
        }
    }

    pub fn reset(&mut self) {
        self.entries = [RuntimeEntry::default(); COPY_TABLE_ENTRIES];
    }

    pub fn entries(&self) -> &[RuntimeEntry] {
        &self.entries
    }

    pub fn entry(&self, slot: usize) -> &RuntimeEntry {
        &self.entries[slot]
    }

    pub fn entry_mut(&mut self, slot: usize) -> &mut RuntimeEntry {
        &mut self.entries[slot]
    }

    pub fn dump(&self) -> RuntimeDump {
        RuntimeDump {
            entries: self
                .entries
                .iter()
                .enumerate()
                .map(|(slot, e)| RuntimeDumpEntry {
                    slot: slot as u8,
                    output_buffer: e.output_buffer.map(BufferHandle::raw),
                    input_subscribed: e.input_subscribed,
                    data_present: e.data_present,
                })
                .collect(),
        }
    }
}

impl Default for RuntimeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the dump-only runtime table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDump {
    pub entries: alloc::vec::Vec<RuntimeDumpEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDumpEntry {
    pub slot: u8,
    pub output_buffer: Option<u32>,
    pub input_subscribed: bool,
    pub data_present: bool,
}

/// Message ids used by the sample copy table.
pub mod sample_ids {
    use crate::bus::MessageId;

    pub const ES_HK_TLM_MID: MessageId = MessageId(0x0800);
    pub const EVS_HK_TLM_MID: MessageId = MessageId(0x0801);
    pub const SB_HK_TLM_MID: MessageId = MessageId(0x0803);
    pub const TBL_HK_TLM_MID: MessageId = MessageId(0x0804);
    pub const TIME_HK_TLM_MID: MessageId = MessageId(0x0805);
    pub const COMBINED_PKT1_MID: MessageId = MessageId(0x089C);
    pub const COMBINED_PKT2_MID: MessageId = MessageId(0x089D);
}

/// Sample table: four bytes from each core service's housekeeping packet combined
/// into one output packet.
pub fn default_copy_table() -> CopyTable {
    use sample_ids::*;

    let rules = [
        CopyRule::new(EVS_HK_TLM_MID, 12, COMBINED_PKT1_MID, 12, 4),
        CopyRule::new(TIME_HK_TLM_MID, 12, COMBINED_PKT1_MID, 16, 4),
        CopyRule::new(SB_HK_TLM_MID, 12, COMBINED_PKT1_MID, 20, 4),
        CopyRule::new(ES_HK_TLM_MID, 12, COMBINED_PKT1_MID, 24, 4),
        CopyRule::new(TBL_HK_TLM_MID, 12, COMBINED_PKT1_MID, 28, 4),
    ];
    let mut table = CopyTable::empty();
    table.rules[..rules.len()].copy_from_slice(&rules);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(input: u16, in_off: u16, output: u16, out_off: u16, len: u16) -> CopyRule {
        CopyRule::new(MessageId(input), in_off, MessageId(output), out_off, len)
    }

    #[test]
    fn test_packet_size_is_furthest_byte() {
        let table = CopyTable::from_rules(&[
            rule(0x100, 12, 0x200, 12, 4),
            rule(0x101, 0, 0x200, 40, 2),
            rule(0x102, 0, 0x200, 20, 8),
        ])
        .unwrap();
        assert_eq!(table.packet_size(MessageId(0x200)), 42);
        assert_eq!(table.packet_size(MessageId(0x999)), 0);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let rules = vec![rule(0x100, 0, 0x200, 0, 1); COPY_TABLE_ENTRIES + 1];
        match CopyTable::from_rules(&rules) {
            Err(TableError::CapacityExceeded { count, capacity }) => {
                assert_eq!(count, COPY_TABLE_ENTRIES + 1);
                assert_eq!(capacity, COPY_TABLE_ENTRIES);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
        assert!(CopyTable::from_rules(&rules[..COPY_TABLE_ENTRIES]).is_ok());
    }

    #[test]
    fn test_json_table_parsing() {
        let json = r#"[
            {"input_id": 256, "input_offset": 12, "output_id": 512, "output_offset": 12, "num_bytes": 4}
        ]"#;
        let table = CopyTable::from_json(json).unwrap();
        assert_eq!(*table.rule(0), rule(0x100, 12, 0x200, 12, 4));
        assert!(table.rule(1).is_unused());
        assert_eq!(table.defined_rules().count(), 1);

        let round = CopyTable::from_json(&table.to_json().unwrap()).unwrap();
        assert_eq!(round, table);
    }

    #[test]
    fn test_binary_image_decoding() {
        let image = [
            0x01, 0x00, 0x00, 0x0C, 0x02, 0x00, 0x00, 0x0C, 0x00, 0x04, // rule 0
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // unused
        ];
        let table = CopyTable::decode(&image).unwrap();
        assert_eq!(*table.rule(0), rule(0x100, 12, 0x200, 12, 4));
        assert!(table.rule(1).is_unused());

        assert!(matches!(
            CopyTable::decode(&image[..15]),
            Err(TableError::TruncatedRecord { len: 15 })
        ));
    }

    #[test]
    fn test_validation_rejects_half_defined_rule() {
        let table = CopyTable::from_rules(&[
            rule(0x100, 0, 0x200, 0, 4),
            rule(0x101, 0, 0, 0, 4),
        ])
        .unwrap();
        assert!(matches!(
            validate_copy_table(&table),
            Err(TableError::InvalidRule { slot: 1, .. })
        ));
    }

    #[test]
    fn test_validation_rejects_oversized_output() {
        let table = CopyTable::from_rules(&[rule(0x100, 0, 0x200, 65_530, 10)]).unwrap();
        assert!(validate_copy_table(&table).is_err());
        assert!(validate_copy_table(&default_copy_table()).is_ok());
    }

    #[test]
    fn test_groups_and_distinct_inputs() {
        let table = CopyTable::from_rules(&[
            rule(0x100, 0, 0x200, 0, 4),
            rule(0x100, 4, 0x201, 0, 4),
            rule(0x101, 0, 0x200, 4, 4),
        ])
        .unwrap();
        let groups = table.output_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].output_id, MessageId(0x200));
        assert_eq!(groups[0].size, 8);
        assert_eq!(groups[0].rule_count, 2);
        assert_eq!(table.distinct_input_ids(), vec![MessageId(0x100), MessageId(0x101)]);
    }

    #[test]
    fn test_runtime_dump_covers_every_slot() {
        let mut runtime = RuntimeTable::new();
        runtime.entry_mut(3).data_present = true;
        let dump = runtime.dump();
        assert_eq!(dump.entries.len(), COPY_TABLE_ENTRIES);
        assert!(dump.entries[3].data_present);
        assert_eq!(dump.entries[3].slot, 3);
    }

    #[test]
    fn test_demo_table_is_valid() {
        let table = CopyTable::from_json(include_str!("../demos/hk_copy_table.json")).unwrap();
        assert!(validate_copy_table(&table).is_ok());
        let groups = table.output_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].output_id, sample_ids::COMBINED_PKT1_MID);
        assert_eq!(groups[0].size, 32);
        assert_eq!(groups[1].size, 20);
    }
}
