//! Fixed-capacity memory pool for combined output packets.
//!
//! The pool owns one byte arena sized at construction time and never grows. Buffers
//! are carved out first-fit and identified by an opaque [`BufferHandle`]; a handle is
//! valid from `allocate` until `free` and stale handles are rejected instead of
//! aliasing a newer buffer.

use crate::bus::MessageId;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of live buffers, one per distinct output packet.
pub const MAX_POOL_BLOCKS: usize = crate::table::COPY_TABLE_ENTRIES;
/// Allocation granularity in bytes.
pub const POOL_ALIGNMENT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferHandle(u32);

impl BufferHandle {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Metadata kept alongside each buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub id: MessageId,
    pub size: u16,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity_bytes: u32,
    pub bytes_in_use: u32,
    pub blocks_in_use: u16,
    pub allocations: u32,
    pub frees: u32,
    pub failed_allocations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("zero-length buffer requested")]
    ZeroSize,
    #[error("requested {requested} bytes exceeds the maximum packet size")]
    TooLarge { requested: usize },
    #[error("pool exhausted: requested {requested} bytes, {available} bytes free")]
    Exhausted { requested: usize, available: usize },
    #[error("pool block table full ({max} buffers)")]
    TooManyBlocks { max: usize },
    #[error("buffer handle {handle} is not allocated from this pool")]
    UnknownBuffer { handle: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Block {
    handle: BufferHandle,
    offset: usize,
    reserved: usize,
    header: PacketHeader,
}

#[derive(Debug)]
pub struct BufferPool {
    id: u32,
    arena: alloc::vec::Vec<u8>,
    // Sorted by offset.
    blocks: Vec<Block, MAX_POOL_BLOCKS>,
    next_handle: u32,
    stats: PoolStats,
}

impl BufferPool {
    pub fn new(id: u32, capacity_bytes: usize) -> Self {
        Self {
            id,
            arena: alloc::vec![0; capacity_bytes],
            blocks: Vec::new(),
            next_handle: 1,
            stats: PoolStats {
                capacity_bytes: capacity_bytes as u32,
                ..PoolStats::default()
            },
        }
    }

    /// Pool identity reported in housekeeping telemetry.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn blocks_in_use(&self) -> usize {
        self.blocks.len()
    }

    pub fn bytes_free(&self) -> usize {
        self.capacity() - self.stats.bytes_in_use as usize
    }

    /// Allocate a zeroed buffer of `size` bytes for packet `id`.
    pub fn allocate(&mut self, id: MessageId, size: usize) -> Result<BufferHandle, PoolError> {
        let result = self.try_allocate(id, size);
        if result.is_err() {
            self.stats.failed_allocations += 1;
        }
        result
    }

    fn try_allocate(&mut self, id: MessageId, size: usize) -> Result<BufferHandle, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        let header_size = u16::try_from(size).map_err(|_| PoolError::TooLarge { requested: size })?;
        if self.blocks.is_full() {
            return Err(PoolError::TooManyBlocks { max: MAX_POOL_BLOCKS });
        }

        let reserved = size.div_ceil(POOL_ALIGNMENT) * POOL_ALIGNMENT;
        let offset = self.find_gap(reserved).ok_or(PoolError::Exhausted {
            requested: size,
            available: self.bytes_free(),
        })?;

        self.arena[offset..offset + reserved].fill(0);

        let handle = BufferHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);

        let block = Block {
            handle,
            offset,
            reserved,
            header: PacketHeader {
                id,
                size: header_size,
                timestamp_ms: 0,
            },
        };
        // Capacity checked above
        let _ = self.blocks.push(block);
        self.blocks.sort_unstable_by_key(|b| b.offset);

        self.stats.allocations += 1;
        self.stats.bytes_in_use += reserved as u32;
        self.stats.blocks_in_use = self.blocks.len() as u16;

        Ok(handle)
    }

    fn find_gap(&self, reserved: usize) -> Option<usize> {
        let mut cursor = 0;
        for block in &self.blocks {
            if block.offset - cursor >= reserved {
                return Some(cursor);
            }
            cursor = block.offset + block.reserved;
        }
        (self.arena.len() - cursor >= reserved).then_some(cursor)
    }

    /// Return a buffer to the pool.
    pub fn free(&mut self, handle: BufferHandle) -> Result<(), PoolError> {
        let index = self
            .position(handle)
            .ok_or(PoolError::UnknownBuffer { handle: handle.raw() })?;
        let block = self.blocks.remove(index);

        self.stats.frees += 1;
        self.stats.bytes_in_use -= block.reserved as u32;
        self.stats.blocks_in_use = self.blocks.len() as u16;
        Ok(())
    }

    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.position(handle).is_some()
    }

    pub fn header(&self, handle: BufferHandle) -> Option<&PacketHeader> {
        self.block(handle).map(|b| &b.header)
    }

    pub fn header_mut(&mut self, handle: BufferHandle) -> Option<&mut PacketHeader> {
        let index = self.position(handle)?;
        Some(&mut self.blocks[index].header)
    }

    /// Packet bytes, exactly `header.size` long.
    pub fn bytes(&self, handle: BufferHandle) -> Option<&[u8]> {
        let block = self.block(handle)?;
        let end = block.offset + block.header.size as usize;
        Some(&self.arena[block.offset..end])
    }

    pub fn bytes_mut(&mut self, handle: BufferHandle) -> Option<&mut [u8]> {
        let block = *self.block(handle)?;
        let end = block.offset + block.header.size as usize;
        Some(&mut self.arena[block.offset..end])
    }

    fn block(&self, handle: BufferHandle) -> Option<&Block> {
        self.blocks.iter().find(|b| b.handle == handle)
    }

    fn position(&self, handle: BufferHandle) -> Option<usize> {
        self.blocks.iter().position(|b| b.handle == handle)
    }
}
