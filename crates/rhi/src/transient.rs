//! Per-frame transient buffer allocation.
//!
//! A [`TransientBufferManager`] hands out sub-regions of one or more backing
//! buffers for data that only lives for a single frame (vertex/index/uniform
//! streams built on the CPU each frame). Allocation is a linear bump over
//! the first backing buffer with enough room; exhaustion grows the manager
//! by appending another backing buffer, so allocation never fails softly.
//!
//! The manager is reset once per frame-in-flight slot, after the slot's
//! fences prove the GPU is done with the previous contents. That discipline
//! lives in the frame driver; the manager itself is single-threaded by
//! construction (one instance per frame slot).

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::device::Device;
use crate::error::RhiResult;

/// Fixed alignment for vertex/index/indirect data.
///
/// These have no device-reported minimum offset alignment; 16 bytes covers
/// every attribute format in use.
const DEFAULT_ALIGNMENT: vk::DeviceSize = 16;

/// Default size of each backing buffer (1 MiB).
pub const DEFAULT_BLOCK_SIZE: vk::DeviceSize = 1 << 20;

/// A sub-region handed out by a transient manager.
///
/// Valid to reference in GPU commands recorded later in the same frame; dead
/// after the owning slot's next `reset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransientAlloc {
    /// Backing buffer handle.
    pub buffer: vk::Buffer,
    /// Byte offset of the region within the backing buffer.
    pub offset: vk::DeviceSize,
    /// Requested size in bytes (unaligned).
    pub size: vk::DeviceSize,
}

/// Placement bookkeeping for the backing buffers of one manager.
///
/// Kept separate from the device objects so the allocation algorithm is
/// testable on its own: each entry mirrors one backing buffer as a
/// `(high-water mark, capacity)` pair.
#[derive(Debug, Default)]
struct TransientLedger {
    blocks: Vec<BlockState>,
}

#[derive(Clone, Copy, Debug)]
struct BlockState {
    head: vk::DeviceSize,
    capacity: vk::DeviceSize,
}

impl TransientLedger {
    /// First-fit scan: bump the first block with room for `aligned` bytes.
    fn claim(&mut self, aligned: vk::DeviceSize) -> Option<(usize, vk::DeviceSize)> {
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block.capacity - block.head >= aligned {
                let offset = block.head;
                block.head += aligned;
                return Some((index, offset));
            }
        }
        None
    }

    /// Registers a new backing buffer and claims `aligned` bytes from it.
    ///
    /// The caller sizes the block to at least `aligned`, so the claim always
    /// lands at offset zero of the new block.
    fn push_and_claim(
        &mut self,
        capacity: vk::DeviceSize,
        aligned: vk::DeviceSize,
    ) -> (usize, vk::DeviceSize) {
        self.blocks.push(BlockState {
            head: aligned,
            capacity,
        });
        (self.blocks.len() - 1, 0)
    }

    /// Rewinds every high-water mark to zero.
    fn reset(&mut self) {
        for block in &mut self.blocks {
            block.head = 0;
        }
    }

    fn watermark(&self, index: usize) -> vk::DeviceSize {
        self.blocks[index].head
    }
}

fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Ring-style allocator for per-frame vertex/index/uniform data.
///
/// Backing buffers are persistently mapped and host-visible; returned
/// regions can be written immediately through [`TransientBufferManager::write`].
pub struct TransientBufferManager {
    device: Arc<Device>,
    usage: BufferUsage,
    alignment: vk::DeviceSize,
    block_size: vk::DeviceSize,
    ledger: TransientLedger,
    buffers: Vec<Buffer>,
}

impl TransientBufferManager {
    /// Creates an empty manager.
    ///
    /// The alignment is fixed here from the buffer's intended use: uniform,
    /// storage, and texel data use the device-reported minimum offset
    /// alignment for their binding kind, and vertex/index/indirect data a
    /// fixed small alignment. No backing buffer is created until the first
    /// allocation.
    pub fn new(device: Arc<Device>, usage: BufferUsage, block_size: vk::DeviceSize) -> Self {
        let limits = device.limits();
        let alignment = match usage {
            BufferUsage::Uniform => limits.min_uniform_buffer_offset_alignment,
            BufferUsage::Storage => limits.min_storage_buffer_offset_alignment,
            BufferUsage::Texel => limits.min_texel_buffer_offset_alignment,
            _ => DEFAULT_ALIGNMENT,
        }
        .max(1)
        .next_power_of_two();

        Self {
            device,
            usage,
            alignment,
            block_size: block_size.max(alignment),
            ledger: TransientLedger::default(),
            buffers: Vec::new(),
        }
    }

    /// Allocates a region of at least `size` bytes.
    ///
    /// Never fails for capacity reasons: when no existing backing buffer has
    /// room, a new one of the configured default size (or larger, for
    /// oversized requests) is appended.
    ///
    /// # Errors
    ///
    /// Returns an error only if creating a new backing buffer fails.
    pub fn allocate(&mut self, size: vk::DeviceSize) -> RhiResult<TransientAlloc> {
        let (_, alloc) = self.allocate_inner(size)?;
        Ok(alloc)
    }

    /// Allocates a region and copies `data` into it.
    ///
    /// # Errors
    ///
    /// Returns an error if growing the pool or the mapped write fails.
    pub fn write(&mut self, data: &[u8]) -> RhiResult<TransientAlloc> {
        let (index, alloc) = self.allocate_inner(data.len() as vk::DeviceSize)?;
        self.buffers[index].write_data(alloc.offset, data)?;
        Ok(alloc)
    }

    fn allocate_inner(&mut self, size: vk::DeviceSize) -> RhiResult<(usize, TransientAlloc)> {
        let aligned = align_up(size.max(1), self.alignment);

        let (index, offset) = match self.ledger.claim(aligned) {
            Some(spot) => spot,
            None => {
                let capacity = aligned.max(self.block_size);
                // Backing blocks are always host-visible, whatever the
                // usage's preferred location; regions must be writable the
                // moment they are handed out.
                let buffer = Buffer::new_mapped(self.device.clone(), self.usage, capacity)?;
                debug!(
                    "Transient {} pool grew by {} bytes ({} block(s))",
                    self.usage.name(),
                    capacity,
                    self.buffers.len() + 1
                );
                self.buffers.push(buffer);
                self.ledger.push_and_claim(capacity, aligned)
            }
        };

        let alloc = TransientAlloc {
            buffer: self.buffers[index].handle(),
            offset,
            size,
        };
        Ok((index, alloc))
    }

    /// Rewinds all high-water marks to zero.
    ///
    /// Must only be called once the GPU has finished consuming the previous
    /// frame's data in this slot; the frame driver's fence discipline
    /// enforces that, not the manager.
    pub fn reset(&mut self) {
        self.ledger.reset();
    }

    /// Flushes the written range of every backing buffer with a nonzero
    /// high-water mark.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush fails.
    pub fn flush(&self) -> RhiResult<()> {
        for (index, buffer) in self.buffers.iter().enumerate() {
            let watermark = self.ledger.watermark(index);
            if watermark > 0 {
                buffer.flush_range(0, watermark)?;
            }
        }
        Ok(())
    }

    /// Returns the number of backing buffers.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.buffers.len()
    }

    /// Returns the alignment applied to every allocation.
    #[inline]
    pub fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The device-facing manager only adds buffer creation on top of the
    // ledger, so the allocator invariants are exercised on the ledger with
    // the same grow-on-exhaustion policy the manager applies.
    struct Harness {
        ledger: TransientLedger,
        alignment: vk::DeviceSize,
        block_size: vk::DeviceSize,
    }

    impl Harness {
        fn new(alignment: vk::DeviceSize, block_size: vk::DeviceSize) -> Self {
            Self {
                ledger: TransientLedger::default(),
                alignment,
                block_size,
            }
        }

        fn allocate(&mut self, size: vk::DeviceSize) -> (usize, vk::DeviceSize, vk::DeviceSize) {
            let aligned = align_up(size.max(1), self.alignment);
            let (index, offset) = match self.ledger.claim(aligned) {
                Some(spot) => spot,
                None => self
                    .ledger
                    .push_and_claim(aligned.max(self.block_size), aligned),
            };
            (index, offset, aligned)
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(255, 256), 256);
    }

    #[test]
    fn test_first_allocation_starts_at_zero() {
        let mut harness = Harness::new(16, 1024);
        let (block, offset, _) = harness.allocate(100);
        assert_eq!((block, offset), (0, 0));
    }

    #[test]
    fn test_sequential_allocations_bump_aligned() {
        let mut harness = Harness::new(16, 1024);
        let (_, a, _) = harness.allocate(10);
        let (_, b, _) = harness.allocate(10);
        let (_, c, _) = harness.allocate(10);
        assert_eq!((a, b, c), (0, 16, 32));
    }

    #[test]
    fn test_exhaustion_appends_blocks() {
        let mut harness = Harness::new(16, 64);
        for _ in 0..4 {
            let (block, _, _) = harness.allocate(16);
            assert_eq!(block, 0);
        }
        // Block 0 is full; the next allocation must land in a fresh block.
        let (block, offset, _) = harness.allocate(16);
        assert_eq!((block, offset), (1, 0));
    }

    #[test]
    fn test_oversized_request_gets_dedicated_block() {
        let mut harness = Harness::new(16, 64);
        let (block, offset, aligned) = harness.allocate(1000);
        assert_eq!((block, offset), (0, 0));
        assert_eq!(aligned, align_up(1000, 16));
        assert_eq!(harness.ledger.blocks[0].capacity, align_up(1000, 16));
    }

    #[test]
    fn test_live_regions_never_overlap() {
        // Random-ish sizes whose cumulative aligned total exceeds several
        // blocks; every live region must be disjoint from every other.
        let mut harness = Harness::new(16, 256);
        let sizes = [1, 17, 200, 64, 250, 3, 90, 256, 31, 128, 77, 240];
        let mut live: Vec<(usize, vk::DeviceSize, vk::DeviceSize)> = Vec::new();

        for &size in &sizes {
            let (block, offset, aligned) = harness.allocate(size);
            for &(other_block, other_offset, other_aligned) in &live {
                if block != other_block {
                    continue;
                }
                let disjoint =
                    offset + aligned <= other_offset || other_offset + other_aligned <= offset;
                assert!(
                    disjoint,
                    "region {:?} overlaps {:?}",
                    (block, offset, aligned),
                    (other_block, other_offset, other_aligned)
                );
            }
            live.push((block, offset, aligned));
        }
        assert!(harness.ledger.blocks.len() > 1);
    }

    #[test]
    fn test_reset_rewinds_to_first_block() {
        let mut harness = Harness::new(16, 64);
        for _ in 0..10 {
            harness.allocate(48);
        }
        let blocks_before = harness.ledger.blocks.len();

        harness.ledger.reset();
        let (block, offset, _) = harness.allocate(8);
        assert_eq!((block, offset), (0, 0));
        // Reset rewinds; it does not release backing storage.
        assert_eq!(harness.ledger.blocks.len(), blocks_before);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut harness = Harness::new(16, 64);
        harness.allocate(32);
        harness.ledger.reset();
        harness.ledger.reset();
        let (block, offset, _) = harness.allocate(8);
        assert_eq!((block, offset), (0, 0));
    }

    #[test]
    fn test_watermark_tracks_claims() {
        let mut harness = Harness::new(16, 128);
        harness.allocate(16);
        harness.allocate(16);
        assert_eq!(harness.ledger.watermark(0), 32);
    }
}
