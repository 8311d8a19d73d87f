// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Best-fit sub-allocation of large GPU buffers.
//!
//! Each pool owns one driver buffer and an ordered block list stored in an
//! index arena. Allocation picks the smallest free block that fits, splitting
//! off the remainder when it is worth keeping; freeing merges the released
//! block with free neighbours so two adjacent free blocks never coexist.

use super::arena::{Block, BlockArena};
use super::stream_ring::{StreamAllocation, StreamRingAllocator};
use super::{align_up, AllocError, ALLOCATION_ALIGNMENT};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use velocity_core::renderer::{
    BufferDescriptor, BufferDevice, BufferId, BufferTarget, BufferUsage, FenceSync, MappedMemory,
};
use velocity_core::{GpuCapabilities, VelocityConfig};

/// Maximum number of pools alive at once.
pub const MAX_POOLS: usize = 8;

/// Identifies a pool. Ids of destroyed pools are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId {
    index: u32,
    serial: u32,
}

impl PoolId {
    /// The pool's slot in the allocator.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Construction parameters for [`BufferPoolAllocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolSettings {
    /// Allow persistent mappings (still subject to driver support).
    pub persistent_mapping: bool,
    /// Size of the streaming ring buffer in bytes; zero disables it.
    pub stream_buffer_size: u64,
    /// Longest a stream frame waits on the fence guarding its slice.
    pub fence_timeout: Duration,
}

impl BufferPoolSettings {
    /// Derives the settings from the runtime configuration.
    pub fn from_config(config: &VelocityConfig) -> Self {
        Self {
            persistent_mapping: config.enable_persistent_mapping,
            stream_buffer_size: u64::from(config.buffer_pool_size_mb) * 1024 * 1024,
            ..Self::default()
        }
    }
}

impl Default for BufferPoolSettings {
    fn default() -> Self {
        Self {
            persistent_mapping: true,
            stream_buffer_size: 32 * 1024 * 1024,
            fence_timeout: Duration::from_secs(1),
        }
    }
}

/// A live sub-allocation.
///
/// The handle is consumed by [`BufferPoolAllocator::free`], so it cannot be
/// released twice.
#[derive(Debug)]
pub struct BufferAllocation {
    pool: PoolId,
    block: usize,
    buffer: BufferId,
    offset: u64,
    size: u64,
    aligned_size: u64,
    mapping: Option<Arc<dyn MappedMemory>>,
}

impl BufferAllocation {
    /// The pool this allocation lives in.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// The driver buffer backing the pool.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Byte offset of the allocation inside the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The size originally requested.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The size of the block actually reserved.
    pub fn aligned_size(&self) -> u64 {
        self.aligned_size
    }

    /// Whether writes go straight into a persistent mapping.
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), AllocError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(AllocError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

/// A CPU-writable window onto part of an allocation.
#[derive(Debug)]
pub struct MappedRange {
    memory: Arc<dyn MappedMemory>,
    base: u64,
    len: u64,
}

impl MappedRange {
    /// Length of the window, in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `data` at `offset` within the window.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), AllocError> {
        self.check(offset, data.len() as u64)?;
        Ok(self.memory.write(self.base + offset, data)?)
    }

    /// Reads back bytes at `offset` within the window.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), AllocError> {
        self.check(offset, out.len() as u64)?;
        Ok(self.memory.read(self.base + offset, out)?)
    }

    fn check(&self, offset: u64, len: u64) -> Result<(), AllocError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(AllocError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }
}

/// One block of a pool, as reported by [`BufferPoolAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Byte offset inside the pool buffer.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    /// Whether the block is available.
    pub free: bool,
}

/// Per-pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Size of the pool buffer.
    pub total_bytes: u64,
    /// Bytes held by live allocations (aligned sizes).
    pub used_bytes: u64,
    /// Bytes not held by live allocations.
    pub free_bytes: u64,
    /// Number of blocks in the list.
    pub block_count: usize,
    /// Number of free blocks in the list.
    pub free_block_count: usize,
    /// Largest single allocation that can currently succeed.
    pub largest_free_block: u64,
    /// Successful allocations over the pool's lifetime.
    pub allocation_count: u64,
    /// Releases over the pool's lifetime.
    pub free_count: u64,
    /// Whether the pool is persistently mapped.
    pub persistent: bool,
}

/// Statistics across every pool and the streaming ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferPoolStats {
    /// Live pools.
    pub pool_count: usize,
    /// Bytes reserved by pool buffers.
    pub total_bytes: u64,
    /// Bytes held by live allocations.
    pub used_bytes: u64,
    /// Successful allocations since the allocator was created.
    pub allocation_count: u64,
    /// Allocations not yet freed.
    pub live_allocations: u64,
    /// Bytes handed out from the streaming ring in the current frame.
    pub stream_bytes_used: u64,
}

#[derive(Debug)]
struct Pool {
    id: PoolId,
    buffer: BufferId,
    target: BufferTarget,
    usage: BufferUsage,
    total_size: u64,
    used_size: u64,
    blocks: BlockArena,
    head: usize,
    mapping: Option<Arc<dyn MappedMemory>>,
    allocation_count: u64,
    free_count: u64,
}

impl Pool {
    fn new(
        id: PoolId,
        buffer: BufferId,
        target: BufferTarget,
        usage: BufferUsage,
        size: u64,
        mapping: Option<Arc<dyn MappedMemory>>,
    ) -> Self {
        let mut blocks = BlockArena::default();
        let head = blocks.insert(Block {
            offset: 0,
            size,
            free: true,
            prev: None,
            next: None,
        });
        Self {
            id,
            buffer,
            target,
            usage,
            total_size: size,
            used_size: 0,
            blocks,
            head,
            mapping,
            allocation_count: 0,
            free_count: 0,
        }
    }

    /// Walks the block list in offset order.
    fn iter(&self) -> impl Iterator<Item = (usize, &Block)> + '_ {
        let mut cursor = Some(self.head);
        std::iter::from_fn(move || {
            let index = cursor?;
            let block = self.blocks.get(index)?;
            cursor = block.next;
            Some((index, block))
        })
    }

    fn best_fit(&self, size: u64) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (index, block) in self.iter() {
            if !block.free || block.size < size {
                continue;
            }
            if block.size == size {
                return Some(index);
            }
            if best.map_or(true, |(_, best_size)| block.size < best_size) {
                best = Some((index, block.size));
            }
        }
        best.map(|(index, _)| index)
    }

    fn allocate(&mut self, size: u64) -> Option<(usize, Block)> {
        let index = self.best_fit(size)?;
        let mut block = *self.blocks.get(index)?;

        if block.size > size.saturating_add(ALLOCATION_ALIGNMENT) {
            let remainder = self.blocks.insert(Block {
                offset: block.offset + size,
                size: block.size - size,
                free: true,
                prev: Some(index),
                next: block.next,
            });
            self.relink_prev(block.next, remainder);
            block.next = Some(remainder);
            block.size = size;
        }

        block.free = false;
        *self.blocks.get_mut(index)? = block;
        self.used_size += block.size;
        self.allocation_count += 1;
        Some((index, block))
    }

    fn release(&mut self, index: usize, offset: u64) -> Result<u64, AllocError> {
        let mut block = match self.blocks.get(index) {
            Some(block) if !block.free && block.offset == offset => *block,
            _ => return Err(AllocError::StaleHandle),
        };
        let released = block.size;
        block.free = true;
        self.used_size -= released;
        self.free_count += 1;

        if let Some(next_index) = block.next {
            if let Some(next) = self.blocks.get(next_index).copied().filter(|b| b.free) {
                block.size += next.size;
                block.next = next.next;
                self.relink_prev(next.next, index);
                self.blocks.remove(next_index);
            }
        }

        let free_prev = block
            .prev
            .filter(|&p| self.blocks.get(p).is_some_and(|b| b.free));
        if let Some(prev_index) = free_prev {
            if let Some(prev) = self.blocks.get_mut(prev_index) {
                prev.size += block.size;
                prev.next = block.next;
            }
            self.relink_prev(block.next, prev_index);
            self.blocks.remove(index);
        } else if let Some(slot) = self.blocks.get_mut(index) {
            *slot = block;
        }

        Ok(released)
    }

    fn relink_prev(&mut self, block: Option<usize>, prev: usize) {
        if let Some(block) = block.and_then(|i| self.blocks.get_mut(i)) {
            block.prev = Some(prev);
        }
    }

    fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total_bytes: self.total_size,
            used_bytes: self.used_size,
            free_bytes: self.total_size - self.used_size,
            allocation_count: self.allocation_count,
            free_count: self.free_count,
            persistent: self.mapping.is_some(),
            ..Default::default()
        };
        for (_, block) in self.iter() {
            stats.block_count += 1;
            if block.free {
                stats.free_block_count += 1;
                stats.largest_free_block = stats.largest_free_block.max(block.size);
            }
        }
        stats
    }
}

#[derive(Debug)]
struct PoolTable {
    pools: Vec<Option<Pool>>,
    next_serial: u32,
    allocation_count: u64,
}

impl PoolTable {
    fn get(&self, id: PoolId) -> Result<&Pool, AllocError> {
        self.pools
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|pool| pool.id == id)
            .ok_or(AllocError::InvalidPool(id))
    }

    fn get_mut(&mut self, id: PoolId) -> Result<&mut Pool, AllocError> {
        self.pools
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|pool| pool.id == id)
            .ok_or(AllocError::InvalidPool(id))
    }
}

/// Sub-allocates vertex, index and uniform data out of a handful of large
/// driver buffers, and owns the per-frame streaming ring.
///
/// All methods take `&self`: pool state sits behind one mutex so a loading
/// thread can allocate while the render thread uploads.
#[derive(Debug)]
pub struct BufferPoolAllocator {
    device: Arc<dyn BufferDevice>,
    persistent_mapping: bool,
    table: Mutex<PoolTable>,
    stream: Option<Mutex<StreamRingAllocator>>,
}

impl BufferPoolAllocator {
    /// Creates the allocator and its streaming ring.
    ///
    /// Persistent mappings are used only when both the driver and the
    /// settings allow them.
    /// ## Errors
    /// * `AllocError::Device` - If the streaming ring buffer cannot be created.
    pub fn new(
        device: Arc<dyn BufferDevice>,
        fences: Arc<dyn FenceSync>,
        caps: &GpuCapabilities,
        settings: &BufferPoolSettings,
    ) -> Result<Self, AllocError> {
        let persistent_mapping = caps.persistent_mapping && settings.persistent_mapping;

        let stream = if settings.stream_buffer_size > 0 {
            let ring = StreamRingAllocator::new(
                Arc::clone(&device),
                fences,
                settings.stream_buffer_size,
                persistent_mapping,
                settings.fence_timeout,
            )?;
            Some(Mutex::new(ring))
        } else {
            None
        };

        log::info!(
            "Buffer pool allocator initialized (persistent mapping: {}, stream buffer: {} KB)",
            persistent_mapping,
            settings.stream_buffer_size / 1024
        );

        Ok(Self {
            device,
            persistent_mapping,
            table: Mutex::new(PoolTable {
                pools: (0..MAX_POOLS).map(|_| None).collect(),
                next_serial: 0,
                allocation_count: 0,
            }),
            stream,
        })
    }

    fn table(&self) -> MutexGuard<'_, PoolTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream(&self) -> Option<MutexGuard<'_, StreamRingAllocator>> {
        self.stream
            .as_ref()
            .map(|ring| ring.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Whether new dynamic and stream pools will be persistently mapped.
    pub fn persistent_mapping(&self) -> bool {
        self.persistent_mapping
    }

    /// Creates a pool backed by one buffer of `size` bytes.
    /// ## Errors
    /// * `AllocError::ZeroSize` - If `size` is zero.
    /// * `AllocError::PoolLimit` - If [`MAX_POOLS`] pools already exist.
    /// * `AllocError::Device` - If the driver refuses the buffer.
    pub fn create_pool(
        &self,
        target: BufferTarget,
        usage: BufferUsage,
        size: u64,
    ) -> Result<PoolId, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let mut table = self.table();
        let index = table
            .pools
            .iter()
            .position(Option::is_none)
            .ok_or(AllocError::PoolLimit)?;

        let persistent = self.persistent_mapping && usage.prefers_persistent_mapping();
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(format!("velocity_pool_{index}")),
            size,
            target,
            usage,
            persistent,
        })?;

        let mapping = if persistent {
            match self.device.map_persistent(buffer) {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    log::warn!(
                        "BufferPool({index}): persistent mapping failed, falling back to explicit uploads: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        table.next_serial = table.next_serial.wrapping_add(1);
        let id = PoolId {
            index: index as u32,
            serial: table.next_serial,
        };

        log::info!(
            "Created buffer pool {}: {} KB, target={:?}, usage={:?}, persistent={}",
            index,
            size / 1024,
            target,
            usage,
            mapping.is_some()
        );
        table.pools[index] = Some(Pool::new(id, buffer, target, usage, size, mapping));
        Ok(id)
    }

    /// Destroys a pool and its buffer.
    ///
    /// Handles still pointing into the pool become stale; freeing them
    /// returns [`AllocError::InvalidPool`].
    pub fn destroy_pool(&self, id: PoolId) -> Result<(), AllocError> {
        let pool = {
            let mut table = self.table();
            table.get(id)?;
            table.pools[id.index()].take()
        };
        let Some(pool) = pool else {
            return Err(AllocError::InvalidPool(id));
        };

        let live = pool.allocation_count - pool.free_count;
        if live > 0 {
            log::debug!(
                "Destroying buffer pool {} ({:?}/{:?}) with {} live allocations",
                id.index(),
                pool.target,
                pool.usage,
                live
            );
        }
        self.device.destroy_buffer(pool.buffer)?;
        Ok(())
    }

    /// Reserves `size` bytes from a pool.
    ///
    /// The size is aligned up to 256 bytes. The smallest free block that fits
    /// is used; it is split when the leftover exceeds the alignment.
    /// ## Errors
    /// * `AllocError::ZeroSize` - If `size` is zero.
    /// * `AllocError::InvalidPool` - If the pool does not exist.
    /// * `AllocError::OutOfSpace` - If no free block is large enough.
    pub fn alloc(&self, pool_id: PoolId, size: u64) -> Result<BufferAllocation, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let out_of_space = |requested| AllocError::OutOfSpace {
            pool: pool_id,
            requested,
        };
        let aligned = align_up(size).ok_or_else(|| out_of_space(size))?;

        let mut table = self.table();
        let pool = table.get_mut(pool_id)?;
        let Some((block, reserved)) = pool.allocate(aligned) else {
            log::warn!(
                "BufferPool({}): no free block for {} bytes ({} of {} bytes in use)",
                pool_id.index(),
                aligned,
                pool.used_size,
                pool.total_size
            );
            return Err(out_of_space(aligned));
        };

        let allocation = BufferAllocation {
            pool: pool_id,
            block,
            buffer: pool.buffer,
            offset: reserved.offset,
            size,
            aligned_size: reserved.size,
            mapping: pool.mapping.clone(),
        };
        table.allocation_count += 1;

        log::trace!(
            "BufferPool({}): allocated {} bytes at offset {}",
            pool_id.index(),
            allocation.aligned_size,
            allocation.offset
        );
        Ok(allocation)
    }

    /// Returns an allocation to its pool, merging it with free neighbours.
    pub fn free(&self, allocation: BufferAllocation) -> Result<(), AllocError> {
        let mut table = self.table();
        let pool = match table.get_mut(allocation.pool) {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("Ignoring free of allocation into a destroyed pool: {e}");
                return Err(e);
            }
        };
        let released = pool.release(allocation.block, allocation.offset)?;
        log::trace!(
            "BufferPool({}): freed {} bytes at offset {}",
            allocation.pool.index(),
            released,
            allocation.offset
        );
        Ok(())
    }

    /// Copies `data` into the allocation at `offset`.
    ///
    /// Mapped pools receive a direct copy; other pools go through an explicit
    /// buffer write.
    /// ## Errors
    /// * `AllocError::OutOfBounds` - If the write exceeds the requested size.
    pub fn upload(
        &self,
        allocation: &BufferAllocation,
        data: &[u8],
        offset: u64,
    ) -> Result<(), AllocError> {
        allocation.check_range(offset, data.len() as u64)?;
        let _table = self.live_guard(allocation)?;

        let absolute = allocation.offset + offset;
        match &allocation.mapping {
            Some(mapping) => mapping.write(absolute, data)?,
            None => self.device.write_buffer(allocation.buffer, absolute, data)?,
        }
        Ok(())
    }

    /// Maps `size` bytes of the allocation starting at `offset`.
    ///
    /// Mapped pools return a view into the persistent mapping; other pools
    /// map the range until [`BufferPoolAllocator::unmap`].
    pub fn map(
        &self,
        allocation: &BufferAllocation,
        offset: u64,
        size: u64,
    ) -> Result<MappedRange, AllocError> {
        allocation.check_range(offset, size)?;
        let _table = self.live_guard(allocation)?;

        let absolute = allocation.offset + offset;
        match &allocation.mapping {
            Some(mapping) => Ok(MappedRange {
                memory: Arc::clone(mapping),
                base: absolute,
                len: size,
            }),
            None => Ok(MappedRange {
                memory: self.device.map_range(allocation.buffer, absolute, size)?,
                base: 0,
                len: size,
            }),
        }
    }

    /// Ends a transient mapping. No-op for persistently mapped pools.
    pub fn unmap(&self, allocation: &BufferAllocation) -> Result<(), AllocError> {
        let _table = self.live_guard(allocation)?;
        if allocation.mapping.is_none() {
            self.device.unmap(allocation.buffer)?;
        }
        Ok(())
    }

    /// Makes writes through a persistent mapping visible to the GPU.
    /// No-op for pools without one.
    pub fn flush(
        &self,
        allocation: &BufferAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), AllocError> {
        allocation.check_range(offset, size)?;
        let _table = self.live_guard(allocation)?;
        if allocation.mapping.is_some() {
            self.device
                .flush_mapped_range(allocation.buffer, allocation.offset + offset, size)?;
        }
        Ok(())
    }

    fn live_guard(
        &self,
        allocation: &BufferAllocation,
    ) -> Result<MutexGuard<'_, PoolTable>, AllocError> {
        let table = self.table();
        table.get(allocation.pool)?;
        Ok(table)
    }

    /// Statistics for one pool.
    pub fn pool_stats(&self, id: PoolId) -> Result<PoolStats, AllocError> {
        Ok(self.table().get(id)?.stats())
    }

    /// The block list of a pool, in offset order.
    pub fn blocks(&self, id: PoolId) -> Result<Vec<BlockInfo>, AllocError> {
        let table = self.table();
        let pool = table.get(id)?;
        Ok(pool
            .iter()
            .map(|(_, block)| BlockInfo {
                offset: block.offset,
                size: block.size,
                free: block.free,
            })
            .collect())
    }

    /// Statistics across all pools.
    pub fn stats(&self) -> BufferPoolStats {
        let mut stats = {
            let table = self.table();
            let mut stats = BufferPoolStats {
                allocation_count: table.allocation_count,
                ..Default::default()
            };
            for pool in table.pools.iter().flatten() {
                stats.pool_count += 1;
                stats.total_bytes += pool.total_size;
                stats.used_bytes += pool.used_size;
                stats.live_allocations += pool.allocation_count - pool.free_count;
            }
            stats
        };
        if let Some(ring) = self.stream() {
            stats.stream_bytes_used = ring.used_bytes();
        }
        stats
    }

    /// Starts a streaming frame, waiting for the GPU to release the slice.
    pub fn stream_begin_frame(&self) {
        if let Some(mut ring) = self.stream() {
            ring.begin_frame();
        }
    }

    /// Reserves transient space in the current streaming slice.
    ///
    /// Returns `None` when the slice is exhausted or streaming is disabled.
    pub fn stream_alloc(&self, size: u64, data: Option<&[u8]>) -> Option<StreamAllocation> {
        self.stream()?.alloc(size, data)
    }

    /// Ends a streaming frame, fencing the slice just written.
    pub fn stream_end_frame(&self) {
        if let Some(mut ring) = self.stream() {
            ring.end_frame();
        }
    }
}

impl Drop for BufferPoolAllocator {
    fn drop(&mut self) {
        let table = self
            .table
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for pool in table.pools.iter_mut().filter_map(Option::take) {
            if let Err(e) = self.device.destroy_buffer(pool.buffer) {
                log::warn!(
                    "BufferPool({}): Failed to destroy buffer {:?}: {:?}",
                    pool.id.index(),
                    pool.buffer,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::{MockBufferDevice, MockFences};
    use super::*;
    use std::sync::atomic::Ordering;

    const MB: u64 = 1024 * 1024;

    fn caps(persistent: bool) -> GpuCapabilities {
        GpuCapabilities {
            persistent_mapping: persistent,
            ..Default::default()
        }
    }

    fn allocator_with(device: Arc<MockBufferDevice>, persistent: bool) -> BufferPoolAllocator {
        let settings = BufferPoolSettings {
            stream_buffer_size: 0,
            ..Default::default()
        };
        BufferPoolAllocator::new(
            device,
            Arc::new(MockFences::default()),
            &caps(persistent),
            &settings,
        )
        .unwrap()
    }

    fn allocator() -> BufferPoolAllocator {
        allocator_with(Arc::new(MockBufferDevice::default()), false)
    }

    fn assert_pool_invariants(allocator: &BufferPoolAllocator, pool: PoolId) {
        let blocks = allocator.blocks(pool).unwrap();
        let stats = allocator.pool_stats(pool).unwrap();

        let total: u64 = blocks.iter().map(|b| b.size).sum();
        assert_eq!(total, stats.total_bytes, "block sizes must cover the pool");

        let mut expected_offset = 0;
        for block in &blocks {
            assert_eq!(block.offset, expected_offset, "blocks must be contiguous");
            expected_offset += block.size;
        }
        for pair in blocks.windows(2) {
            assert!(
                !(pair[0].free && pair[1].free),
                "adjacent free blocks at {} and {}",
                pair[0].offset,
                pair[1].offset
            );
        }
        let used: u64 = blocks.iter().filter(|b| !b.free).map(|b| b.size).sum();
        assert_eq!(used, stats.used_bytes);
    }

    #[test]
    fn test_freed_block_is_reused_by_best_fit() {
        let allocator = allocator();
        let pool = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Static, MB)
            .unwrap();

        let a = allocator.alloc(pool, 300_000).unwrap();
        let b = allocator.alloc(pool, 300_000).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(a.aligned_size(), 300_032);
        assert_eq!(b.offset(), 300_032);

        allocator.free(a).unwrap();
        let c = allocator.alloc(pool, 300_000).unwrap();
        assert_eq!(c.offset(), 0);
        assert_pool_invariants(&allocator, pool);
    }

    #[test]
    fn test_small_remainder_is_not_split() {
        let allocator = allocator();
        let pool = allocator
            .create_pool(BufferTarget::Index, BufferUsage::Static, 1024)
            .unwrap();

        let a = allocator.alloc(pool, 700).unwrap();
        assert_eq!(a.size(), 700);
        assert_eq!(a.aligned_size(), 1024);
        assert_eq!(allocator.pool_stats(pool).unwrap().block_count, 1);
    }

    #[test]
    fn test_free_coalesces_both_neighbours() {
        let allocator = allocator();
        let pool = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Static, 4096)
            .unwrap();

        let a = allocator.alloc(pool, 1024).unwrap();
        let b = allocator.alloc(pool, 1024).unwrap();
        let c = allocator.alloc(pool, 1024).unwrap();
        assert_eq!(allocator.pool_stats(pool).unwrap().block_count, 4);

        allocator.free(a).unwrap();
        allocator.free(c).unwrap();
        assert_pool_invariants(&allocator, pool);
        assert_eq!(allocator.pool_stats(pool).unwrap().free_block_count, 2);

        allocator.free(b).unwrap();
        let blocks = allocator.blocks(pool).unwrap();
        assert_eq!(
            blocks,
            vec![BlockInfo {
                offset: 0,
                size: 4096,
                free: true
            }]
        );
    }

    #[test]
    fn test_block_list_invariants_hold_under_churn() {
        let allocator = allocator();
        let pool = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Dynamic, 256 * 1024)
            .unwrap();

        // Deterministic LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_f491;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };

        let mut live = Vec::new();
        for _ in 0..500 {
            if live.is_empty() || next() % 3 != 0 {
                let size = 1 + next() % 8000;
                if let Ok(allocation) = allocator.alloc(pool, size) {
                    live.push(allocation);
                }
            } else {
                let victim = (next() as usize) % live.len();
                allocator.free(live.swap_remove(victim)).unwrap();
            }
            assert_pool_invariants(&allocator, pool);
        }

        for allocation in live.drain(..) {
            allocator.free(allocation).unwrap();
        }
        assert_eq!(allocator.pool_stats(pool).unwrap().block_count, 1);
        assert_eq!(allocator.stats().live_allocations, 0);
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let allocator = allocator();
        let pool = allocator
            .create_pool(BufferTarget::Uniform, BufferUsage::Static, 1024)
            .unwrap();

        assert_eq!(allocator.alloc(pool, 0).unwrap_err(), AllocError::ZeroSize);
        let a = allocator.alloc(pool, 512).unwrap();
        let err = allocator.alloc(pool, 1024).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfSpace {
                pool,
                requested: 1024
            }
        );

        allocator.free(a).unwrap();
        assert!(allocator.alloc(pool, 1024).is_ok());
    }

    #[test]
    fn test_pool_limit_and_destroy() {
        let device = Arc::new(MockBufferDevice::default());
        let allocator = allocator_with(Arc::clone(&device), false);

        let pools: Vec<_> = (0..MAX_POOLS)
            .map(|_| {
                allocator
                    .create_pool(BufferTarget::Vertex, BufferUsage::Static, 4096)
                    .unwrap()
            })
            .collect();
        assert_eq!(
            allocator
                .create_pool(BufferTarget::Vertex, BufferUsage::Static, 4096)
                .unwrap_err(),
            AllocError::PoolLimit
        );

        let stale = allocator.alloc(pools[3], 256).unwrap();
        allocator.destroy_pool(pools[3]).unwrap();
        assert_eq!(device.live_buffers(), MAX_POOLS - 1);

        let replacement = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Static, 4096)
            .unwrap();
        assert_eq!(replacement.index(), pools[3].index());
        assert_ne!(replacement, pools[3]);
        assert_eq!(
            allocator.free(stale).unwrap_err(),
            AllocError::InvalidPool(pools[3])
        );

        drop(allocator);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_dynamic_pools_upload_through_persistent_mapping() {
        let device = Arc::new(MockBufferDevice::default());
        let allocator = allocator_with(Arc::clone(&device), true);

        let dynamic = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Dynamic, 4096)
            .unwrap();
        let fixed = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Static, 4096)
            .unwrap();

        let mapped = allocator.alloc(dynamic, 64).unwrap();
        let unmapped = allocator.alloc(fixed, 64).unwrap();
        assert!(mapped.is_mapped());
        assert!(!unmapped.is_mapped());

        allocator.upload(&mapped, &[7; 16], 8).unwrap();
        assert_eq!(device.explicit_writes.load(Ordering::Relaxed), 0);
        allocator.upload(&unmapped, &[9; 16], 0).unwrap();
        assert_eq!(device.explicit_writes.load(Ordering::Relaxed), 1);

        assert_eq!(device.contents(mapped.buffer(), mapped.offset() + 8, 16), vec![7; 16]);
        assert_eq!(device.contents(unmapped.buffer(), unmapped.offset(), 16), vec![9; 16]);
    }

    #[test]
    fn test_persistent_mapping_failure_falls_back() {
        let device = Arc::new(MockBufferDevice::refusing_persistent());
        let allocator = allocator_with(Arc::clone(&device), true);

        let pool = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Stream, 4096)
            .unwrap();
        assert!(!allocator.pool_stats(pool).unwrap().persistent);

        let allocation = allocator.alloc(pool, 32).unwrap();
        allocator.upload(&allocation, &[1; 32], 0).unwrap();
        assert_eq!(device.explicit_writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_upload_is_bounds_checked() {
        let allocator = allocator();
        let pool = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Static, 4096)
            .unwrap();
        let allocation = allocator.alloc(pool, 100).unwrap();

        // The block is 256 bytes but only 100 were requested.
        let err = allocator.upload(&allocation, &[0; 64], 50).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfBounds {
                offset: 50,
                len: 64,
                size: 100
            }
        );
    }

    #[test]
    fn test_map_unmapped_pool_uses_transient_range() {
        let device = Arc::new(MockBufferDevice::default());
        let allocator = allocator_with(Arc::clone(&device), false);
        let pool = allocator
            .create_pool(BufferTarget::Index, BufferUsage::Dynamic, 4096)
            .unwrap();
        let _pad = allocator.alloc(pool, 256).unwrap();
        let allocation = allocator.alloc(pool, 128).unwrap();

        let range = allocator.map(&allocation, 16, 32).unwrap();
        range.write(0, &[3; 32]).unwrap();
        assert!(range.write(1, &[3; 32]).is_err());
        allocator.unmap(&allocation).unwrap();
        allocator.flush(&allocation, 0, 32).unwrap();

        assert_eq!(device.transient_maps.load(Ordering::Relaxed), 1);
        assert_eq!(device.flushes.load(Ordering::Relaxed), 0);
        assert_eq!(device.contents(allocation.buffer(), 256 + 16, 32), vec![3; 32]);
    }

    #[test]
    fn test_manager_stats_aggregate_pools() {
        let allocator = allocator();
        let a = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Static, 8192)
            .unwrap();
        let b = allocator
            .create_pool(BufferTarget::Index, BufferUsage::Static, 4096)
            .unwrap();

        let x = allocator.alloc(a, 1000).unwrap();
        let _y = allocator.alloc(b, 10).unwrap();
        allocator.free(x).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.pool_count, 2);
        assert_eq!(stats.total_bytes, 12_288);
        assert_eq!(stats.used_bytes, 256);
        assert_eq!(stats.allocation_count, 2);
        assert_eq!(stats.live_allocations, 1);
    }

    #[test]
    fn test_concurrent_alloc_free_keeps_pool_consistent() {
        let allocator = Arc::new(allocator());
        let pool = allocator
            .create_pool(BufferTarget::Vertex, BufferUsage::Dynamic, 4 * MB)
            .unwrap();

        let workers: Vec<_> = (0..2u64)
            .map(|worker| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    let mut live = std::collections::VecDeque::new();
                    for i in 0..500u64 {
                        let size = 64 + (i * 37 + worker * 1013) % 16_384;
                        let allocation = allocator.alloc(pool, size).unwrap();
                        allocator.upload(&allocation, &[worker as u8; 16], 0).unwrap();
                        live.push_back(allocation);
                        if live.len() > 8 {
                            allocator.free(live.pop_front().unwrap()).unwrap();
                        }
                    }
                    for allocation in live {
                        allocator.free(allocation).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_pool_invariants(&allocator, pool);
        let stats = allocator.pool_stats(pool).unwrap();
        assert_eq!(stats.used_bytes, 0);
        assert_eq!(stats.block_count, 1);
        assert_eq!(stats.allocation_count, 1000);
        assert_eq!(stats.free_count, 1000);
        assert_eq!(allocator.stats().live_allocations, 0);
    }
}
