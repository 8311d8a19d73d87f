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

//! A triple-buffered ring for data rewritten every frame.
//!
//! One buffer is split into [`STREAM_FRAME_COUNT`] equal slices. Each frame
//! bump-allocates out of its own slice; a fence recorded at the end of the
//! frame keeps the CPU from overwriting that slice while the GPU may still
//! read it.

use super::{align_up, ALLOCATION_ALIGNMENT};
use std::sync::Arc;
use std::time::Duration;
use velocity_core::renderer::{
    BufferDescriptor, BufferDevice, BufferId, BufferTarget, BufferUsage, FenceId, FenceStatus,
    FenceSync, MappedMemory, ResourceError,
};

/// Number of frames that may be in flight at once.
pub const STREAM_FRAME_COUNT: usize = 3;

/// A transient region valid until the same slice comes round again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAllocation {
    /// The ring buffer.
    pub buffer: BufferId,
    /// Byte offset inside the ring buffer.
    pub offset: u64,
    /// Aligned size of the region.
    pub size: u64,
}

/// Bump allocator over a fenced, triple-buffered streaming buffer.
#[derive(Debug)]
pub struct StreamRingAllocator {
    device: Arc<dyn BufferDevice>,
    fences: Arc<dyn FenceSync>,
    buffer: BufferId,
    mapping: Option<Arc<dyn MappedMemory>>,
    slice_size: u64,
    frame: u64,
    slice: usize,
    cursor: u64,
    slice_fences: [Option<FenceId>; STREAM_FRAME_COUNT],
    fence_timeout: Duration,
    overflow_count: u64,
}

impl StreamRingAllocator {
    /// Creates the ring buffer.
    ///
    /// `size` is split into three slices, each rounded down to the
    /// allocation alignment.
    /// ## Errors
    /// * `ResourceError` - If the driver refuses the buffer.
    pub fn new(
        device: Arc<dyn BufferDevice>,
        fences: Arc<dyn FenceSync>,
        size: u64,
        persistent: bool,
        fence_timeout: Duration,
    ) -> Result<Self, ResourceError> {
        let slice_size = (size / STREAM_FRAME_COUNT as u64) & !(ALLOCATION_ALIGNMENT - 1);
        if slice_size == 0 {
            return Err(ResourceError::BackendError(format!(
                "stream buffer of {size} bytes is too small for {STREAM_FRAME_COUNT} slices"
            )));
        }

        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some("velocity_stream_ring".to_string()),
            size,
            target: BufferTarget::Vertex,
            usage: BufferUsage::Stream,
            persistent,
        })?;

        let mapping = if persistent {
            match device.map_persistent(buffer) {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    log::warn!("StreamRing: persistent mapping failed, using explicit uploads: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            device,
            fences,
            buffer,
            mapping,
            slice_size,
            frame: 0,
            slice: 0,
            cursor: 0,
            slice_fences: [None; STREAM_FRAME_COUNT],
            fence_timeout,
            overflow_count: 0,
        })
    }

    /// The ring buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Capacity of one frame slice, in bytes.
    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    /// Frames completed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Bytes handed out in the current slice.
    pub fn used_bytes(&self) -> u64 {
        self.cursor - self.slice_base()
    }

    /// Allocation requests refused because a slice was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn slice_base(&self) -> u64 {
        self.slice as u64 * self.slice_size
    }

    /// Selects the slice for this frame and waits until the GPU is done with it.
    ///
    /// A wait that times out is logged and the frame proceeds anyway.
    pub fn begin_frame(&mut self) {
        self.slice = (self.frame % STREAM_FRAME_COUNT as u64) as usize;

        if let Some(fence) = self.slice_fences[self.slice].take() {
            match self.fences.client_wait(fence, self.fence_timeout) {
                FenceStatus::Signaled => {}
                FenceStatus::TimedOut => log::warn!(
                    "StreamRing: fence wait for slice {} timed out after {:?}",
                    self.slice,
                    self.fence_timeout
                ),
                FenceStatus::Failed => {
                    log::warn!("StreamRing: fence wait for slice {} failed", self.slice)
                }
            }
            self.fences.delete_fence(fence);
        }

        self.cursor = self.slice_base();
    }

    /// Reserves `size` bytes in the current slice, optionally filling them.
    ///
    /// Returns `None` if the request is empty, does not fit in what is left
    /// of the slice, or the upload fails.
    pub fn alloc(&mut self, size: u64, data: Option<&[u8]>) -> Option<StreamAllocation> {
        if size == 0 {
            return None;
        }
        if let Some(data) = data.filter(|d| d.len() as u64 > size) {
            log::warn!(
                "StreamRing: {} bytes of data do not fit a {} byte allocation",
                data.len(),
                size
            );
            return None;
        }

        let aligned = align_up(size)?;
        let slice_end = self.slice_base() + self.slice_size;
        if self.cursor.checked_add(aligned).map_or(true, |end| end > slice_end) {
            self.overflow_count += 1;
            log::warn!(
                "Stream buffer overflow: {} bytes requested, {} left in slice {}",
                aligned,
                slice_end - self.cursor,
                self.slice
            );
            return None;
        }

        let offset = self.cursor;
        if let Some(data) = data {
            let written = match &self.mapping {
                Some(mapping) => mapping.write(offset, data),
                None => self.device.write_buffer(self.buffer, offset, data),
            };
            if let Err(e) = written {
                log::warn!("StreamRing: upload of {} bytes failed: {e}", data.len());
                return None;
            }
        }

        self.cursor += aligned;
        Some(StreamAllocation {
            buffer: self.buffer,
            offset,
            size: aligned,
        })
    }

    /// Fences the slice written this frame and advances the frame counter.
    pub fn end_frame(&mut self) {
        match self.fences.insert_fence() {
            Ok(fence) => self.slice_fences[self.slice] = Some(fence),
            Err(e) => log::warn!("StreamRing: failed to fence slice {}: {e}", self.slice),
        }
        self.frame += 1;
    }
}

impl Drop for StreamRingAllocator {
    fn drop(&mut self) {
        for fence in self.slice_fences.iter_mut().filter_map(Option::take) {
            self.fences.delete_fence(fence);
        }
        if let Err(e) = self.device.destroy_buffer(self.buffer) {
            log::warn!(
                "StreamRing: Failed to destroy buffer {:?}: {:?}",
                self.buffer,
                e
            );
        }
    }
}
