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

use crate::renderer::api::{BufferDescriptor, BufferId};
use crate::renderer::error::ResourceError;
use std::fmt::Debug;
use std::sync::Arc;

/// CPU-visible memory backing a mapped buffer range.
///
/// Offsets are relative to the start of the mapped range, not the buffer.
pub trait MappedMemory: Send + Sync + Debug {
    /// Length of the mapped range, in bytes.
    fn len(&self) -> u64;

    /// Whether the mapped range is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `data` into the mapping at `offset`.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the write would run past the mapping.
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Copies bytes out of the mapping at `offset` into `out`.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the read would run past the mapping.
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError>;
}

/// Buffer creation, upload and mapping.
pub trait BufferDevice: Send + Sync + Debug + 'static {
    /// Creates a new GPU buffer.
    /// ## Arguments
    /// * `descriptor` - Size, binding point, usage and persistence of the buffer.
    /// ## Returns
    /// The ID of the created buffer.
    /// ## Errors
    /// * `ResourceError` - If the driver refuses the allocation.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer and any mapping it still holds.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Maps the whole buffer persistently and coherently.
    ///
    /// Only valid for buffers created with `persistent: true`. The mapping
    /// stays valid until the buffer is destroyed.
    /// ## Errors
    /// * `ResourceError::Unsupported` - If the buffer or driver cannot be mapped persistently.
    fn map_persistent(&self, id: BufferId) -> Result<Arc<dyn MappedMemory>, ResourceError>;

    /// Uploads `data` into the buffer at `offset` without mapping it.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Maps a range of the buffer for writing until [`BufferDevice::unmap`] is called.
    fn map_range(
        &self,
        id: BufferId,
        offset: u64,
        size: u64,
    ) -> Result<Arc<dyn MappedMemory>, ResourceError>;

    /// Releases a transient mapping created by [`BufferDevice::map_range`].
    fn unmap(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Makes CPU writes to a mapped range visible to the GPU.
    fn flush_mapped_range(&self, id: BufferId, offset: u64, size: u64)
        -> Result<(), ResourceError>;
}
