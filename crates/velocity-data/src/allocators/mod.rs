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

//! GPU buffer allocators.

mod arena;
mod buffer_pool;
mod error;
mod stream_ring;

#[cfg(test)]
mod mock;

pub use self::buffer_pool::{
    BlockInfo, BufferAllocation, BufferPoolAllocator, BufferPoolSettings, BufferPoolStats,
    MappedRange, PoolId, PoolStats, MAX_POOLS,
};
pub use self::error::AllocError;
pub use self::stream_ring::{StreamAllocation, StreamRingAllocator, STREAM_FRAME_COUNT};

/// Every offset and size handed out by the allocators is a multiple of this.
pub const ALLOCATION_ALIGNMENT: u64 = 256;

/// Rounds `size` up to [`ALLOCATION_ALIGNMENT`], or `None` on overflow.
#[inline]
pub(crate) fn align_up(size: u64) -> Option<u64> {
    size.checked_add(ALLOCATION_ALIGNMENT - 1)
        .map(|s| s & !(ALLOCATION_ALIGNMENT - 1))
}
