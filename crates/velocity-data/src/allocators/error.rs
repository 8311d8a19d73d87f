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

use super::buffer_pool::{PoolId, MAX_POOLS};
use thiserror::Error;
use velocity_core::renderer::ResourceError;

/// Errors returned by the buffer allocators.
///
/// All of them are recoverable: the caller can fall back to a dedicated
/// buffer, retry next frame or drop the work.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-byte allocations are refused.
    #[error("allocation size must be non-zero")]
    ZeroSize,
    /// No free block in the pool can hold the request.
    #[error("pool {pool:?} has no free block for {requested} bytes")]
    OutOfSpace {
        /// The exhausted pool.
        pool: PoolId,
        /// The aligned request size.
        requested: u64,
    },
    /// The pool does not exist or was destroyed.
    #[error("invalid or destroyed pool {0:?}")]
    InvalidPool(PoolId),
    /// Every pool slot is in use.
    #[error("pool limit of {} reached", MAX_POOLS)]
    PoolLimit,
    /// The handle no longer refers to a live allocation.
    #[error("stale allocation handle")]
    StaleHandle,
    /// An access would run past the end of the allocation.
    #[error("access of {len} bytes at offset {offset} exceeds allocation of {size} bytes")]
    OutOfBounds {
        /// Start of the access, relative to the allocation.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Requested size of the allocation.
        size: u64,
    },
    /// The driver rejected the operation.
    #[error("device error: {0}")]
    Device(#[from] ResourceError),
}
