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

use serde::{Deserialize, Serialize};

/// An opaque handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// An opaque handle to a GPU fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(pub u64);

/// The binding point a buffer is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferTarget {
    /// Vertex attribute data.
    Vertex,
    /// Index data.
    Index,
    /// Uniform block data.
    Uniform,
    /// Shader storage data.
    Storage,
}

/// How often the contents of a buffer are expected to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten occasionally.
    Dynamic,
    /// Rewritten every frame.
    Stream,
}

impl BufferUsage {
    /// Whether buffers with this usage benefit from a persistent mapping.
    pub fn prefers_persistent_mapping(self) -> bool {
        matches!(self, BufferUsage::Dynamic | BufferUsage::Stream)
    }
}

/// A descriptor used to create a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// A debug label.
    pub label: Option<String>,
    /// Size of the buffer, in bytes.
    pub size: u64,
    /// The binding point.
    pub target: BufferTarget,
    /// The update frequency hint.
    pub usage: BufferUsage,
    /// Allocate immutable storage that can stay mapped while the GPU reads it.
    pub persistent: bool,
}

/// Outcome of a bounded wait on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU passed the fence.
    Signaled,
    /// The timeout elapsed first.
    TimedOut,
    /// The wait itself failed (lost context, unknown fence).
    Failed,
}
