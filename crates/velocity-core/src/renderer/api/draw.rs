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

/// An opaque handle to a linked shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProgramId(pub u32);

/// An opaque handle to a vertex layout (a VAO, or a vertex format fingerprint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VertexLayoutId(pub u64);

/// An opaque handle to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// How vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PrimitiveMode {
    /// Isolated points.
    Points,
    /// Isolated line segments.
    Lines,
    /// Connected line segments.
    LineStrip,
    /// Isolated triangles.
    #[default]
    Triangles,
    /// Connected triangles sharing an edge.
    TriangleStrip,
    /// Triangles sharing the first vertex.
    TriangleFan,
}

impl PrimitiveMode {
    /// A stable numeric code, used when hashing batch keys.
    pub fn code(self) -> u32 {
        match self {
            PrimitiveMode::Points => 0,
            PrimitiveMode::Lines => 1,
            PrimitiveMode::LineStrip => 3,
            PrimitiveMode::Triangles => 4,
            PrimitiveMode::TriangleStrip => 5,
            PrimitiveMode::TriangleFan => 6,
        }
    }
}

/// The width of each index in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexType {
    /// 8-bit indices.
    U8,
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexType {
    /// Size of one index, in bytes.
    pub fn size(self) -> u64 {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// The vertex or index range covered by one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawRange {
    /// Consecutive vertices starting at `first`.
    Arrays {
        /// First vertex.
        first: u32,
        /// Number of vertices.
        count: u32,
    },
    /// Indices read from the bound index buffer.
    Indexed {
        /// Number of indices.
        count: u32,
        /// Width of each index.
        index_type: IndexType,
        /// Byte offset into the index buffer.
        byte_offset: u64,
    },
}

impl DrawRange {
    /// Number of vertices or indices consumed.
    pub fn count(&self) -> u32 {
        match *self {
            DrawRange::Arrays { count, .. } | DrawRange::Indexed { count, .. } => count,
        }
    }

    /// The index width, for indexed ranges.
    pub fn index_type(&self) -> Option<IndexType> {
        match *self {
            DrawRange::Arrays { .. } => None,
            DrawRange::Indexed { index_type, .. } => Some(index_type),
        }
    }
}

/// A single draw submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawDescriptor {
    /// Primitive assembly mode.
    pub mode: PrimitiveMode,
    /// Vertex or index range.
    pub range: DrawRange,
    /// Instance count for instanced draws, `None` for plain draws.
    pub instances: Option<u32>,
}
