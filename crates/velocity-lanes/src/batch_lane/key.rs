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

use velocity_core::hash::FnvHasher;
use velocity_core::renderer::{PrimitiveMode, ProgramId, TextureId, VertexLayoutId};

/// The maximum number of attributes a [`VertexFormat`] can describe.
pub const MAX_VERTEX_ELEMENTS: usize = 16;

/// Everything two draws must share to be submitted back to back without
/// rebinding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BatchKey {
    /// The shader program.
    pub program: ProgramId,
    /// The vertex layout (vertex array object or [`VertexFormat::layout_id`]).
    pub vertex_layout: VertexLayoutId,
    /// The texture bound to unit 0.
    pub texture0: Option<TextureId>,
    /// The texture bound to unit 1.
    pub texture1: Option<TextureId>,
    /// Primitive assembly mode.
    pub mode: PrimitiveMode,
    /// Caller-defined hash of blend, depth and raster state.
    pub state_hash: u64,
}

impl BatchKey {
    /// Creates a key for `program` drawing triangles with `vertex_layout`.
    pub fn new(program: ProgramId, vertex_layout: VertexLayoutId) -> Self {
        Self {
            program,
            vertex_layout,
            ..Default::default()
        }
    }

    /// Returns the key with `texture` on unit 0.
    pub fn with_texture0(mut self, texture: TextureId) -> Self {
        self.texture0 = Some(texture);
        self
    }

    /// Returns the key with `texture` on unit 1.
    pub fn with_texture1(mut self, texture: TextureId) -> Self {
        self.texture1 = Some(texture);
        self
    }

    /// Returns the key with a different primitive mode.
    pub fn with_mode(mut self, mode: PrimitiveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the key with a different render state hash.
    pub fn with_state_hash(mut self, state_hash: u64) -> Self {
        self.state_hash = state_hash;
        self
    }

    /// A 64-bit FNV-1a digest of every field, used as the primary sort key.
    ///
    /// An unbound texture unit hashes like texture 0, so equal fingerprints
    /// do not imply equal keys.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FnvHasher::new();
        hasher.write_u32(self.program.0);
        hasher.write_u64(self.vertex_layout.0);
        hasher.write_u32(self.texture0.map_or(0, |t| t.0));
        hasher.write_u32(self.texture1.map_or(0, |t| t.0));
        hasher.write_u32(self.mode.code());
        hasher.write_u64(self.state_hash);
        hasher.finish()
    }
}

/// Scalar type of one vertex attribute component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    /// Signed byte.
    I8,
    /// Unsigned byte.
    U8,
    /// Signed short.
    I16,
    /// Unsigned short.
    U16,
    /// Signed int.
    I32,
    /// Unsigned int.
    U32,
    /// Half float.
    F16,
    /// Float.
    F32,
}

impl ComponentType {
    /// Size of one component, in bytes.
    pub fn size(self) -> u32 {
        match self {
            ComponentType::I8 | ComponentType::U8 => 1,
            ComponentType::I16 | ComponentType::U16 | ComponentType::F16 => 2,
            ComponentType::I32 | ComponentType::U32 | ComponentType::F32 => 4,
        }
    }

    fn code(self) -> u32 {
        self as u32
    }
}

/// One vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    /// Shader attribute location.
    pub index: u32,
    /// Component count, 1 to 4.
    pub components: u8,
    /// Component scalar type.
    pub component_type: ComponentType,
    /// Whether integer data is normalized to `[0, 1]` or `[-1, 1]`.
    pub normalized: bool,
    /// Byte offset inside the vertex.
    pub offset: u32,
}

impl VertexElement {
    /// A float attribute of `components` components.
    pub fn float(index: u32, components: u8, offset: u32) -> Self {
        Self {
            index,
            components,
            component_type: ComponentType::F32,
            normalized: false,
            offset,
        }
    }

    /// Byte size of the attribute.
    pub fn size(&self) -> u32 {
        u32::from(self.components) * self.component_type.size()
    }
}

/// Errors from building a [`VertexFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VertexFormatError {
    /// The format already holds [`MAX_VERTEX_ELEMENTS`] elements.
    #[error("vertex format is full ({} elements)", MAX_VERTEX_ELEMENTS)]
    Full,
    /// The component count is outside `1..=4`.
    #[error("invalid component count {0}")]
    InvalidComponents(u8),
}

/// An interleaved vertex layout.
///
/// Call [`VertexFormat::finalize`] after the last element is added; the
/// stride and fingerprint are zero until then.
#[derive(Debug, Clone, Default)]
pub struct VertexFormat {
    elements: Vec<VertexElement>,
    stride: u32,
    fingerprint: u64,
}

impl VertexFormat {
    /// Creates an empty format.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attribute.
    /// ## Errors
    /// * `VertexFormatError::Full` - If 16 elements are already present.
    /// * `VertexFormatError::InvalidComponents` - If `components` is not 1 to 4.
    pub fn add_element(&mut self, element: VertexElement) -> Result<(), VertexFormatError> {
        if self.elements.len() >= MAX_VERTEX_ELEMENTS {
            return Err(VertexFormatError::Full);
        }
        if !(1..=4).contains(&element.components) {
            return Err(VertexFormatError::InvalidComponents(element.components));
        }
        self.elements.push(element);
        self.stride = 0;
        self.fingerprint = 0;
        Ok(())
    }

    /// Computes the stride and the fingerprint.
    ///
    /// The stride is the end of the furthest element.
    pub fn finalize(&mut self) {
        self.stride = self
            .elements
            .iter()
            .map(|e| e.offset + e.size())
            .max()
            .unwrap_or(0);

        let mut hasher = FnvHasher::new();
        for e in &self.elements {
            hasher.write_u32(e.index);
            hasher.write_u32(u32::from(e.components));
            hasher.write_u32(e.component_type.code());
            hasher.write(&[u8::from(e.normalized)]);
            hasher.write_u32(e.offset);
        }
        hasher.write_u32(self.stride);
        self.fingerprint = hasher.finish();
    }

    /// The attributes, in insertion order.
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Bytes per vertex.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The layout digest computed by [`VertexFormat::finalize`].
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// The fingerprint as a layout id, for callers without a driver-side
    /// layout object.
    pub fn layout_id(&self) -> VertexLayoutId {
        VertexLayoutId(self.fingerprint)
    }
}

impl PartialEq for VertexFormat {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.elements.len() == other.elements.len()
    }
}

impl Eq for VertexFormat {}
